use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context as _;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _, fmt};

/// Events under this target are meant for the people running the target.
pub const CONTESTANT_TARGET: &str = "contestant";

fn env_filter() -> EnvFilter {
    std::env::var("PIPEBENCH_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map_or_else(
            |_| EnvFilter::new("info"),
            |value| EnvFilter::try_new(value).unwrap_or_else(|_| EnvFilter::new("info")),
        )
}

/// Installs the stderr layer and, with `contestant_log`, a plain-text file
/// layer that only sees `contestant` events.
pub fn init_logging(contestant_log: Option<&Path>) -> anyhow::Result<()> {
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter());

    let contestant = match contestant_log {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create contestant log: {}", path.display()))?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .with_filter(Targets::new().with_target(CONTESTANT_TARGET, LevelFilter::INFO));
            Some(layer)
        }
        None => None,
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(stderr)
        .with(contestant)
        .try_init()
    {
        eprintln!("failed to install log subscriber: {err}");
    }
    Ok(())
}
