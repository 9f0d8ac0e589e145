use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use pipebench_core::{BackpressurePolicy, BenchConfig, PoolConfig};

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 60s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 60s, 250ms, 1m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 60s, 250ms, 1m)"))?;

    match unit_str.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!(
            "invalid duration '{s}' (expected e.g. 60s, 250ms, 1m)"
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and a readable summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "pipebench",
    author,
    version,
    about = "Load and correctness benchmark for the live-streaming service",
    long_about = "pipebench resets the target, checks its baseline behaviour, drives a timed load phase against it and re-validates the data the load phase wrote.\n\nThe verdict is written as a JSON record ({pass, score, messages, language}) to --result-path.",
    after_help = "Examples:\n  pipebench run --target http://pipe.u.isucon.dev:8080 --nameserver 127.0.0.1\n  pipebench run --duration 30s --workers 8 --output json\n  BENCH_TARGET=https://pipe.u.isucon.dev pipebench run --pretest-only"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Initialize the target and run pretest, benchmark and finalcheck
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Base URL of the target
    #[arg(long, env = "BENCH_TARGET", default_value = "http://pipe.u.isucon.dev:8080")]
    pub target: String,

    /// Talk to the target over https (rewrites an http:// target)
    #[arg(long, env = "BENCH_ENABLE_SSL")]
    pub enable_ssl: bool,

    /// Nameserver the target provisions subdomains on
    #[arg(long, env = "BENCH_NAMESERVER", default_value = "127.0.0.1")]
    pub nameserver: IpAddr,

    #[arg(long, env = "BENCH_DNS_PORT", default_value_t = 53)]
    pub dns_port: u16,

    /// Zone under which each user gets `<name>.<base-domain>`
    #[arg(long, env = "BENCH_BASE_DOMAIN", default_value = "u.isucon.dev")]
    pub base_domain: String,

    /// Length of the timed load phase (e.g. 60s, 1m)
    #[arg(long, env = "BENCH_DURATION", default_value = "60s", value_parser = parse_duration)]
    pub duration: Duration,

    /// Budget for pretest and for finalcheck, each
    #[arg(long, env = "BENCH_CHECK_TIMEOUT", default_value = "60s", value_parser = parse_duration)]
    pub check_timeout: Duration,

    #[arg(long, env = "BENCH_REQUEST_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub request_timeout: Duration,

    #[arg(long, env = "BENCH_INITIALIZE_TIMEOUT", default_value = "42s", value_parser = parse_duration)]
    pub initialize_timeout: Duration,

    /// Critical errors that disqualify the run
    #[arg(long, env = "BENCH_DISQUALIFY_THRESHOLD", default_value_t = 10)]
    pub disqualify_threshold: u64,

    /// Workers started with the load phase
    #[arg(long, env = "BENCH_WORKERS", default_value_t = 4)]
    pub workers: u64,

    #[arg(long, env = "BENCH_MAX_WORKERS", default_value_t = 64)]
    pub max_workers: u64,

    /// Workers added per scale tick while the target keeps up
    #[arg(long, env = "BENCH_SCALE_STEP", default_value_t = 4)]
    pub scale_step: u64,

    #[arg(long, env = "BENCH_SCALE_INTERVAL", default_value = "5s", value_parser = parse_duration)]
    pub scale_interval: Duration,

    /// Iterations slower than this count towards --slow-tolerance
    #[arg(long, env = "BENCH_SLOW_CEILING", default_value = "5s", value_parser = parse_duration)]
    pub slow_ceiling: Duration,

    #[arg(long, env = "BENCH_SLOW_TOLERANCE", default_value_t = 3)]
    pub slow_tolerance: u32,

    /// Consecutive rate-limited iterations a worker accepts before it exits
    #[arg(long, env = "BENCH_SPAM_TOLERANCE", default_value_t = 3)]
    pub spam_tolerance: u32,

    /// Resolve attempts per subdomain during the load phase
    #[arg(long, env = "BENCH_RESOLVE_ATTEMPTS", default_value_t = 2)]
    pub resolve_attempts: u32,

    /// Resolve attempts per subdomain during pretest and finalcheck
    #[arg(long, env = "BENCH_CHECK_RESOLVE_ATTEMPTS", default_value_t = 10)]
    pub check_resolve_attempts: u32,

    /// Stop after pretest
    #[arg(long, env = "BENCH_PRETEST_ONLY")]
    pub pretest_only: bool,

    /// Where the result record is written
    #[arg(long, env = "BENCH_RESULT_PATH", default_value = "result.json")]
    pub result_path: PathBuf,

    /// Also write contestant-facing log lines to this file
    #[arg(long, env = "BENCH_CONTESTANT_LOG")]
    pub contestant_log: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

impl RunArgs {
    fn target_url(&self) -> String {
        match self.target.strip_prefix("http://") {
            Some(rest) if self.enable_ssl => format!("https://{rest}"),
            _ => self.target.clone(),
        }
    }

    pub fn bench_config(&self) -> BenchConfig {
        BenchConfig {
            target_base_url: self.target_url(),
            nameserver: self.nameserver,
            dns_port: self.dns_port,
            base_domain: self.base_domain.clone(),
            benchmark_duration: self.duration,
            check_timeout: self.check_timeout,
            request_timeout: self.request_timeout,
            initialize_timeout: self.initialize_timeout,
            disqualify_threshold: self.disqualify_threshold,
            backpressure: BackpressurePolicy {
                slow_ceiling: self.slow_ceiling,
                slow_tolerance: self.slow_tolerance,
                spam_tolerance: self.spam_tolerance,
            },
            pool: PoolConfig {
                initial_workers: self.workers,
                max_workers: self.max_workers,
                scale_step: self.scale_step,
                scale_interval: self.scale_interval,
            },
            bench_resolve_attempts: self.resolve_attempts,
            check_resolve_attempts: self.check_resolve_attempts,
            pretest_only: self.pretest_only,
            ..BenchConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration(" 42 "), Ok(Duration::from_secs(42)));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn run_args_map_onto_the_bench_config() {
        let cli = Cli::try_parse_from([
            "pipebench",
            "run",
            "--target",
            "http://127.0.0.1:8080",
            "--dns-port",
            "1053",
            "--duration",
            "5s",
            "--workers",
            "2",
            "--max-workers",
            "8",
            "--spam-tolerance",
            "7",
            "--pretest-only",
        ])
        .unwrap_or_else(|e| panic!("{e}"));
        let Command::Run(args) = cli.command;
        let config = args.bench_config();

        assert_eq!(config.target_base_url, "http://127.0.0.1:8080");
        assert_eq!(config.dns_port, 1053);
        assert_eq!(config.benchmark_duration, Duration::from_secs(5));
        assert_eq!(config.pool.initial_workers, 2);
        assert_eq!(config.pool.max_workers, 8);
        assert_eq!(config.backpressure.spam_tolerance, 7);
        assert!(config.pretest_only);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn enable_ssl_switches_the_scheme() {
        let cli = Cli::try_parse_from([
            "pipebench",
            "run",
            "--target",
            "http://pipe.u.isucon.dev",
            "--enable-ssl",
        ])
        .unwrap_or_else(|e| panic!("{e}"));
        let Command::Run(args) = cli.command;
        assert_eq!(args.bench_config().target_base_url, "https://pipe.u.isucon.dev");
    }
}
