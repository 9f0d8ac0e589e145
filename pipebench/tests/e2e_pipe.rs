use std::path::Path;

use anyhow::Context as _;
use pipebench_core::BenchResult;
use pipebench_testserver::{Faults, TestServer, TestServerOptions};

async fn run_bench(
    server: &TestServer,
    result_path: &Path,
    extra: &[&str],
) -> anyhow::Result<std::process::Output> {
    let dns = server.dns_addr().context("test server has no nameserver")?;
    let exe = env!("CARGO_BIN_EXE_pipebench");

    tokio::process::Command::new(exe)
        .arg("run")
        .arg("--target")
        .arg(server.base_url())
        .arg("--nameserver")
        .arg(dns.ip().to_string())
        .arg("--dns-port")
        .arg(dns.port().to_string())
        .arg("--duration")
        .arg("2s")
        .arg("--check-timeout")
        .arg("20s")
        .arg("--request-timeout")
        .arg("5s")
        .arg("--workers")
        .arg("2")
        .arg("--max-workers")
        .arg("4")
        .arg("--scale-step")
        .arg("1")
        .arg("--scale-interval")
        .arg("500ms")
        .arg("--output")
        .arg("json")
        .arg("--result-path")
        .arg(result_path)
        .args(extra)
        .output()
        .await
        .context("run pipebench")
}

fn read_result(path: &Path) -> anyhow::Result<BenchResult> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read result file: {}", path.display()))?;
    serde_json::from_str(&raw).context("parse result file")
}

#[tokio::test]
async fn e2e_healthy_target_passes() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let result_path = tmp.path().join("result.json");
    let contestant_log = tmp.path().join("contestant.log");

    let out = run_bench(
        &server,
        &result_path,
        &["--contestant-log", &contestant_log.to_string_lossy()],
    )
    .await?;
    let initialized = server.stats().initialize_calls();
    let tips = server.stats().tips_received();
    server.shutdown().await;

    anyhow::ensure!(
        out.status.success(),
        "pipebench exited with {}\nstdout:\n{}\nstderr:\n{}",
        out.status,
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    anyhow::ensure!(initialized == 1, "initialize was called {initialized} times");
    anyhow::ensure!(tips > 0, "expected the target to receive tips");

    let result = read_result(&result_path)?;
    anyhow::ensure!(result.pass, "messages: {:?}", result.messages);
    anyhow::ensure!(result.score > 0);
    anyhow::ensure!(result.language == "rust", "language: {}", result.language);

    let stdout = String::from_utf8_lossy(&out.stdout);
    let kinds: Vec<String> = stdout
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .filter_map(|v| v["kind"].as_str().map(str::to_string))
        .collect();
    anyhow::ensure!(kinds.iter().any(|k| k == "phase"), "no phase lines");
    anyhow::ensure!(kinds.iter().any(|k| k == "progress"), "no progress lines");
    anyhow::ensure!(kinds.last().map(String::as_str) == Some("summary"));

    let log = std::fs::read_to_string(&contestant_log).context("read contestant log")?;
    anyhow::ensure!(log.contains("pretest passed"), "contestant log:\n{log}");
    anyhow::ensure!(log.contains("benchmark passed"), "contestant log:\n{log}");

    Ok(())
}

#[tokio::test]
async fn e2e_lost_tips_exit_10() -> anyhow::Result<()> {
    let server = TestServer::start_with(TestServerOptions {
        faults: Faults {
            drop_tips: true,
            ..Faults::default()
        },
        ..TestServerOptions::default()
    })
    .await
    .context("start test server")?;
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let result_path = tmp.path().join("result.json");

    let out = run_bench(&server, &result_path, &["--pretest-only"]).await?;
    server.shutdown().await;

    anyhow::ensure!(
        out.status.code() == Some(10),
        "expected exit code 10, got {}\nstderr:\n{}",
        out.status,
        String::from_utf8_lossy(&out.stderr)
    );
    let result = read_result(&result_path)?;
    anyhow::ensure!(!result.pass);
    anyhow::ensure!(
        result.messages.first().map(String::as_str) == Some("pretest failed"),
        "messages: {:?}",
        result.messages
    );

    Ok(())
}
