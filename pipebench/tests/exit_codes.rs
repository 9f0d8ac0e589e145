use std::process::Command;

use anyhow::Context as _;
use pipebench_core::BenchResult;

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn read_result(path: &std::path::Path) -> anyhow::Result<BenchResult> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read result file: {}", path.display()))?;
    serde_json::from_str(&raw).context("parse result file")
}

#[test]
fn invalid_duration_exits_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_pipebench");

    let out = Command::new(exe)
        .arg("run")
        .arg("--duration")
        .arg("10x")
        .output()
        .context("run pipebench binary")?;

    anyhow::ensure!(
        status_code(out.status) == 30,
        "expected exit code 30, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );

    Ok(())
}

#[test]
fn inconsistent_pool_bounds_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_pipebench");
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let result_path = tmp.path().join("result.json");

    let out = Command::new(exe)
        .arg("run")
        .arg("--workers")
        .arg("8")
        .arg("--max-workers")
        .arg("2")
        .arg("--result-path")
        .arg(&result_path)
        .output()
        .context("run pipebench binary")?;

    anyhow::ensure!(
        status_code(out.status) == 30,
        "expected exit code 30, got {}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stderr)
    );
    anyhow::ensure!(!result_path.exists(), "invalid input must not leave a result");

    Ok(())
}

#[test]
fn unreachable_target_exits_10_with_a_failed_result() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_pipebench");
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let result_path = tmp.path().join("result.json");

    let out = Command::new(exe)
        .arg("run")
        .arg("--target")
        .arg("http://127.0.0.1:1")
        .arg("--initialize-timeout")
        .arg("2s")
        .arg("--output")
        .arg("json")
        .arg("--result-path")
        .arg(&result_path)
        .output()
        .context("run pipebench binary")?;

    anyhow::ensure!(
        status_code(out.status) == 10,
        "expected exit code 10, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );

    let result = read_result(&result_path)?;
    anyhow::ensure!(!result.pass);
    anyhow::ensure!(result.score == 0);
    anyhow::ensure!(
        result.messages.first().map(String::as_str) == Some("initialize failed"),
        "messages: {:?}",
        result.messages
    );

    Ok(())
}

#[test]
fn unwritable_result_path_exits_40_and_prints_the_result() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_pipebench");
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let result_path = tmp.path().join("missing").join("result.json");

    let out = Command::new(exe)
        .arg("run")
        .arg("--target")
        .arg("http://127.0.0.1:1")
        .arg("--initialize-timeout")
        .arg("1s")
        .arg("--result-path")
        .arg(&result_path)
        .output()
        .context("run pipebench binary")?;

    anyhow::ensure!(
        status_code(out.status) == 40,
        "expected exit code 40, got {}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stderr)
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(
        stdout.lines().any(|l| l.starts_with(r#"{"pass":false"#)),
        "stdout:\n{stdout}"
    );

    Ok(())
}
