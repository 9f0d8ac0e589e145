use std::path::Path;
use std::sync::Arc;

use pipebench_core::target::PipeSuite;
use pipebench_core::{BenchResult, BenchmarkSession, StopSignal};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::logging;
use crate::output::{self, OutputFormatter};
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    logging::init_logging(args.contestant_log.as_deref()).map_err(RunError::Internal)?;

    let config = args.bench_config();
    config.validate()?;
    let out = output::formatter(args.output, config.benchmark_duration);
    tracing::info!(
        url = %config.target_base_url,
        nameserver = %config.nameserver,
        dns_port = config.dns_port,
        duration = ?config.benchmark_duration,
        "starting benchmark"
    );

    let suite = PipeSuite::new(&config);
    let language = match suite.initialize(config.initialize_timeout).await {
        Ok(res) => res.language,
        Err(err) => {
            tracing::error!(target: "contestant", error = %err, "initialize failed");
            let result = BenchResult::failed(
                vec!["initialize failed".to_string(), err.to_string()],
                "",
            );
            out.print_summary(None, &result)
                .map_err(RunError::Internal)?;
            persist(&result, &args.result_path)?;
            return Ok(ExitCode::BenchmarkFailed);
        }
    };

    let stop = Arc::new(StopSignal::new());
    let interrupt = tokio::spawn({
        let stop = stop.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping the benchmark");
                stop.stop();
            }
        }
    });

    let mut session = BenchmarkSession::new(config).with_stop_signal(stop);
    if let Some(progress) = out.progress() {
        session = session.with_progress(progress);
    }
    let report = session.run(&suite).await;
    interrupt.abort();
    let report = match report {
        Ok(report) => report,
        Err(err) => return Err(abandon(out.as_ref(), &args.result_path, err, &language)),
    };

    let result = report.to_result(&language);
    out.print_summary(Some(&report), &result)
        .map_err(RunError::Internal)?;
    persist(&result, &args.result_path)?;

    Ok(ExitCode::from_verdict(result.pass))
}

/// The session broke down without a verdict. A failed record is still
/// written so the supervisor never finds a stale or missing result.
fn abandon(
    out: &dyn OutputFormatter,
    result_path: &Path,
    err: pipebench_core::Error,
    language: &str,
) -> RunError {
    tracing::error!(target: "contestant", error = %err, "benchmark could not complete");
    let result = BenchResult::failed(
        vec!["benchmark could not complete".to_string(), err.to_string()],
        language,
    );
    if let Err(print_err) = out.print_summary(None, &result) {
        return RunError::Internal(print_err);
    }
    if let Err(persist_err) = persist(&result, result_path) {
        return persist_err;
    }
    err.into()
}

/// A result that cannot be written still reaches stdout.
fn persist(result: &BenchResult, path: &Path) -> Result<(), RunError> {
    match result.write_atomic(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "result written");
            Ok(())
        }
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed to write result");
            if let Ok(json) = result.to_json() {
                println!("{json}");
            }
            Err(RunError::internal(
                anyhow::Error::new(err).context("failed to persist the result"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pipebench_core::Phase;

    use crate::cli::OutputFormat;

    #[test]
    fn abandoned_session_still_writes_a_failed_record() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("result.json");
        let out = output::formatter(OutputFormat::Json, Duration::from_secs(1));

        let err = abandon(
            out.as_ref(),
            &path,
            pipebench_core::Error::InvalidPhase(Phase::Passed),
            "rust",
        );
        assert_eq!(err.exit_code(), ExitCode::RuntimeError);

        let raw = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{e}"));
        let result: BenchResult = serde_json::from_str(&raw).unwrap_or_else(|e| panic!("{e}"));
        assert!(!result.pass);
        assert_eq!(result.score, 0);
        assert_eq!(result.language, "rust");
        assert_eq!(
            result.messages.first().map(String::as_str),
            Some("benchmark could not complete")
        );
    }

    #[test]
    fn unwritable_path_reports_the_persist_failure() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("missing").join("result.json");
        let out = output::formatter(OutputFormat::Json, Duration::from_secs(1));

        let err = abandon(
            out.as_ref(),
            &path,
            pipebench_core::Error::InvalidPhase(Phase::Passed),
            "",
        );
        assert_eq!(err.exit_code(), ExitCode::RuntimeError);
        assert!(err.to_string().starts_with("failed to persist the result"), "{err}");
    }
}
