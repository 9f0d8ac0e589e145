use std::time::Duration;

use pipebench_core::{BenchResult, ProgressFn, SessionReport};

use crate::cli::OutputFormat;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(
        &self,
        report: Option<&SessionReport>,
        result: &BenchResult,
    ) -> anyhow::Result<()>;
}

/// `duration` sizes the human progress bar.
pub(crate) fn formatter(format: OutputFormat, duration: Duration) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new(duration)),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
