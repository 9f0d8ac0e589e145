use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use pipebench_core::{
    BenchResult, Phase, ProgressEvent, ProgressFn, ProgressUpdate, ScoreTag, SessionReport,
};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    duration: Duration,
    bar: Arc<Mutex<Option<ProgressBar>>>,
}

impl HumanReadableOutput {
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            duration,
            bar: Arc::new(Mutex::new(None)),
        }
    }

    fn finish(&self) {
        let mut bar = self
            .bar
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pb) = bar.take() {
            pb.finish_and_clear();
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn progress(&self) -> Option<ProgressFn> {
        let bar = self.bar.clone();
        let total_ms = u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX);

        Some(Arc::new(move |event| {
            let mut bar = bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match event {
                ProgressEvent::Phase(Phase::Benchmark) => {
                    let pb = ProgressBar::with_draw_target(
                        Some(total_ms),
                        ProgressDrawTarget::stderr_with_hz(5),
                    );
                    pb.set_style(bar_style());
                    pb.set_prefix("benchmark");
                    *bar = Some(pb);
                }
                ProgressEvent::Phase(phase) => {
                    if let Some(pb) = bar.take() {
                        pb.finish_and_clear();
                    }
                    eprintln!("phase: {phase}");
                }
                ProgressEvent::Tick(u) => {
                    if let Some(pb) = bar.as_ref() {
                        let elapsed_ms = u64::try_from(u.elapsed.as_millis()).unwrap_or(u64::MAX);
                        pb.set_position(elapsed_ms.min(total_ms));
                        pb.set_message(progress_message(&u));
                    }
                }
            }
        }))
    }

    fn print_summary(
        &self,
        report: Option<&SessionReport>,
        result: &BenchResult,
    ) -> anyhow::Result<()> {
        self.finish();
        print!("{}", render_summary(report, result));
        Ok(())
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}

fn format_ms(ms: Option<f64>) -> String {
    match ms {
        Some(v) if v >= 1000.0 => format!("{:.2}s", v / 1000.0),
        Some(v) => format!("{v:.0}ms"),
        None => "-".to_string(),
    }
}

pub(crate) fn progress_message(u: &ProgressUpdate) -> String {
    format!(
        "workers={}/{} tips={} viewers={} errors={} (critical {}) p99={}",
        u.active_workers,
        u.spawned_workers,
        u.counters.get(ScoreTag::Tip),
        u.counters.get(ScoreTag::RegisterViewer),
        u.errors.total(),
        u.errors.critical,
        format_ms(u.latency.p99),
    )
}

pub(crate) fn render_summary(report: Option<&SessionReport>, result: &BenchResult) -> String {
    let mut out = String::new();
    let verdict = if result.pass { "PASS" } else { "FAIL" };
    out.push_str(&format!("result: {verdict}\nscore: {}\n", result.score));
    if !result.language.is_empty() {
        out.push_str(&format!("language: {}\n", result.language));
    }

    if let Some(report) = report {
        out.push_str(&format!("phase: {}\n", report.phase));
        if let Some(reason) = report.stop_reason {
            let elapsed = Duration::from_millis(
                u64::try_from(report.benchmark_elapsed.as_millis()).unwrap_or(u64::MAX),
            );
            out.push_str(&format!(
                "benchmark: {} (stopped: {reason})\n",
                humantime::format_duration(elapsed)
            ));
        }
        if !report.scenarios.is_empty() {
            out.push_str("\nscenarios:\n");
            for t in &report.scenarios {
                out.push_str(&format!(
                    "  {:<26} {} ok / {} failed\n",
                    t.scenario, t.succeeded, t.failed
                ));
            }
        }
        if let Some(counter) = &report.scenario_counter {
            out.push_str("\ncounters:\n");
            for (tag, value) in counter.iter() {
                out.push_str(&format!("  {:<26} {value}\n", tag.as_str()));
            }
        }
    }

    if !result.messages.is_empty() {
        out.push_str("\nmessages:\n");
        for m in &result.messages {
            out.push_str(&format!("  {m}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipebench_core::{ScenarioTally, StopReason};

    #[test]
    fn format_ms_picks_a_unit() {
        assert_eq!(format_ms(None), "-");
        assert_eq!(format_ms(Some(12.4)), "12ms");
        assert_eq!(format_ms(Some(2500.0)), "2.50s");
    }

    #[test]
    fn summary_lists_verdict_and_messages() {
        let report = SessionReport {
            phase: Phase::Passed,
            pass: true,
            score: 1500,
            messages: vec!["score: 1500".to_string()],
            scenario_counter: None,
            scenarios: vec![ScenarioTally {
                scenario: "post_tip",
                succeeded: 12,
                failed: 2,
            }],
            stop_reason: Some(StopReason::Deadline),
            benchmark_elapsed: Duration::from_millis(60_004),
        };
        let text = render_summary(Some(&report), &report.to_result("rust"));

        assert!(text.starts_with("result: PASS\nscore: 1500\nlanguage: rust\n"));
        assert!(text.contains("phase: passed\n"));
        assert!(text.contains("benchmark: 1m 4ms (stopped: deadline)\n"));
        assert!(text.contains(&format!("scenarios:\n  {:<26} 12 ok / 2 failed\n", "post_tip")));
        assert!(text.ends_with("messages:\n  score: 1500\n"));
    }
}
