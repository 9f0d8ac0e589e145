use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::Arc;

use pipebench_core::{
    BenchResult, CounterSnapshot, ErrorCounts, ProgressEvent, ProgressFn, ProgressUpdate,
    ScenarioTally, SessionReport,
};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |event| match event {
            ProgressEvent::Phase(phase) => emit_json_line(&JsonPhaseLine {
                kind: "phase",
                phase: phase.to_string(),
            }),
            ProgressEvent::Tick(u) => emit_json_line(&build_progress_line(&u)),
        }))
    }

    fn print_summary(
        &self,
        report: Option<&SessionReport>,
        result: &BenchResult,
    ) -> anyhow::Result<()> {
        emit_json_line(&build_summary_line(report, result));
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct JsonPhaseLine {
    kind: &'static str,
    phase: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub remaining_secs: f64,
    pub active_workers: u64,
    pub spawned_workers: u64,

    pub counters: BTreeMap<&'static str, u64>,
    pub errors: JsonErrors,

    pub latency_p50_ms: Option<f64>,
    pub latency_p90_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
    pub latency_max_ms: Option<f64>,
    pub iterations: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonErrors {
    pub critical: u64,
    pub timeout: u64,
    pub application: u64,
    pub temporary: u64,
}

impl From<ErrorCounts> for JsonErrors {
    fn from(e: ErrorCounts) -> Self {
        Self {
            critical: e.critical,
            timeout: e.timeout,
            application: e.application,
            temporary: e.temporary,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine<'a> {
    pub kind: &'static str,
    pub pass: bool,
    pub score: i64,
    pub language: &'a str,
    pub phase: Option<String>,
    pub stop_reason: Option<String>,
    pub benchmark_secs: Option<f64>,
    pub counters: BTreeMap<&'static str, u64>,
    pub scenarios: Vec<JsonScenario>,
    pub messages: &'a [String],
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonScenario {
    pub name: &'static str,
    pub succeeded: u64,
    pub failed: u64,
}

impl From<&ScenarioTally> for JsonScenario {
    fn from(t: &ScenarioTally) -> Self {
        Self {
            name: t.scenario,
            succeeded: t.succeeded,
            failed: t.failed,
        }
    }
}

fn counters_map(snapshot: &CounterSnapshot) -> BTreeMap<&'static str, u64> {
    snapshot.iter().map(|(tag, v)| (tag.as_str(), v)).collect()
}

pub(crate) fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        remaining_secs: u.remaining.as_secs_f64(),
        active_workers: u.active_workers,
        spawned_workers: u.spawned_workers,
        counters: counters_map(&u.counters),
        errors: u.errors.into(),
        latency_p50_ms: u.latency.p50,
        latency_p90_ms: u.latency.p90,
        latency_p99_ms: u.latency.p99,
        latency_max_ms: u.latency.max,
        iterations: u.latency.count,
    }
}

pub(crate) fn build_summary_line<'a>(
    report: Option<&SessionReport>,
    result: &'a BenchResult,
) -> JsonSummaryLine<'a> {
    JsonSummaryLine {
        kind: "summary",
        pass: result.pass,
        score: result.score,
        language: &result.language,
        phase: report.map(|r| r.phase.to_string()),
        stop_reason: report.and_then(|r| r.stop_reason).map(|s| s.to_string()),
        benchmark_secs: report
            .filter(|r| r.scenario_counter.is_some())
            .map(|r| r.benchmark_elapsed.as_secs_f64()),
        counters: report
            .and_then(|r| r.scenario_counter.as_ref())
            .map(counters_map)
            .unwrap_or_default(),
        scenarios: report
            .map(|r| r.scenarios.iter().map(JsonScenario::from).collect())
            .unwrap_or_default(),
        messages: &result.messages,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let Ok(s) = serde_json::to_string(line) else {
        return;
    };
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{s}");
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipebench_core::Phase;
    use std::time::Duration;

    #[test]
    fn summary_without_a_report_only_carries_the_result() {
        let result = BenchResult::failed(vec!["initialize failed".to_string()], "");
        let line = build_summary_line(None, &result);
        let value = serde_json::to_value(&line).unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(value["kind"], "summary");
        assert_eq!(value["pass"], false);
        assert_eq!(value["score"], 0);
        assert!(value["phase"].is_null());
        assert_eq!(value["messages"][0], "initialize failed");
    }

    #[test]
    fn summary_reports_the_phase_and_the_verdict() {
        let report = SessionReport {
            phase: Phase::Aborted,
            pass: false,
            score: 0,
            messages: vec!["pretest failed".to_string()],
            scenario_counter: None,
            scenarios: Vec::new(),
            stop_reason: None,
            benchmark_elapsed: Duration::ZERO,
        };
        let result = report.to_result("rust");
        let line = build_summary_line(Some(&report), &result);

        assert_eq!(line.phase.as_deref(), Some("aborted"));
        assert_eq!(line.language, "rust");
        assert!(line.benchmark_secs.is_none());
        assert!(line.counters.is_empty());
        assert!(line.scenarios.is_empty());
    }

    #[test]
    fn summary_lists_one_entry_per_scenario() {
        let report = SessionReport {
            phase: Phase::Passed,
            pass: true,
            score: 300,
            messages: Vec::new(),
            scenario_counter: None,
            scenarios: vec![
                ScenarioTally {
                    scenario: "register_viewer",
                    succeeded: 5,
                    failed: 1,
                },
                ScenarioTally {
                    scenario: "post_tip",
                    succeeded: 3,
                    failed: 0,
                },
            ],
            stop_reason: None,
            benchmark_elapsed: Duration::ZERO,
        };
        let result = report.to_result("rust");
        let value = serde_json::to_value(build_summary_line(Some(&report), &result))
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(value["scenarios"][0]["name"], "register_viewer");
        assert_eq!(value["scenarios"][0]["failed"], 1);
        assert_eq!(value["scenarios"][1]["succeeded"], 3);
        assert_eq!(value["scenarios"].as_array().map(Vec::len), Some(2));
    }
}
