use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pipebench_metrics::{CounterRegistry, CounterSnapshot, ScoreTag, TagPair};
use tokio::time::Instant;

use crate::aggregator::{ErrorAggregator, unique_messages};
use crate::benchmarker::{Benchmarker, BenchmarkerConfig, StopReason};
use crate::config::BenchConfig;
use crate::error::{Error, Result};
use crate::failure::{BenchError, ErrorCategory};
use crate::progress::{ProgressEvent, ProgressFn};
use crate::resolver::{HickoryLookup, Lookup, SubdomainResolver};
use crate::result::BenchResult;
use crate::scenario::{Scenario, ScenarioContext, Workload};
use crate::signal::StopSignal;

/// Where a run is. `Aborted`, `Passed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Init,
    Pretest,
    Benchmark,
    Finalcheck,
    /// Pretest broke a guarantee. Zero score, nothing else runs.
    Aborted,
    Passed,
    Failed,
}

impl Phase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Passed | Self::Failed)
    }
}

/// Target-specific checks and workload around the timed phase.
pub trait Suite: Send + Sync {
    type Scenario: Scenario;

    /// Baseline correctness before any load. Every error is critical.
    fn pretest(
        &self,
        ctx: &ScenarioContext,
    ) -> impl Future<Output = std::result::Result<(), BenchError>> + Send;

    fn workload(&self) -> Result<Workload<Self::Scenario>>;

    fn new_session(&self, worker: u64) -> <Self::Scenario as Scenario>::Session;

    /// Re-validates what the timed phase wrote, using the sessions the
    /// workers handed back. Every error is critical.
    fn finalcheck(
        &self,
        ctx: &ScenarioContext,
        sessions: &[<Self::Scenario as Scenario>::Session],
    ) -> impl Future<Output = std::result::Result<(), BenchError>> + Send;
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub phase: Phase,
    pub pass: bool,
    pub score: u64,
    /// Deduplicated, contestant-facing messages.
    pub messages: Vec<String>,
    /// Benchmark counters. `None` if the timed phase never ran.
    pub scenario_counter: Option<CounterSnapshot>,
    /// One entry per registered scenario, in registration order. Empty if the
    /// timed phase never ran.
    pub scenarios: Vec<ScenarioTally>,
    pub stop_reason: Option<StopReason>,
    pub benchmark_elapsed: Duration,
}

/// Completed and failed runs of one scenario, read through its declared
/// tag pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioTally {
    pub scenario: &'static str,
    pub succeeded: u64,
    pub failed: u64,
}

impl ScenarioTally {
    fn tally(registered: &[(&'static str, TagPair)], snapshot: &CounterSnapshot) -> Vec<Self> {
        registered
            .iter()
            .map(|&(scenario, tags)| Self {
                scenario,
                succeeded: snapshot.get(tags.success),
                failed: snapshot.get(tags.fail),
            })
            .collect()
    }
}

impl std::fmt::Display for ScenarioTally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} succeeded, {} failed",
            self.scenario, self.succeeded, self.failed
        )
    }
}

impl SessionReport {
    pub fn to_result(&self, language: &str) -> BenchResult {
        BenchResult::new(self.pass, self.score, self.messages.clone(), language)
    }
}

/// Sequences pretest, the timed phase and finalcheck. Each phase gets fresh
/// counters and a fresh error aggregator, so nothing a phase records can
/// leak into another.
pub struct BenchmarkSession {
    config: BenchConfig,
    lookup: Arc<dyn Lookup>,
    stop: Arc<StopSignal>,
    progress: Option<ProgressFn>,
    phase: Phase,
    registered: Vec<(&'static str, TagPair)>,
}

impl BenchmarkSession {
    pub fn new(config: BenchConfig) -> Self {
        let nameserver = std::net::SocketAddr::new(config.nameserver, config.dns_port);
        let lookup = HickoryLookup::new(nameserver, attempt_timeout(&config));
        Self::with_lookup(config, Arc::new(lookup))
    }

    pub fn with_lookup(config: BenchConfig, lookup: Arc<dyn Lookup>) -> Self {
        Self {
            config,
            lookup,
            stop: Arc::new(StopSignal::new()),
            progress: None,
            phase: Phase::Init,
            registered: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_stop_signal(mut self, stop: Arc<StopSignal>) -> Self {
        self.stop = stop;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    fn enter(&mut self, phase: Phase) {
        tracing::info!(from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
        if let Some(progress) = &self.progress {
            (progress)(ProgressEvent::Phase(phase));
        }
    }

    fn resolver(&self, attempts: u32) -> Arc<SubdomainResolver> {
        Arc::new(
            SubdomainResolver::with_lookup(self.lookup.clone())
                .with_attempts(attempts)
                .with_attempt_timeout(attempt_timeout(&self.config)),
        )
    }

    fn check_phase(&self, attempts: u32) -> Result<(ScenarioContext, Arc<ErrorAggregator>)> {
        let counters = Arc::new(CounterRegistry::new(self.config.weights.clone()));
        counters.init()?;
        let errors = Arc::new(ErrorAggregator::new(1));
        let ctx = ScenarioContext::new(
            0,
            counters,
            self.resolver(attempts),
            Instant::now() + self.config.check_timeout,
            self.config.request_timeout,
        );
        Ok((ctx, errors))
    }

    /// Runs every phase once. A session cannot be reused.
    pub async fn run<T: Suite>(&mut self, suite: &T) -> Result<SessionReport> {
        if self.phase != Phase::Init {
            return Err(Error::InvalidPhase(self.phase));
        }
        self.config.validate()?;
        let workload = suite.workload()?;
        self.registered = workload
            .registrations()
            .iter()
            .map(|r| (r.scenario.name(), r.tags))
            .collect();

        // Pretest
        self.enter(Phase::Pretest);
        let (ctx, errors) = self.check_phase(self.config.check_resolve_attempts)?;
        if let Err(err) = suite.pretest(&ctx).await {
            errors.record(err.escalate());
        }
        ctx.counters().done()?;
        errors.done();
        if errors.count(ErrorCategory::Critical) > 0 {
            self.enter(Phase::Aborted);
            let mut messages = vec!["pretest failed".to_string()];
            messages.extend(unique_messages(errors.messages(ErrorCategory::Critical)));
            tracing::error!(target: "contestant", "pretest failed, aborting run");
            return Ok(self.report(false, 0, messages, None, None, Duration::ZERO));
        }
        tracing::info!(target: "contestant", "pretest passed");

        if self.config.pretest_only {
            self.enter(Phase::Passed);
            return Ok(self.report(
                true,
                0,
                vec!["pretest passed".to_string()],
                None,
                None,
                Duration::ZERO,
            ));
        }

        // Benchmark
        self.enter(Phase::Benchmark);
        let counters = Arc::new(CounterRegistry::new(self.config.weights.clone()));
        counters.init()?;
        let errors = Arc::new(ErrorAggregator::new(self.config.disqualify_threshold));
        let bench_config = BenchmarkerConfig {
            pool: self.config.pool,
            backpressure: self.config.backpressure,
            request_timeout: self.config.request_timeout,
            progress_interval: self.config.progress_interval,
        };
        let benchmarker = Benchmarker::new(
            workload,
            counters.clone(),
            errors.clone(),
            self.resolver(self.config.bench_resolve_attempts),
            bench_config,
        )
        .with_progress(self.progress.clone())
        .with_stop_signal(self.stop.clone());

        let deadline = Instant::now() + self.config.benchmark_duration;
        let bench = benchmarker.run(deadline, |id| suite.new_session(id)).await;
        counters.done()?;
        errors.done();

        let snapshot = benchmarker.scenario_counter()?;
        let score = counters.total_profit()?;
        let mut messages = summary_messages(&self.registered, &snapshot);
        messages.extend(unique_messages(
            errors
                .get_final_error_messages()
                .into_iter()
                .flat_map(|(_, messages)| messages),
        ));

        if errors.is_disqualified() {
            self.enter(Phase::Failed);
            tracing::error!(target: "contestant", "too many critical errors, run disqualified");
            messages.insert(0, "disqualified: too many critical errors".to_string());
            return Ok(self.report(
                false,
                0,
                messages,
                Some(snapshot),
                Some(bench.stop_reason),
                bench.elapsed,
            ));
        }
        if bench.stop_reason == StopReason::Cancelled {
            self.enter(Phase::Failed);
            messages.insert(0, "benchmark cancelled".to_string());
            return Ok(self.report(
                false,
                0,
                messages,
                Some(snapshot),
                Some(bench.stop_reason),
                bench.elapsed,
            ));
        }

        // Finalcheck
        self.enter(Phase::Finalcheck);
        let (ctx, check_errors) = self.check_phase(self.config.check_resolve_attempts)?;
        if let Err(err) = suite.finalcheck(&ctx, &bench.sessions).await {
            check_errors.record(err.escalate());
        }
        ctx.counters().done()?;
        check_errors.done();

        if check_errors.count(ErrorCategory::Critical) > 0 {
            self.enter(Phase::Failed);
            tracing::error!(target: "contestant", "finalcheck failed");
            let failed = unique_messages(
                std::iter::once("finalcheck failed".to_string())
                    .chain(check_errors.messages(ErrorCategory::Critical))
                    .chain(messages),
            );
            return Ok(self.report(
                false,
                0,
                failed,
                Some(snapshot),
                Some(bench.stop_reason),
                bench.elapsed,
            ));
        }

        self.enter(Phase::Passed);
        tracing::info!(target: "contestant", score, "benchmark passed");
        messages.push(format!("score: {score}"));
        Ok(self.report(
            true,
            score,
            messages,
            Some(snapshot),
            Some(bench.stop_reason),
            bench.elapsed,
        ))
    }

    fn report(
        &self,
        pass: bool,
        score: u64,
        messages: Vec<String>,
        scenario_counter: Option<CounterSnapshot>,
        stop_reason: Option<StopReason>,
        benchmark_elapsed: Duration,
    ) -> SessionReport {
        let scenarios = scenario_counter
            .as_ref()
            .map(|snapshot| ScenarioTally::tally(&self.registered, snapshot))
            .unwrap_or_default();
        SessionReport {
            phase: self.phase,
            pass,
            score,
            messages,
            scenario_counter,
            scenarios,
            stop_reason,
            benchmark_elapsed,
        }
    }
}

fn attempt_timeout(config: &BenchConfig) -> Duration {
    config.request_timeout.min(Duration::from_secs(5))
}

fn summary_messages(
    registered: &[(&'static str, TagPair)],
    snapshot: &CounterSnapshot,
) -> Vec<String> {
    let mut out: Vec<String> = ScenarioTally::tally(registered, snapshot)
        .iter()
        .map(ToString::to_string)
        .collect();
    for (label, tag) in [
        ("subdomains resolved", ScoreTag::DnsResolve),
        ("subdomain lookups failed", ScoreTag::DnsFailed),
        ("workers backed off (slow)", ScoreTag::TooSlow),
        ("workers backed off (rate limited)", ScoreTag::TooManySpam),
    ] {
        let n = snapshot.get(tag);
        if n > 0 {
            out.push(format!("{label}: {n}"));
        }
    }
    out
}
