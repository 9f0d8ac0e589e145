use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use pipebench_metrics::{CounterRegistry, CounterSnapshot, LatencyRecorder, ScoreTag};
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::aggregator::ErrorAggregator;
use crate::config::{BackpressurePolicy, PoolConfig};
use crate::failure::ErrorCategory;
use crate::progress::{ProgressEvent, ProgressFn, ProgressUpdate};
use crate::resolver::SubdomainResolver;
use crate::scenario::{Outcome, Scenario, ScenarioContext, Workload};
use crate::signal::StopSignal;

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkerConfig {
    pub pool: PoolConfig,
    pub backpressure: BackpressurePolicy,
    pub request_timeout: Duration,
    pub progress_interval: Duration,
}

impl Default for BenchmarkerConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            backpressure: BackpressurePolicy::default(),
            request_timeout: Duration::from_secs(10),
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// Why the timed phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    Deadline,
    Disqualified,
    Cancelled,
    /// Every worker backed off and the pool may not grow any further.
    Exhausted,
}

#[derive(Debug)]
pub struct BenchmarkReport<T> {
    /// Sessions of every worker that exited normally.
    pub sessions: Vec<T>,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
    pub workers_spawned: u64,
    pub backpressure_trips: u64,
    pub latency: pipebench_metrics::HistogramSummary,
}

struct Shared<S: Scenario> {
    workload: Arc<Workload<S>>,
    counters: Arc<CounterRegistry>,
    errors: Arc<ErrorAggregator>,
    resolver: Arc<SubdomainResolver>,
    latency: Arc<LatencyRecorder>,
    stop: Arc<StopSignal>,
    policy: BackpressurePolicy,
    request_timeout: Duration,
    deadline: Instant,
    halt: AtomicBool,
    active: Arc<AtomicU64>,
    trips: AtomicU64,
}

impl<S: Scenario> Shared<S> {
    fn should_stop(&self) -> bool {
        self.halt.load(Ordering::Acquire)
            || self.errors.is_disqualified()
            || self.stop.is_stopped()
            || Instant::now() >= self.deadline
    }
}

struct ActiveGuard(Arc<AtomicU64>);

impl ActiveGuard {
    fn new(active: Arc<AtomicU64>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drives the timed phase: an adaptive pool of workers, each looping over
/// the weighted workload until the deadline, disqualification or an external
/// stop.
pub struct Benchmarker<S: Scenario> {
    workload: Arc<Workload<S>>,
    counters: Arc<CounterRegistry>,
    errors: Arc<ErrorAggregator>,
    resolver: Arc<SubdomainResolver>,
    latency: Arc<LatencyRecorder>,
    stop: Arc<StopSignal>,
    config: BenchmarkerConfig,
    progress: Option<ProgressFn>,
}

impl<S: Scenario> Benchmarker<S> {
    pub fn new(
        workload: Workload<S>,
        counters: Arc<CounterRegistry>,
        errors: Arc<ErrorAggregator>,
        resolver: Arc<SubdomainResolver>,
        config: BenchmarkerConfig,
    ) -> Self {
        Self {
            workload: Arc::new(workload),
            counters,
            errors,
            resolver,
            latency: Arc::new(LatencyRecorder::default()),
            stop: Arc::new(StopSignal::new()),
            config,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_stop_signal(mut self, stop: Arc<StopSignal>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> Arc<StopSignal> {
        self.stop.clone()
    }

    /// Per-tag counts of the finished phase. Fails until the counters are
    /// frozen.
    pub fn scenario_counter(&self) -> crate::Result<CounterSnapshot> {
        Ok(self.counters.snapshot()?)
    }

    /// Runs workers until `deadline` and hands back their sessions.
    ///
    /// The caller owns the counter and error lifecycles: both must be active
    /// before and are frozen by the caller after this returns.
    pub async fn run<F>(&self, deadline: Instant, new_session: F) -> BenchmarkReport<S::Session>
    where
        F: Fn(u64) -> S::Session,
    {
        let started = Instant::now();
        let pool = self.config.pool;
        let shared = Arc::new(Shared {
            workload: self.workload.clone(),
            counters: self.counters.clone(),
            errors: self.errors.clone(),
            resolver: self.resolver.clone(),
            latency: self.latency.clone(),
            stop: self.stop.clone(),
            policy: self.config.backpressure,
            request_timeout: self.config.request_timeout,
            deadline,
            halt: AtomicBool::new(false),
            active: Arc::new(AtomicU64::new(0)),
            trips: AtomicU64::new(0),
        });

        tracing::info!(
            initial_workers = pool.initial_workers,
            max_workers = pool.max_workers,
            "benchmark started"
        );

        let mut handles: Vec<JoinHandle<S::Session>> = Vec::new();
        let spawned = Arc::new(AtomicU64::new(0));
        let spawn = |handles: &mut Vec<JoinHandle<S::Session>>, n: u64| {
            for _ in 0..n {
                let id = spawned.fetch_add(1, Ordering::SeqCst) + 1;
                let session = new_session(id);
                handles.push(tokio::spawn(worker(id, shared.clone(), session)));
            }
        };
        spawn(&mut handles, pool.initial_workers.min(pool.max_workers));

        let progress_handle = self.progress.as_ref().map(|progress| {
            let progress = progress.clone();
            let shared = shared.clone();
            let spawned = spawned.clone();
            let period = self.config.progress_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut tick = 0u64;
                loop {
                    interval.tick().await;
                    tick += 1;
                    (progress)(ProgressEvent::Tick(ProgressUpdate {
                        tick,
                        elapsed: started.elapsed(),
                        remaining: shared.deadline.saturating_duration_since(Instant::now()),
                        active_workers: shared.active.load(Ordering::SeqCst),
                        spawned_workers: spawned.load(Ordering::SeqCst),
                        counters: shared.counters.live_snapshot(),
                        errors: shared.errors.counts(),
                        latency: shared.latency.summary(),
                    }));
                }
            })
        });

        let mut scale =
            tokio::time::interval_at(Instant::now() + pool.scale_interval, pool.scale_interval);
        scale.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_trips = 0u64;

        let stop_reason = loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break StopReason::Deadline,
                _ = self.errors.disqualified() => break StopReason::Disqualified,
                _ = self.stop.wait() => break StopReason::Cancelled,
                _ = scale.tick() => {
                    let trips = shared.trips.load(Ordering::SeqCst);
                    let tripped = trips != last_trips;
                    last_trips = trips;

                    let current = spawned.load(Ordering::SeqCst);
                    if !tripped && current < pool.max_workers {
                        let n = pool.scale_step.min(pool.max_workers - current);
                        tracing::debug!(added = n, total = current + n, "scaling out");
                        spawn(&mut handles, n);
                    } else if shared.active.load(Ordering::SeqCst) == 0 {
                        break StopReason::Exhausted;
                    }
                }
            }
        };
        shared.halt.store(true, Ordering::Release);
        tracing::info!(reason = %stop_reason, "benchmark stopping, waiting for workers");

        let mut sessions = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(session) => sessions.push(session),
                Err(err) => tracing::warn!(error = %err, "worker terminated abnormally"),
            }
        }

        if let Some(h) = progress_handle {
            h.abort();
        }

        let report = BenchmarkReport {
            sessions,
            stop_reason,
            elapsed: started.elapsed(),
            workers_spawned: spawned.load(Ordering::SeqCst),
            backpressure_trips: shared.trips.load(Ordering::SeqCst),
            latency: self.latency.summary(),
        };
        tracing::info!(
            reason = %report.stop_reason,
            elapsed_ms = report.elapsed.as_millis() as u64,
            workers = report.workers_spawned,
            trips = report.backpressure_trips,
            "benchmark finished"
        );
        report
    }
}

async fn worker<S: Scenario>(id: u64, shared: Arc<Shared<S>>, mut session: S::Session) -> S::Session {
    let _active = ActiveGuard::new(shared.active.clone());
    let mut rng = StdRng::from_entropy();
    let ctx = ScenarioContext::new(
        id,
        shared.counters.clone(),
        shared.resolver.clone(),
        shared.deadline,
        shared.request_timeout,
    );
    let policy = shared.policy;
    let mut slow_streak = 0u32;
    let mut spam_streak = 0u32;

    while !shared.should_stop() {
        let registration = shared.workload.pick(&mut rng);
        let started = Instant::now();
        let result = registration.scenario.run(&ctx, &mut session).await;
        let elapsed = started.elapsed();
        shared.latency.record(elapsed);

        if ctx.is_expired() {
            match result {
                Ok(Outcome::Completed) => ctx.count(registration.tags.success, 1),
                Ok(Outcome::RateLimited) => {}
                Err(err) => {
                    tracing::debug!(worker = id, error = %err, "discarding failure observed after deadline")
                }
            }
            break;
        }

        let mut timed_out = false;
        match result {
            Ok(Outcome::Completed) => {
                ctx.count(registration.tags.success, 1);
                spam_streak = 0;
            }
            Ok(Outcome::RateLimited) => spam_streak += 1,
            Err(err) => {
                spam_streak = 0;
                timed_out = err.category() == ErrorCategory::Timeout;
                ctx.count(registration.tags.fail, 1);
                tracing::debug!(
                    worker = id,
                    scenario = registration.scenario.name(),
                    error = %err,
                    "scenario failed"
                );
                shared.errors.record(err);
            }
        }

        if timed_out || elapsed > policy.slow_ceiling {
            slow_streak += 1;
        } else {
            slow_streak = 0;
        }

        let tripped = if slow_streak >= policy.slow_tolerance {
            Some(ScoreTag::TooSlow)
        } else if spam_streak >= policy.spam_tolerance {
            Some(ScoreTag::TooManySpam)
        } else {
            None
        };
        if let Some(tag) = tripped {
            ctx.count(tag, 1);
            shared.trips.fetch_add(1, Ordering::SeqCst);
            tracing::info!(worker = id, %tag, "worker backing off");
            break;
        }

        tokio::task::yield_now().await;
    }

    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::BenchError;
    use crate::resolver::{Lookup, LookupError, LookupFuture};
    use crate::scenario::Registration;
    use pipebench_metrics::TagPair;

    struct NoDns;

    impl Lookup for NoDns {
        fn lookup<'a>(&'a self, hostname: &'a str) -> LookupFuture<'a> {
            Box::pin(async move { Err(LookupError::NoRecord(hostname.to_string())) })
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Instant,
        Slow(Duration),
        Throttled,
        Critical,
    }

    impl Scenario for Behavior {
        type Session = u64;

        fn name(&self) -> &'static str {
            "behavior"
        }

        async fn run(&self, _ctx: &ScenarioContext, runs: &mut u64) -> Result<Outcome, BenchError> {
            *runs += 1;
            match *self {
                Behavior::Instant => Ok(Outcome::Completed),
                Behavior::Slow(d) => {
                    tokio::time::sleep(d).await;
                    Ok(Outcome::Completed)
                }
                Behavior::Throttled => Ok(Outcome::RateLimited),
                Behavior::Critical => Err(BenchError::critical("tip total mismatch")),
            }
        }
    }

    fn setup(
        behavior: Behavior,
        config: BenchmarkerConfig,
        threshold: u64,
    ) -> (Benchmarker<Behavior>, Arc<CounterRegistry>, Arc<ErrorAggregator>) {
        let counters = Arc::new(CounterRegistry::default());
        counters.init().unwrap_or_else(|e| panic!("init: {e}"));
        let errors = Arc::new(ErrorAggregator::new(threshold));
        let workload = Workload::new(vec![Registration::new(
            behavior,
            TagPair::new(ScoreTag::PostTip, ScoreTag::PostTipFail),
            1,
        )])
        .unwrap_or_else(|e| panic!("workload: {e}"));
        let resolver = Arc::new(SubdomainResolver::with_lookup(Arc::new(NoDns)));
        let bench = Benchmarker::new(workload, counters.clone(), errors.clone(), resolver, config);
        (bench, counters, errors)
    }

    fn config(initial: u64, max: u64) -> BenchmarkerConfig {
        BenchmarkerConfig {
            pool: PoolConfig {
                initial_workers: initial,
                max_workers: max,
                scale_step: 1,
                scale_interval: Duration::from_millis(20),
            },
            ..BenchmarkerConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stops_at_deadline_and_returns_every_session() {
        let (bench, counters, _errors) = setup(Behavior::Instant, config(2, 4), 1);
        let deadline = Instant::now() + Duration::from_millis(100);

        let report = bench.run(deadline, |_| 0u64).await;
        let returned = Instant::now();
        counters.done().unwrap_or_else(|e| panic!("done: {e}"));

        assert_eq!(report.stop_reason, StopReason::Deadline);
        assert!(returned < deadline + Duration::from_millis(500));
        assert_eq!(report.sessions.len() as u64, report.workers_spawned);
        assert!(report.workers_spawned > 2, "pool should have grown");

        let runs: u64 = report.sessions.iter().sum();
        let counted = bench
            .scenario_counter()
            .unwrap_or_else(|e| panic!("{e}"))
            .get(ScoreTag::PostTip);
        assert!(runs > 0);
        assert_eq!(counted, runs);
        assert_eq!(counters.late_increments(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disqualification_ends_the_phase_early() {
        let (bench, counters, errors) = setup(Behavior::Critical, config(2, 2), 3);
        let deadline = Instant::now() + Duration::from_secs(30);

        let report = bench.run(deadline, |_| 0u64).await;
        counters.done().unwrap_or_else(|e| panic!("done: {e}"));
        errors.done();

        assert_eq!(report.stop_reason, StopReason::Disqualified);
        assert!(report.elapsed < Duration::from_secs(5));
        assert!(errors.is_disqualified());
        assert!(errors.count(ErrorCategory::Critical) >= 3);
        // In-flight iterations finish, but nothing new starts after the flag.
        let runs: u64 = report.sessions.iter().sum();
        assert!(runs <= errors.count(ErrorCategory::Critical) + 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_target_trips_too_slow_and_stops_scaling() {
        let mut cfg = config(2, 8);
        cfg.backpressure = BackpressurePolicy {
            slow_ceiling: Duration::from_millis(5),
            slow_tolerance: 2,
            spam_tolerance: 3,
        };
        cfg.pool.scale_interval = Duration::from_millis(200);
        let (bench, counters, _errors) =
            setup(Behavior::Slow(Duration::from_millis(20)), cfg, 1);
        let deadline = Instant::now() + Duration::from_secs(5);

        let report = bench.run(deadline, |_| 0u64).await;
        counters.done().unwrap_or_else(|e| panic!("done: {e}"));

        assert_eq!(report.stop_reason, StopReason::Exhausted);
        assert_eq!(report.workers_spawned, 2);
        assert_eq!(counters.get_by_tag(ScoreTag::TooSlow), 2);
        assert!(report.sessions.iter().all(|runs| *runs == 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rate_limited_workers_trip_too_many_spam() {
        let (bench, counters, errors) = setup(Behavior::Throttled, config(1, 1), 1);
        let deadline = Instant::now() + Duration::from_secs(5);

        let report = bench.run(deadline, |_| 0u64).await;
        counters.done().unwrap_or_else(|e| panic!("done: {e}"));

        assert_eq!(report.stop_reason, StopReason::Exhausted);
        assert_eq!(counters.get_by_tag(ScoreTag::TooManySpam), 1);
        assert_eq!(counters.get_by_tag(ScoreTag::PostTip), 0);
        assert_eq!(errors.counts().total(), 0);
    }

    #[tokio::test]
    async fn external_stop_cancels_the_phase() {
        let (bench, counters, _errors) = setup(Behavior::Instant, config(1, 1), 1);
        let stop = bench.stop_signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stop.stop();
        });

        let report = bench
            .run(Instant::now() + Duration::from_secs(30), |_| 0u64)
            .await;
        let _ = counters.done();
        assert_eq!(report.stop_reason, StopReason::Cancelled);
    }
}
