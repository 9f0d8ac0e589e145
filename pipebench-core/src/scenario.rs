use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use pipebench_metrics::{CounterRegistry, ScoreTag, TagPair};
use rand::Rng;
use rand::distributions::{Distribution as _, WeightedIndex};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::failure::BenchError;
use crate::resolver::{ResolveError, SubdomainResolver};

/// How a scenario iteration ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The target answered 429. Not a failure, but feeds spam backpressure.
    RateLimited,
}

/// What a scenario sees of the phase it runs in.
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    worker: u64,
    counters: Arc<CounterRegistry>,
    resolver: Arc<SubdomainResolver>,
    deadline: Instant,
    request_timeout: Duration,
}

impl ScenarioContext {
    pub fn new(
        worker: u64,
        counters: Arc<CounterRegistry>,
        resolver: Arc<SubdomainResolver>,
        deadline: Instant,
        request_timeout: Duration,
    ) -> Self {
        Self {
            worker,
            counters,
            resolver,
            deadline,
            request_timeout,
        }
    }

    pub fn worker(&self) -> u64 {
        self.worker
    }

    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    pub fn resolver(&self) -> &SubdomainResolver {
        &self.resolver
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Per-request budget, never past the deadline.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout.min(self.remaining())
    }

    pub async fn resolve(&self, hostname: &str) -> std::result::Result<IpAddr, ResolveError> {
        self.resolver
            .resolve(hostname, &self.counters, self.deadline)
            .await
    }

    pub fn count(&self, tag: ScoreTag, delta: u64) {
        // Rejections are logged and counted by the registry itself.
        let _ = self.counters.increment(tag, delta);
    }
}

/// One kind of user behavior the workload can pick.
///
/// A scenario owns no state of its own; everything a virtual user remembers
/// between iterations lives in its `Session`.
pub trait Scenario: Send + Sync + 'static {
    type Session: Send + 'static;

    fn name(&self) -> &'static str;

    fn run(
        &self,
        ctx: &ScenarioContext,
        session: &mut Self::Session,
    ) -> impl Future<Output = std::result::Result<Outcome, BenchError>> + Send;
}

/// A scenario plus the tags its outcome is counted under and its share of
/// the workload.
#[derive(Debug, Clone)]
pub struct Registration<S> {
    pub scenario: S,
    pub tags: TagPair,
    pub weight: u32,
}

impl<S> Registration<S> {
    pub fn new(scenario: S, tags: TagPair, weight: u32) -> Self {
        Self {
            scenario,
            tags,
            weight,
        }
    }
}

/// Weighted scenario mix. Zero-weight registrations are never picked.
#[derive(Debug)]
pub struct Workload<S> {
    registrations: Vec<Registration<S>>,
    index: WeightedIndex<u32>,
}

impl<S: Scenario> Workload<S> {
    pub fn new(registrations: Vec<Registration<S>>) -> Result<Self> {
        let index = WeightedIndex::new(registrations.iter().map(|r| r.weight))
            .map_err(|_| Error::EmptyWorkload)?;
        Ok(Self {
            registrations,
            index,
        })
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &Registration<S> {
        &self.registrations[self.index.sample(rng)]
    }

    pub fn registrations(&self) -> &[Registration<S>] {
        &self.registrations
    }
}
