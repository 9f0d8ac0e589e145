mod aggregator;
mod benchmarker;
mod config;
mod error;
mod failure;
mod progress;
mod resolver;
mod result;
mod scenario;
mod session;
mod signal;

pub mod target;

pub use aggregator::{ErrorAggregator, unique_messages};
pub use benchmarker::{BenchmarkReport, Benchmarker, BenchmarkerConfig, StopReason};
pub use config::{BackpressurePolicy, BenchConfig, PoolConfig, WorkloadMix};
pub use error::{Error, Result};
pub use failure::{BenchError, ErrorCategory};
pub use progress::{ErrorCounts, ProgressEvent, ProgressFn, ProgressUpdate};
pub use resolver::{
    HickoryLookup, Lookup, LookupError, LookupFuture, Resolution, ResolveError, SubdomainResolver,
};
pub use result::BenchResult;
pub use scenario::{Outcome, Registration, Scenario, ScenarioContext, Workload};
pub use session::{BenchmarkSession, Phase, ScenarioTally, SessionReport, Suite};
pub use signal::StopSignal;

pub use pipebench_metrics::{CounterRegistry, CounterSnapshot, ScoreTag, TagPair, WeightTable};
