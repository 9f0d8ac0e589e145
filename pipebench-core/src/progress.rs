use std::sync::Arc;
use std::time::Duration;

use pipebench_metrics::{CounterSnapshot, HistogramSummary};

use crate::session::Phase;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounts {
    pub critical: u64,
    pub timeout: u64,
    pub application: u64,
    pub temporary: u64,
}

impl ErrorCounts {
    pub fn total(&self) -> u64 {
        self.critical + self.timeout + self.application + self.temporary
    }
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// 1-based tick number.
    pub tick: u64,
    pub elapsed: Duration,
    pub remaining: Duration,
    pub active_workers: u64,
    pub spawned_workers: u64,
    pub counters: CounterSnapshot,
    pub errors: ErrorCounts,
    /// Scenario iteration latency so far, in milliseconds.
    pub latency: HistogramSummary,
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Phase(Phase),
    Tick(ProgressUpdate),
}

pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync + 'static>;
