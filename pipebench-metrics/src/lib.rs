mod error;

pub mod latency;
pub mod registry;
pub mod tags;

pub use error::{Error, Result};
pub use latency::{HistogramSummary, LatencyRecorder};
pub use registry::{CounterRegistry, CounterSnapshot};
pub use tags::{ScoreTag, TagPair, WeightTable};
