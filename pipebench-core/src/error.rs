use std::path::PathBuf;

use crate::session::Phase;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("workload has no runnable scenario")]
    EmptyWorkload,

    #[error("counter registry error: {0}")]
    Counters(#[from] pipebench_metrics::Error),

    #[error("session cannot run from phase `{0}`")]
    InvalidPhase(Phase),

    #[error("failed to encode result: {0}")]
    ResultEncode(#[from] serde_json::Error),

    #[error("failed to write result file {}: {source}", path.display())]
    ResultWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}
