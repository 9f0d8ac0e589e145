use crate::tags::ScoreTag;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unknown score tag: `{0}`")]
    UnknownTag(String),

    #[error("`{0}` is not a revenue tag")]
    NotRevenue(ScoreTag),

    #[error("counter registry is already active")]
    AlreadyActive,

    #[error("counter registry is not active")]
    NotActive,

    #[error("counter registry has not been frozen yet")]
    NotFrozen,
}
