use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// How a request failed, coarse enough for retry and scoring decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Rejected before anything was sent.
    Invalid,
    /// No connection to the target.
    Connect,
    /// The connection broke before the whole response arrived.
    Broken,
    /// The caller's time budget ran out.
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// and https:// URLs are supported: {0}")]
    UnsupportedScheme(String),

    #[error("invalid request: {0}")]
    Build(#[from] http::Error),

    #[error("invalid header `{name}`")]
    Header { name: String },

    #[error("request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("no complete response within {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidUrl(_)
            | Self::UnsupportedScheme(_)
            | Self::Build(_)
            | Self::Header { .. } => FailureKind::Invalid,
            Self::Request(e) if e.is_connect() => FailureKind::Connect,
            Self::Request(_) | Self::Body(_) => FailureKind::Broken,
            Self::Timeout(_) => FailureKind::Timeout,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind() == FailureKind::Timeout
    }

    /// Worth exactly one more attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), FailureKind::Connect | FailureKind::Broken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_requests_are_not_retried() {
        let err = Error::Header {
            name: "bad header".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::Invalid);
        assert!(!err.is_transient());
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeouts_are_their_own_kind() {
        let err = Error::Timeout(Duration::from_millis(50));
        assert!(err.is_timeout());
        assert!(!err.is_transient());
        assert_eq!(err.kind().to_string(), "timeout");
    }
}
