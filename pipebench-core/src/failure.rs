use std::fmt;
use std::time::SystemTime;

/// How a failure affects the verdict.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumCount,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// A correctness assertion about the target broke. Counts toward
    /// disqualification.
    Critical,
    /// The target answered too slowly or not at all within the budget.
    Timeout,
    /// Unexpected but non-critical response.
    Application,
    /// Network hiccup that survived the HTTP layer's retry.
    Temporary,
}

impl ErrorCategory {
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// One observed failure. Built at the failure site and handed off by value.
#[derive(Debug, Clone)]
pub struct BenchError {
    category: ErrorCategory,
    message: String,
    cause: Option<String>,
    timestamp: SystemTime,
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BenchError {}

impl BenchError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            cause: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Critical, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Application, message)
    }

    pub fn temporary(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Temporary, message)
    }

    /// Classifies a transport failure from the HTTP layer.
    pub fn from_http(context: &str, err: &pipebench_http::Error) -> Self {
        let category = if err.is_timeout() {
            ErrorCategory::Timeout
        } else if err.is_transient() {
            ErrorCategory::Temporary
        } else {
            ErrorCategory::Application
        };
        Self::new(category, context).with_cause(err)
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Same failure, promoted to critical. Pretest and finalcheck treat every
    /// failure as a broken guarantee.
    #[must_use]
    pub fn escalate(mut self) -> Self {
        self.category = ErrorCategory::Critical;
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}
