use crate::exit_codes::ExitCode;

/// Why `run` could not produce a verdict.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The flags describe a run that cannot happen.
    #[error("{0:#}")]
    Invalid(anyhow::Error),
    /// The harness itself broke.
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl RunError {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }

    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Invalid(_) => ExitCode::InvalidInput,
            Self::Internal(_) => ExitCode::RuntimeError,
        }
    }
}

impl From<pipebench_core::Error> for RunError {
    fn from(err: pipebench_core::Error) -> Self {
        use pipebench_core::Error as Core;
        match err {
            Core::InvalidConfig(_) | Core::EmptyWorkload => Self::Invalid(err.into()),
            other => Self::Internal(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_invalid_input() {
        let err = RunError::from(pipebench_core::Error::InvalidConfig(
            "max workers below initial workers".to_string(),
        ));
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);
        assert!(err.to_string().contains("max workers below initial workers"));
    }

    #[test]
    fn phase_errors_are_internal() {
        let err = RunError::from(pipebench_core::Error::InvalidPhase(
            pipebench_core::Phase::Passed,
        ));
        assert_eq!(err.exit_code(), ExitCode::RuntimeError);
    }

    #[test]
    fn context_chain_is_rendered() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = RunError::internal(anyhow::Error::new(io).context("failed to persist the result"));
        assert_eq!(err.to_string(), "failed to persist the result: read-only");
    }
}
