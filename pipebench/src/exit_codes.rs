/// Process exit status reported to the orchestrating supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    /// Initialize, pretest or finalcheck failed, or the run was disqualified
    /// or cancelled. A result record was still written.
    BenchmarkFailed,
    /// Rejected flags or an inconsistent configuration.
    InvalidInput,
    /// The harness failed, e.g. the result file could not be written.
    RuntimeError,
}

impl ExitCode {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::BenchmarkFailed => 10,
            Self::InvalidInput => 30,
            Self::RuntimeError => 40,
        }
    }

    #[must_use]
    pub fn from_verdict(pass: bool) -> Self {
        if pass { Self::Success } else { Self::BenchmarkFailed }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code.code())
    }
}
