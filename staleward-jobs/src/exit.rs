use std::process::ExitCode;

use staleward_core::{JobFailure, RunSummary};

/// Process exit status of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every scanned host was delivered or skipped.
    Clean,
    /// The run finished but some hosts failed.
    HostFailures,
    /// The run aborted.
    Fatal,
}

impl RunStatus {
    pub fn from_result(result: &Result<RunSummary, JobFailure>) -> Self {
        match result {
            Ok(summary) if summary.is_clean() => RunStatus::Clean,
            Ok(_) => RunStatus::HostFailures,
            Err(_) => RunStatus::Fatal,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            RunStatus::Clean => 0,
            RunStatus::HostFailures => 1,
            RunStatus::Fatal => 2,
        }
    }
}

impl From<RunStatus> for ExitCode {
    fn from(status: RunStatus) -> Self {
        ExitCode::from(status.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staleward_core::JobError;
    use staleward_core::error::BusConnectionError;

    #[test]
    fn statuses_follow_failure_counts() {
        let clean = RunSummary {
            scanned: 3,
            delivered: 2,
            skipped: 1,
            ..RunSummary::default()
        };
        assert_eq!(RunStatus::from_result(&Ok(clean)).code(), 0);

        let interrupted = RunSummary {
            interrupted: true,
            ..clean
        };
        assert_eq!(RunStatus::from_result(&Ok(interrupted)).code(), 0);

        let partial = RunSummary {
            failed: 1,
            ..clean
        };
        assert_eq!(RunStatus::from_result(&Ok(partial)).code(), 1);

        let failure = JobFailure {
            error: JobError::BusConnection(BusConnectionError::Lost(
                "reset".into(),
            )),
            summary: partial,
        };
        assert_eq!(RunStatus::from_result(&Err(failure)).code(), 2);
    }
}
