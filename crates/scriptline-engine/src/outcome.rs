use serde::{Deserialize, Serialize};
use std::fmt;

use scriptline_status::{ErrorCode, Job};

use crate::error::StageError;

/// Result of one stage execution, as seen by the caller.
///
/// `Pending` covers everything resumable: waiting on an operator, on a
/// prerequisite, or on approval. `Fatal` is a recorded stage failure; the job
/// stays resumable but a re-run of the same inputs is unlikely to help.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    Pending {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        hints: Vec<String>,
    },
    Fatal {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        hints: Vec<String>,
    },
}

impl StageOutcome {
    #[must_use]
    pub fn from_error(err: &StageError) -> Self {
        Self::from_parts(err.code(), err.to_string(), err.hints())
    }

    #[must_use]
    pub fn from_parts(code: ErrorCode, message: String, hints: Vec<String>) -> Self {
        if code.is_wait() {
            Self::Pending {
                code,
                message,
                hints,
            }
        } else {
            Self::Fatal {
                code,
                message,
                hints,
            }
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Completed => None,
            Self::Pending { code, .. } | Self::Fatal { code, .. } => Some(*code),
        }
    }

    #[must_use]
    pub fn hints(&self) -> &[String] {
        match self {
            Self::Completed => &[],
            Self::Pending { hints, .. } | Self::Fatal { hints, .. } => hints,
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Pending { code, message, .. } => write!(f, "pending ({code}): {message}"),
            Self::Fatal { code, message, .. } => write!(f, "failed ({code}): {message}"),
        }
    }
}

/// One `run_stage` call: which stage ran, how it ended, and the saved job.
#[derive(Debug, Clone)]
pub struct StageRun {
    pub stage: String,
    pub outcome: StageOutcome,
    pub job: Job,
}

#[derive(Debug, Clone)]
pub enum NextStep {
    Ran(StageRun),
    /// Nothing left to run
    Finished(Job),
}

impl NextStep {
    #[must_use]
    pub fn job(&self) -> &Job {
        match self {
            Self::Ran(run) => &run.job,
            Self::Finished(job) => job,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    /// The pending stage set did not change across one step
    Stuck,
    MaxIterations,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub job: Job,
    pub runs: Vec<StageRun>,
    pub stop: StopReason,
}

impl RunReport {
    #[must_use]
    pub fn last_outcome(&self) -> Option<&StageOutcome> {
        self.runs.last().map(|r| &r.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_codes_are_pending() {
        let outcome = StageOutcome::from_error(&StageError::AwaitingApproval {
            path: "content/script.md.proposed".into(),
        });
        assert!(matches!(outcome, StageOutcome::Pending { code: ErrorCode::AwaitingApproval, .. }));
        assert!(!outcome.is_fatal());

        let outcome = StageOutcome::from_error(&StageError::EmptyContent {
            task: "draft".into(),
        });
        assert!(outcome.is_fatal());
        assert_eq!(outcome.code(), Some(ErrorCode::EmptyContent));
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(StageOutcome::Completed).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "completed"}));
    }
}
