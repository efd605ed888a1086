//! Engine error taxonomy.
//!
//! [`StageError`] is what a stage handler raises; the orchestrator catches it
//! at the handler boundary and records it on the stage. [`EngineError`] is
//! what escapes to the caller: a broken record, a held lock, a bad registry,
//! or a programming-contract violation such as an unknown stage name.

use thiserror::Error;

use scriptline_lock::LockError;
use scriptline_status::{ErrorCode, StatusError};
use scriptline_utils::error::{ConfigError, ErrorCategory, LlmError, UserFriendlyError};
use scriptline_utils::exit_codes::ExitCode;
use scriptline_utils::{JobKeyError, TemplateError};
use scriptline_validation::Issue;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Stage registry has no stages")]
    Empty,

    #[error("Stage '{0}' is defined more than once")]
    DuplicateStage(String),

    #[error("Stage '{0}' declares no outputs")]
    NoOutputs(String),

    #[error("Stage '{stage}' of kind {kind} needs at least one input")]
    MissingInput { stage: String, kind: String },

    #[error("Stage '{stage}' has an invalid path: {source}")]
    Template {
        stage: String,
        #[source]
        source: TemplateError,
    },
}

/// Failure inside a stage handler, recorded on the stage rather than raised.
#[derive(Error, Debug, Clone)]
pub enum StageError {
    #[error("Input {path} does not exist")]
    MissingInput { path: String },

    #[error("Input {path} is malformed: {reason}")]
    MalformedInput { path: String, reason: String },

    #[error("Gateway call for task '{task}' failed: {source}")]
    Gateway {
        task: String,
        #[source]
        source: LlmError,
    },

    #[error("Gateway returned no usable content for task '{task}'")]
    EmptyContent { task: String },

    #[error("Waiting for an operator to fill in {entry}")]
    AwaitingExternal { entry: String },

    #[error("Proposed output written to {path}")]
    AwaitingApproval { path: String },

    #[error("Output {path} fails validation with {} error(s)", .issues.iter().filter(|i| i.is_error()).count())]
    ValidationFailed { path: String, issues: Vec<Issue> },

    #[error("Output {path} still contains the placeholder '{token}' at line {line}")]
    Placeholder {
        path: String,
        token: String,
        line: usize,
    },

    #[error("Quality gate ran {rounds} round(s) without a pass")]
    ConvergenceExhausted { rounds: u32, must_fix: Vec<String> },

    #[error("Fix output breaks hard rules and was rejected")]
    FixRejected { issues: Vec<Issue> },

    #[error("Rescue could not bring the length into range: {reason}")]
    RescueFailed { reason: String, issues: Vec<Issue> },

    #[error("Judge reply could not be parsed: {reason}")]
    JudgeUnparseable { reason: String },

    #[error("{0}")]
    Internal(String),
}

impl StageError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingInput { .. } => ErrorCode::MissingInput,
            Self::MalformedInput { .. } => ErrorCode::MalformedInput,
            Self::Gateway { .. } => ErrorCode::GatewayFailure,
            Self::EmptyContent { .. } => ErrorCode::EmptyContent,
            Self::AwaitingExternal { .. } => ErrorCode::AwaitingExternal,
            Self::AwaitingApproval { .. } => ErrorCode::AwaitingApproval,
            Self::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            Self::Placeholder { .. } => ErrorCode::SemanticMismatch,
            Self::ConvergenceExhausted { .. } => ErrorCode::ConvergenceExhausted,
            Self::FixRejected { .. } => ErrorCode::FixRejected,
            Self::RescueFailed { .. } => ErrorCode::RescueFailed,
            Self::JudgeUnparseable { .. } => ErrorCode::JudgeUnparseable,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Operator-facing next steps recorded alongside the error.
    #[must_use]
    pub fn hints(&self) -> Vec<String> {
        match self {
            Self::MissingInput { .. } | Self::MalformedInput { .. } => {
                vec!["Re-run the stage that produces this input".to_string()]
            }
            Self::Gateway { source, .. } => match source {
                LlmError::BudgetExceeded { .. } => vec![
                    "Raise [llm] max_calls or SCRIPTLINE_LLM_BUDGET, then re-run".to_string(),
                ],
                LlmError::ProviderAuth(_) | LlmError::Misconfiguration(_) => {
                    vec!["Fix the [llm] configuration or API key, then re-run".to_string()]
                }
                _ => vec!["Re-run the stage; the job resumes here".to_string()],
            },
            Self::EmptyContent { .. } => vec!["Re-run the stage to request new content".to_string()],
            Self::AwaitingExternal { entry } => vec![
                format!("Fill in \"content\" in {entry}"),
                "Set \"status\" to \"ready\" and re-run the stage".to_string(),
            ],
            Self::AwaitingApproval { path } => vec![
                format!("Review {path}"),
                "Move it over the canonical output and run 'scriptline reconcile'".to_string(),
            ],
            Self::ValidationFailed { .. } | Self::Placeholder { .. } => {
                vec!["Edit the output by hand or reset the stage and regenerate".to_string()]
            }
            Self::ConvergenceExhausted { must_fix, .. } => {
                let mut hints: Vec<String> =
                    must_fix.iter().map(|item| format!("Must fix: {item}")).collect();
                hints.push(
                    "Raise [quality_gate] max_rounds or enable rebuild, then re-run".to_string(),
                );
                hints
            }
            Self::FixRejected { .. } => {
                vec!["Re-run the stage; the fix will be requested again".to_string()]
            }
            Self::RescueFailed { .. } => vec![
                "Check [validator] min_chars/max_chars against the draft size".to_string(),
                "Raise [quality_gate] rescue_passes, then re-run".to_string(),
            ],
            Self::JudgeUnparseable { .. } => {
                vec!["Check the judge task routing in [llm.tasks.judge]".to_string()]
            }
            Self::Internal(_) => Vec::new(),
        }
    }

    /// Validator issues carried by the error, if any.
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        match self {
            Self::ValidationFailed { issues, .. }
            | Self::FixRejected { issues }
            | Self::RescueFailed { issues, .. } => issues,
            _ => &[],
        }
    }
}

impl From<LlmError> for StageError {
    fn from(source: LlmError) -> Self {
        Self::Gateway {
            task: String::new(),
            source,
        }
    }
}

/// Errors surfaced to the engine's caller.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Gateway(#[from] LlmError),

    #[error(transparent)]
    JobKey(#[from] JobKeyError),

    #[error("Unknown stage '{stage}' (registry: {known})")]
    UnknownStage { stage: String, known: String },

    #[error("Failed to write {path}: {reason}")]
    Io { path: String, reason: String },
}

impl EngineError {
    #[must_use]
    pub fn to_exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) | Self::Registry(_) => ExitCode::CONFIG,
            Self::Status(StatusError::NotFound { .. }) => ExitCode::JOB_NOT_FOUND,
            Self::Status(_) | Self::Io { .. } => ExitCode::INTERNAL,
            Self::Lock(LockError::ConcurrentExecution { .. }) => ExitCode::LOCK_HELD,
            Self::Lock(_) => ExitCode::INTERNAL,
            Self::Gateway(_) => ExitCode::GATEWAY_FAILURE,
            Self::JobKey(_) | Self::UnknownStage { .. } => ExitCode::CLI_ARGS,
        }
    }
}

impl UserFriendlyError for EngineError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(e) => e.user_message(),
            Self::Status(e) => e.user_message(),
            Self::Gateway(e) => e.user_message(),
            Self::JobKey(e) => e.user_message(),
            _ => self.to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(e) => e.context(),
            Self::Status(e) => e.context(),
            Self::Gateway(e) => e.context(),
            Self::JobKey(e) => e.context(),
            Self::Lock(LockError::ConcurrentExecution { .. }) => {
                Some("Only one scriptline process may run stages of a job at a time.".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(e) => e.suggestions(),
            Self::Status(e) => e.suggestions(),
            Self::Gateway(e) => e.suggestions(),
            Self::JobKey(e) => e.suggestions(),
            Self::Registry(_) => {
                vec!["Fix [[pipeline.stages]] or remove it to use the default registry".to_string()]
            }
            Self::Lock(LockError::ConcurrentExecution { pid, .. }) => vec![
                format!("Wait for process {pid} to finish"),
                "Remove the job's .lock file if that process is gone".to_string(),
            ],
            Self::Lock(_) | Self::Io { .. } => {
                vec!["Check permissions on the scriptline home".to_string()]
            }
            Self::UnknownStage { .. } => {
                vec!["Run 'scriptline status <key>' to list the stages".to_string()]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::Registry(_) => ErrorCategory::Configuration,
            Self::Status(e) => e.category(),
            Self::Lock(_) => ErrorCategory::Concurrency,
            Self::Gateway(_) => ErrorCategory::Generation,
            Self::JobKey(_) | Self::UnknownStage { .. } => ErrorCategory::Validation,
            Self::Io { .. } => ErrorCategory::FileSystem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let not_found = EngineError::Status(StatusError::NotFound {
            key: "CH01-001".into(),
        });
        assert_eq!(not_found.to_exit_code(), ExitCode::JOB_NOT_FOUND);

        let held = EngineError::Lock(LockError::ConcurrentExecution {
            job: "CH01-001".into(),
            pid: 4242,
            created_ago: "3s".into(),
        });
        assert_eq!(held.to_exit_code(), ExitCode::LOCK_HELD);

        let unknown = EngineError::UnknownStage {
            stage: "mix".into(),
            known: "draft".into(),
        };
        assert_eq!(unknown.to_exit_code(), ExitCode::CLI_ARGS);
        assert_eq!(
            EngineError::Registry(RegistryError::Empty).to_exit_code(),
            ExitCode::CONFIG
        );
    }

    #[test]
    fn test_stage_error_codes_and_hints() {
        let waiting = StageError::AwaitingExternal {
            entry: "/tmp/cache/x.json".into(),
        };
        assert_eq!(waiting.code(), ErrorCode::AwaitingExternal);
        assert!(waiting.hints()[0].contains("/tmp/cache/x.json"));

        let exhausted = StageError::ConvergenceExhausted {
            rounds: 3,
            must_fix: vec!["tighten the ending".into()],
        };
        assert_eq!(exhausted.code(), ErrorCode::ConvergenceExhausted);
        assert_eq!(exhausted.hints()[0], "Must fix: tighten the ending");

        let budget = StageError::from(LlmError::BudgetExceeded {
            limit: 1,
            attempted: 2,
        });
        assert_eq!(budget.code(), ErrorCode::GatewayFailure);
        assert!(budget.hints()[0].contains("max_calls"));
    }
}
