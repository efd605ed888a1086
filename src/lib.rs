//! scriptline - resumable multi-stage script generation with a bounded quality gate
//!
//! A job (identified by a channel and video number, e.g. `CH01-012`) moves
//! through an ordered registry of stages: research, outline, draft, the
//! quality-gated script and the rendered narration. Every transition is
//! persisted, so any command can be re-run after a crash and picks up from
//! the recorded state.
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! scriptline init CH01-012 --title "The harbour"
//! scriptline run-all CH01-012
//! scriptline status CH01-012 --json
//! ```
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use scriptline::{Config, JobKey, JobMetadata, Orchestrator};
//!
//! # async fn demo() -> Result<(), scriptline::EngineError> {
//! let orchestrator = Orchestrator::from_config(Config::default())?;
//! let key: JobKey = "CH01-012".parse()?;
//! orchestrator.init(&key, JobMetadata::default(), false)?;
//! let report = orchestrator.run_until_done_or_stuck(&key, 20).await?;
//! println!("{}", report.job.status);
//! # Ok(())
//! # }
//! ```
//!
//! # JSON output
//!
//! Commands run with `--json` print JCS (RFC 8785) canonical JSON; use
//! [`emit_jcs`] for the same form in your own integrations.

pub mod cli;

pub use scriptline_config::{
    ApplyMode, CliArgs, Config, ConfigBuilder, ConfigError, ProviderKind, StageDefinition,
    StageKind,
};
pub use scriptline_engine::{
    EngineError, NextStep, Orchestrator, ReconcileReport, ResetScope, RunReport, StageOutcome,
    StageRegistry, StageRun, StopReason,
};
pub use scriptline_llm::{GenerationGateway, LlmError};
pub use scriptline_status::{ErrorCode, Job, JobMetadata, JobStatus, StageState, StageStatus};
pub use scriptline_utils::{
    ErrorCategory, ExitCode, JobKey, UserFriendlyError, display_for_user, emit_jcs,
};
pub use scriptline_validation::{ValidationReport, ValidatorConfig, validate};
