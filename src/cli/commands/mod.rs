//! CLI command implementations.
//!
//! Each command returns the exit code it wants on success; failures are
//! propagated as `anyhow::Error` and reported by `run`.

mod job;
mod output;
mod stage;
mod validate;

use std::sync::Arc;

use scriptline_config::Config;
use scriptline_engine::{EngineError, Orchestrator};
use scriptline_llm::ManualGateway;
use scriptline_utils::JobKey;

pub use job::{
    InitOptions, execute_init_command, execute_reconcile_command, execute_reset_command,
    execute_status_command,
};
pub use stage::{execute_next_command, execute_run_all_command, execute_run_command};
pub use validate::execute_validate_command;

/// Settings shared by every command.
pub struct CommandContext {
    pub config: Config,
    pub json: bool,
    pub force_lock: bool,
}

impl CommandContext {
    /// Orchestrator backed by the configured gateway.
    pub(crate) fn orchestrator(&self) -> Result<Orchestrator, EngineError> {
        Ok(Orchestrator::from_config(self.config.clone())?.with_force_lock(self.force_lock))
    }

    /// Orchestrator for commands that never generate, so a missing API key
    /// does not get in the way of status or repair.
    pub(crate) fn offline_orchestrator(&self) -> Result<Orchestrator, EngineError> {
        Ok(Orchestrator::new(self.config.clone(), Arc::new(ManualGateway))?
            .with_force_lock(self.force_lock))
    }
}

pub(crate) fn parse_key(raw: &str) -> Result<JobKey, EngineError> {
    Ok(raw.parse::<JobKey>()?)
}
