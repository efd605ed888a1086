//! Generation gateway abstraction
//!
//! Every provider implements [`GenerationGateway`], so the orchestrator can be
//! handed any of them (or a test double) without knowing which it got.

mod anthropic;
mod budgeted;
pub(crate) mod http_client;
mod manual;
mod openrouter;
mod scripted;
mod stub;
mod types;

use std::sync::Arc;
use tracing::info;

pub use anthropic::AnthropicGateway;
pub use budgeted::{BUDGET_ENV_VAR, BudgetedGateway};
pub use manual::ManualGateway;
pub use openrouter::OpenRouterGateway;
pub use scripted::ScriptedGateway;
pub use stub::StubGateway;
pub use types::{
    CallOptions, Generation, GenerationGateway, GenerationRequest, MARKER_METADATA, Message, Role,
    Usage, tasks,
};

pub use scriptline_utils::error::LlmError;

use scriptline_config::{Config, ProviderKind};

/// Build the configured gateway, wrapped in a [`BudgetedGateway`].
///
/// # Errors
///
/// Returns `LlmError::Misconfiguration` when a provider's API key or model
/// is missing or its HTTP client cannot be built.
pub fn gateway_from_config(config: &Config) -> Result<Arc<dyn GenerationGateway>, LlmError> {
    let inner: Arc<dyn GenerationGateway> = match config.llm.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicGateway::from_config(config)?),
        ProviderKind::Openrouter => Arc::new(OpenRouterGateway::from_config(config)?),
        ProviderKind::Stub => Arc::new(StubGateway::new()),
        ProviderKind::Manual => Arc::new(ManualGateway),
    };

    info!(provider = %config.llm.provider, "Generation gateway ready");
    Ok(Arc::new(BudgetedGateway::with_limit_from_config(
        inner,
        config.llm.max_calls,
    )))
}
