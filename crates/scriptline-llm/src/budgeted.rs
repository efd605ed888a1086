//! Call-count budget around any gateway.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

use scriptline_utils::error::LlmError;

use crate::types::{Generation, GenerationGateway, GenerationRequest};

/// Environment variable overriding `[llm] max_calls`.
pub const BUDGET_ENV_VAR: &str = "SCRIPTLINE_LLM_BUDGET";

/// Enforces a limit on the number of gateway calls per process.
///
/// The budget counts attempted calls, not successful ones: a failed call
/// still consumes its slot, so retry loops cannot bypass the limit.
pub struct BudgetedGateway {
    inner: Arc<dyn GenerationGateway>,
    used: AtomicU32,
    limit: u32,
}

impl BudgetedGateway {
    pub fn new(inner: Arc<dyn GenerationGateway>, limit: u32) -> Self {
        debug!(limit, "Creating BudgetedGateway");
        Self {
            inner,
            used: AtomicU32::new(0),
            limit,
        }
    }

    /// Limit precedence: `SCRIPTLINE_LLM_BUDGET` > config value.
    pub fn with_limit_from_config(inner: Arc<dyn GenerationGateway>, config_limit: u32) -> Self {
        let env_limit = std::env::var(BUDGET_ENV_VAR)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok());
        match env_limit {
            Some(limit) => {
                debug!(limit, "Using budget limit from {}", BUDGET_ENV_VAR);
                Self::new(inner, limit)
            }
            None => Self::new(inner, config_limit),
        }
    }

    #[must_use]
    pub fn calls_made(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[async_trait]
impl GenerationGateway for BudgetedGateway {
    async fn call(&self, request: GenerationRequest) -> Result<Generation, LlmError> {
        // Count before calling so failed attempts are charged too
        let current = self.used.fetch_add(1, Ordering::SeqCst);
        if current >= self.limit {
            let attempted = current + 1;
            warn!(limit = self.limit, attempted, task = %request.task, "Generation budget exceeded");
            return Err(LlmError::BudgetExceeded {
                limit: self.limit,
                attempted,
            });
        }

        let result = self.inner.call(request).await;
        if let Err(e) = &result {
            debug!(
                call_count = current + 1,
                limit = self.limit,
                error = %e,
                "Inner gateway failed (budget slot still consumed)"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedGateway;
    use serial_test::serial;

    #[tokio::test]
    async fn test_budget_counts_failures_and_stops() {
        let scripted = Arc::new(ScriptedGateway::new());
        scripted.push_err("draft", LlmError::Transport("boom".into()));
        scripted.always("draft", "ok.");
        let budgeted = BudgetedGateway::new(scripted.clone(), 2);

        let req = || GenerationRequest::new("draft", Vec::new());
        assert!(budgeted.call(req()).await.is_err());
        assert!(budgeted.call(req()).await.is_ok());
        let err = budgeted.call(req()).await.unwrap_err();
        assert_eq!(
            err,
            LlmError::BudgetExceeded {
                limit: 2,
                attempted: 3
            }
        );
        assert_eq!(scripted.calls("draft"), 2);
        assert_eq!(budgeted.calls_made(), 3);
    }

    #[test]
    #[serial]
    fn test_env_overrides_config_limit() {
        let inner: Arc<dyn GenerationGateway> = Arc::new(ScriptedGateway::new());
        // SAFETY: serialized with every other env-mutating test
        unsafe { std::env::set_var(BUDGET_ENV_VAR, "7") };
        let from_env = BudgetedGateway::with_limit_from_config(inner.clone(), 50);
        unsafe { std::env::set_var(BUDGET_ENV_VAR, "not-a-number") };
        let from_config = BudgetedGateway::with_limit_from_config(inner, 50);
        unsafe { std::env::remove_var(BUDGET_ENV_VAR) };

        assert_eq!(from_env.limit(), 7);
        assert_eq!(from_config.limit(), 50);
    }
}
