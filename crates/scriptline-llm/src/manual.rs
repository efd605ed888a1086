use async_trait::async_trait;

use scriptline_utils::error::LlmError;

use crate::types::{Generation, GenerationGateway, GenerationRequest};

/// Defers every call to an operator.
///
/// The generate handler answers `Deferred` by writing a pending artifact-cache
/// entry that holds the request; an operator fills in the content and marks
/// it ready, and the next run consumes it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualGateway;

#[async_trait]
impl GenerationGateway for ManualGateway {
    async fn call(&self, request: GenerationRequest) -> Result<Generation, LlmError> {
        Err(LlmError::Deferred(format!(
            "task '{}' awaits an operator-supplied result",
            request.task
        )))
    }
}
