//! Shared HTTP execution with retry for provider gateways.

use std::time::Duration;
use tracing::{debug, warn};

use scriptline_utils::error::LlmError;

/// Retries after the first attempt for 5xx and transport failures.
pub(crate) const MAX_RETRIES: u32 = 2;

const BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Longest slice of a provider error body carried into an error message.
const MAX_BODY_IN_ERROR: usize = 300;

#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    inner: reqwest::Client,
    backoff_step: Duration,
}

impl HttpClient {
    pub(crate) fn new() -> Result<Self, LlmError> {
        let inner = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            inner,
            backoff_step: BACKOFF_STEP,
        })
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Send `request`, retrying 5xx responses and transport errors up to
    /// [`MAX_RETRIES`] times with linear backoff. 4xx responses are final.
    pub(crate) async fn execute_with_retry(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
        provider: &str,
    ) -> Result<reqwest::Response, LlmError> {
        let mut attempt = 0u32;
        loop {
            let Some(this_try) = request.try_clone() else {
                return Self::send_once(request.timeout(timeout), timeout, provider).await;
            };

            match Self::send_once(this_try.timeout(timeout), timeout, provider).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < MAX_RETRIES && is_retryable(&err) => {
                    attempt += 1;
                    let delay = self.backoff_step * attempt;
                    warn!(
                        provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying provider request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(
        request: reqwest::RequestBuilder,
        timeout: Duration,
        provider: &str,
    ) -> Result<reqwest::Response, LlmError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout { duration: timeout }
            } else {
                LlmError::Transport(format!("{provider} request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(provider, status = status.as_u16(), "Provider responded");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status(status.as_u16(), &body, provider))
    }
}

fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::ProviderOutage(_) | LlmError::Transport(_) | LlmError::Timeout { .. }
    )
}

/// Map a non-success HTTP status to the error taxonomy.
pub(crate) fn map_status(status: u16, body: &str, provider: &str) -> LlmError {
    let snippet = truncate_body(body);
    match status {
        401 | 403 => LlmError::ProviderAuth(format!("{provider} returned {status}: {snippet}")),
        429 => LlmError::ProviderQuota(format!("{provider} returned 429: {snippet}")),
        400..=499 => {
            LlmError::Misconfiguration(format!("{provider} rejected the request ({status}): {snippet}"))
        }
        _ => LlmError::ProviderOutage(format!("{provider} returned {status}: {snippet}")),
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_IN_ERROR) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
impl HttpClient {
    pub(crate) fn with_backoff(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(map_status(401, "", "anthropic"), LlmError::ProviderAuth(_)));
        assert!(matches!(map_status(403, "", "anthropic"), LlmError::ProviderAuth(_)));
        assert!(matches!(map_status(429, "", "openrouter"), LlmError::ProviderQuota(_)));
        assert!(matches!(map_status(404, "", "openrouter"), LlmError::Misconfiguration(_)));
        assert!(matches!(map_status(503, "", "openrouter"), LlmError::ProviderOutage(_)));
    }

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(is_retryable(&LlmError::ProviderOutage("x".into())));
        assert!(is_retryable(&LlmError::Timeout {
            duration: Duration::from_secs(1)
        }));
        assert!(!is_retryable(&LlmError::ProviderAuth("x".into())));
        assert!(!is_retryable(&LlmError::ProviderQuota("x".into())));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "e".repeat(1000);
        let LlmError::ProviderOutage(msg) = map_status(500, &body, "anthropic") else {
            panic!("expected outage");
        };
        assert!(msg.len() < 400);
        assert!(msg.ends_with('…'));
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_after_retries() {
        let client = HttpClient::new()
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let request = client.client().post("http://127.0.0.1:9/unreachable");
        let err = client
            .execute_with_retry(request, Duration::from_secs(2), "test")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LlmError::Transport(_) | LlmError::Timeout { .. }
        ));
    }
}
