//! Anthropic Messages API gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use scriptline_config::Config;
use scriptline_utils::error::LlmError;

use crate::http_client::HttpClient;
use crate::types::{Generation, GenerationGateway, GenerationRequest, Message, Role};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Sampling defaults when neither the request nor task routing set them.
#[derive(Debug, Clone)]
pub(crate) struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

#[derive(Clone)]
pub struct AnthropicGateway {
    client: HttpClient,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

impl std::fmt::Debug for AnthropicGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicGateway")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl AnthropicGateway {
    pub(crate) fn new(
        api_key: String,
        base_url: Option<String>,
        default_model: String,
        default_params: HttpParams,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: HttpClient::new()?,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model,
            default_params,
        })
    }

    /// Build from `[llm]`; the API key is read from `api_key_env`
    /// (`ANTHROPIC_API_KEY` by default).
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let api_key_env = config
            .llm
            .api_key_env
            .as_deref()
            .unwrap_or(DEFAULT_API_KEY_ENV);
        let api_key = std::env::var(api_key_env).map_err(|_| {
            LlmError::Misconfiguration(format!(
                "Anthropic API key not found in environment variable '{api_key_env}'. \
                 Set it or point [llm] api_key_env at another variable."
            ))
        })?;

        let default_model = config.llm.model.clone().ok_or_else(|| {
            LlmError::Misconfiguration(
                "Anthropic model not specified. Set [llm] model = \"model-name\".".to_string(),
            )
        })?;

        let default_params = HttpParams {
            max_tokens: config.llm.max_tokens,
            ..HttpParams::default()
        };

        Self::new(
            api_key,
            config.llm.base_url.clone(),
            default_model,
            default_params,
        )
    }

    /// System messages go in the top-level `system` field; the rest stay in order.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_prompt: Option<String> = None;
        let mut out = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => match system_prompt.as_mut() {
                    Some(existing) => {
                        existing.push_str("\n\n");
                        existing.push_str(&msg.content);
                    }
                    None => system_prompt = Some(msg.content.clone()),
                },
                Role::User => out.push(AnthropicMessage {
                    role: "user",
                    content: msg.content.clone(),
                }),
                Role::Assistant => out.push(AnthropicMessage {
                    role: "assistant",
                    content: msg.content.clone(),
                }),
            }
        }

        (system_prompt, out)
    }
}

#[async_trait]
impl GenerationGateway for AnthropicGateway {
    async fn call(&self, request: GenerationRequest) -> Result<Generation, LlmError> {
        let model = request
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let max_tokens = request
            .options
            .max_tokens
            .unwrap_or(self.default_params.max_tokens);
        let temperature = request
            .options
            .temperature
            .unwrap_or(self.default_params.temperature);

        debug!(
            provider = "anthropic",
            task = %request.task,
            model = %model,
            max_tokens,
            timeout_secs = request.options.timeout.as_secs(),
            "Calling Anthropic"
        );

        let (system, messages) = Self::convert_messages(&request.messages);
        let body = AnthropicRequest {
            model: &model,
            messages,
            max_tokens,
            temperature,
            system,
        };

        let http = self
            .client
            .client()
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let response = self
            .client
            .execute_with_retry(http, request.options.timeout, "anthropic")
            .await?;

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("Failed to parse Anthropic response: {e}")))?;

        let content: String = parsed
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        let mut generation = Generation::new(content, "anthropic", parsed.model.unwrap_or(model));
        if let Some(usage) = parsed.usage {
            generation = generation.with_usage(usage.input_tokens, usage.output_tokens);
        }
        if let Some(stop) = parsed.stop_reason {
            generation
                .extensions
                .insert("stop_reason".to_string(), serde_json::Value::String(stop));
        }
        Ok(generation)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_system_messages_are_lifted() {
        let (system, messages) = AnthropicGateway::convert_messages(&[
            Message::system("Be brief."),
            Message::user("Write."),
            Message::system("No lists."),
            Message::assistant("Draft"),
        ]);
        assert_eq!(system.as_deref(), Some("Be brief.\n\nNo lists."));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
    }

    #[test]
    fn test_response_text_blocks_parse() {
        let parsed: AnthropicResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Hello"},{"type":"tool_use"}],
                "model":"m","stop_reason":"end_turn",
                "usage":{"input_tokens":3,"output_tokens":5}}"#,
        )
        .unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert_eq!(parsed.usage.unwrap().output_tokens, 5);
    }

    #[test]
    #[serial]
    fn test_missing_api_key_is_misconfiguration() {
        let mut config = Config::default();
        config.llm.api_key_env = Some("SCRIPTLINE_TEST_ABSENT_KEY".to_string());
        config.llm.model = Some("m".to_string());
        let err = AnthropicGateway::from_config(&config).unwrap_err();
        assert!(matches!(err, LlmError::Misconfiguration(msg) if msg.contains("SCRIPTLINE_TEST_ABSENT_KEY")));
    }
}
