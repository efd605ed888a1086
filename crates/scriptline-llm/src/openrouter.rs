//! OpenRouter (OpenAI-compatible chat completions) gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use scriptline_config::Config;
use scriptline_utils::error::LlmError;

use crate::anthropic::HttpParams;
use crate::http_client::HttpClient;
use crate::types::{Generation, GenerationGateway, GenerationRequest, Message, Role};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
const DEFAULT_REFERER: &str = "https://github.com/EffortlessMetrics/scriptline";
const DEFAULT_TITLE: &str = "scriptline";

#[derive(Clone)]
pub struct OpenRouterGateway {
    client: HttpClient,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

impl std::fmt::Debug for OpenRouterGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterGateway")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl OpenRouterGateway {
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let api_key_env = config
            .llm
            .api_key_env
            .as_deref()
            .unwrap_or(DEFAULT_API_KEY_ENV);
        let api_key = std::env::var(api_key_env).map_err(|_| {
            LlmError::Misconfiguration(format!(
                "OpenRouter API key not found in environment variable '{api_key_env}'."
            ))
        })?;
        let default_model = config.llm.model.clone().ok_or_else(|| {
            LlmError::Misconfiguration(
                "OpenRouter model not specified. Set [llm] model = \"vendor/model\".".to_string(),
            )
        })?;

        Ok(Self {
            client: HttpClient::new()?,
            base_url: config
                .llm
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model,
            default_params: HttpParams {
                max_tokens: config.llm.max_tokens,
                ..HttpParams::default()
            },
        })
    }

    fn convert_messages(messages: &[Message]) -> Vec<OpenAiMessage<'_>> {
        messages
            .iter()
            .map(|msg| OpenAiMessage {
                role: match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &msg.content,
            })
            .collect()
    }
}

#[async_trait]
impl GenerationGateway for OpenRouterGateway {
    async fn call(&self, request: GenerationRequest) -> Result<Generation, LlmError> {
        let model = request
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        debug!(
            provider = "openrouter",
            task = %request.task,
            model = %model,
            "Calling OpenRouter"
        );

        let body = OpenRouterRequest {
            model: &model,
            messages: Self::convert_messages(&request.messages),
            max_tokens: request
                .options
                .max_tokens
                .unwrap_or(self.default_params.max_tokens),
            temperature: request
                .options
                .temperature
                .unwrap_or(self.default_params.temperature),
            stream: false,
        };

        let http = self
            .client
            .client()
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", DEFAULT_REFERER)
            .header("X-Title", DEFAULT_TITLE)
            .json(&body);

        let response = self
            .client
            .execute_with_retry(http, request.options.timeout, "openrouter")
            .await?;

        let parsed: OpenRouterResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("Failed to parse OpenRouter response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Transport("OpenRouter response missing choices[0]".to_string()))?;

        let mut generation = Generation::new(
            choice.message.content.unwrap_or_default(),
            "openrouter",
            parsed.model.unwrap_or(model),
        );
        if let Some(usage) = parsed.usage {
            generation = generation.with_usage(usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(generation)
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenRouterRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    usage: Option<OpenRouterUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
