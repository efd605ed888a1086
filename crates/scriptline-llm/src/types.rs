//! Core types for the generation gateway abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use scriptline_utils::error::LlmError;

/// Task names the engine calls under. Routing in `[llm.tasks.<task>]` keys
/// off these, and generation stages add their own stage task names.
pub mod tasks {
    pub const JUDGE: &str = "judge";
    pub const FIX: &str = "fix";
    pub const EXTEND: &str = "rescue_extend";
    pub const EXPAND: &str = "rescue_expand";
    pub const SHRINK: &str = "rescue_shrink";
    pub const REBUILD_SECTION: &str = "rebuild_section";
}

/// Metadata key carrying the structural marker, for gateways that generate
/// marker-delimited text themselves.
pub const MARKER_METADATA: &str = "marker";

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Per-call knobs resolved from task routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    /// `None` uses the gateway's default model
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Counted-character size the caller is aiming for, as a hint
    pub target_chars: Option<usize>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: None,
            temperature: None,
            timeout: Duration::from_secs(120),
            target_chars: None,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Input to a gateway call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub task: String,
    pub messages: Vec<Message>,
    pub options: CallOptions,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(task: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            task: task.into(),
            messages,
            options: CallOptions::default(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_target_chars(mut self, target: usize) -> Self {
        self.options.target_chars = Some(target);
        self
    }

    /// String metadata value, if present.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of a gateway call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Provider-specific extensions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Generation {
    #[must_use]
    pub fn new(
        content: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            provider: provider.into(),
            model: model.into(),
            usage: None,
            extensions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(Usage {
            input_tokens,
            output_tokens,
        });
        self
    }
}

/// The boundary to the external generative-text service.
///
/// Every provider, offline stub and test double implements this trait, so the
/// orchestrator never knows which one it is talking to.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Run one generation.
    ///
    /// # Errors
    ///
    /// Returns `LlmError` for transport and provider failures, timeouts,
    /// budget exhaustion, and `Deferred` when an operator has to answer.
    async fn call(&self, request: GenerationRequest) -> Result<Generation, LlmError>;
}
