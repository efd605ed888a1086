//! Error categories and the errors shared across crate boundaries.
//!
//! Crate-local failures (`StatusError`, `StageError`, `EngineError`, ...) live
//! next to the code that raises them. The two kinds that several crates need
//! to agree on, configuration and generation-gateway failures, live here.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Trait for errors that can explain themselves to an operator.
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    StageExecution,
    Generation,
    FileSystem,
    Concurrency,
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::StageExecution => write!(f, "Stage Execution"),
            Self::Generation => write!(f, "Generation"),
            Self::FileSystem => write!(f, "File System"),
            Self::Concurrency => write!(f, "Concurrency"),
            Self::Validation => write!(f, "Validation"),
        }
    }
}

/// Render an error with its context and suggestions for terminal output.
#[must_use]
pub fn display_for_user<E: UserFriendlyError + ?Sized>(err: &E) -> String {
    let mut output = format!("Error: {}\n", err.user_message());

    if let Some(ctx) = err.context() {
        output.push_str(&format!("\nContext: {ctx}\n"));
    }

    let suggestions = err.suggestions();
    if !suggestions.is_empty() {
        output.push_str("\nSuggestions:\n");
        for suggestion in suggestions {
            output.push_str(&format!("  • {suggestion}\n"));
        }
    }

    output
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Unknown text transform '{0}'")]
    UnknownTransform(String),

    #[error("Invalid stage registry: {0}")]
    InvalidRegistry(String),
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(msg) => format!("The configuration file could not be parsed: {msg}"),
            Self::InvalidValue { key, value } => {
                format!("Configuration key '{key}' has an invalid value: {value}")
            }
            Self::NotFound { path } => format!("No configuration file at {path}"),
            Self::UnknownTransform(name) => format!("'{name}' is not a known text transform"),
            Self::InvalidRegistry(msg) => format!("The stage registry is invalid: {msg}"),
        }
    }

    fn context(&self) -> Option<String> {
        Some(
            "Configuration is read from --config or the nearest .scriptline/config.toml; \
             CLI flags override file values, which override built-in defaults."
                .to_string(),
        )
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec![
                "Check the TOML syntax of the configuration file".to_string(),
                "Remove unknown sections; see the documented [llm], [validator], [quality_gate] and [pipeline] tables".to_string(),
            ],
            Self::InvalidValue { key, .. } => vec![format!("Correct the value of '{key}'")],
            Self::NotFound { .. } => vec![
                "Pass an existing file with --config".to_string(),
                "Or drop --config to fall back to discovery and defaults".to_string(),
            ],
            Self::UnknownTransform(_) => vec![
                "Valid transforms: normalize_line_endings, strip_code_fences, strip_headings, strip_list_markers, strip_urls, strip_footnotes, isolate_markers, trim_trailing_whitespace, collapse_blank_lines, markers_to_pauses".to_string(),
            ],
            Self::InvalidRegistry(_) => vec![
                "Give every [[pipeline.stages]] entry a unique name and at least one output".to_string(),
                "Remove [[pipeline.stages]] to use the default registry".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Failures raised by a generation gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Transport-level failure (HTTP connectivity, malformed response body)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("Provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider service outage (5xx errors)
    #[error("Provider outage: {0}")]
    ProviderOutage(String),

    /// Invocation timed out
    #[error("Timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Budget limit exceeded
    #[error("Budget exceeded: attempted {attempted} calls, limit is {limit}")]
    BudgetExceeded { limit: u32, attempted: u32 },

    /// The gateway will not answer now; an operator has to supply the result.
    #[error("Deferred: {0}")]
    Deferred(String),

    /// Configuration error
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    /// Unsupported feature or provider
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl UserFriendlyError for LlmError {
    fn user_message(&self) -> String {
        match self {
            Self::Transport(msg) => format!("Generation transport error: {msg}"),
            Self::ProviderAuth(msg) => format!("Generation provider authentication failed: {msg}"),
            Self::ProviderQuota(msg) => format!("Generation provider quota exceeded: {msg}"),
            Self::ProviderOutage(msg) => format!("Generation provider service outage: {msg}"),
            Self::Timeout { duration } => format!("Generation call timed out after {duration:?}"),
            Self::BudgetExceeded { limit, attempted } => {
                format!("Generation budget exceeded: attempted {attempted} calls, limit is {limit}")
            }
            Self::Deferred(msg) => format!("Generation deferred to an operator: {msg}"),
            Self::Misconfiguration(msg) => format!("Generation configuration error: {msg}"),
            Self::Unsupported(msg) => format!("Generation feature not supported: {msg}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Transport(_) | Self::ProviderOutage(_) | Self::Timeout { .. } => Some(
                "The provider could not be reached or did not answer in time. The stage was left pending and can be re-run."
                    .to_string(),
            ),
            Self::ProviderAuth(_) => {
                Some("The provider rejected the configured credentials.".to_string())
            }
            Self::ProviderQuota(_) => Some("The provider is rate limiting requests.".to_string()),
            Self::BudgetExceeded { .. } => Some(
                "A per-process call budget protects against runaway quality-gate loops."
                    .to_string(),
            ),
            Self::Deferred(_) => Some(
                "Manual mode writes a pending cache entry for every request instead of calling a provider."
                    .to_string(),
            ),
            Self::Misconfiguration(_) | Self::Unsupported(_) => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Transport(_) | Self::ProviderOutage(_) | Self::Timeout { .. } => {
                vec!["Re-run the stage once the provider is reachable".to_string()]
            }
            Self::ProviderAuth(_) => vec![
                "Check that the API key environment variable named by [llm].api_key_env is set"
                    .to_string(),
            ],
            Self::ProviderQuota(_) => vec!["Wait for the quota window to reset".to_string()],
            Self::BudgetExceeded { .. } => vec![
                "Raise [llm].max_calls or set SCRIPTLINE_LLM_BUDGET".to_string(),
                "Lower [quality_gate].max_rounds".to_string(),
            ],
            Self::Deferred(_) => vec![
                "Fill in the pending cache entry's content, set its status to \"ready\" and re-run"
                    .to_string(),
            ],
            Self::Misconfiguration(_) => vec!["Review the [llm] section of config.toml".to_string()],
            Self::Unsupported(_) => {
                vec!["Use one of: anthropic, openrouter, stub, manual".to_string()]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_for_user_includes_suggestions() {
        let err = LlmError::BudgetExceeded {
            limit: 3,
            attempted: 4,
        };
        let rendered = display_for_user(&err);
        assert!(rendered.starts_with("Error: Generation budget exceeded"));
        assert!(rendered.contains("Context:"));
        assert!(rendered.contains("Suggestions:"));
        assert!(rendered.contains("SCRIPTLINE_LLM_BUDGET"));
    }

    #[test]
    fn test_config_error_category() {
        let err = ConfigError::UnknownTransform("shout".to_string());
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.user_message().contains("shout"));
    }
}
