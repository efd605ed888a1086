use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use strum::{AsRefStr, Display, EnumString};

use scriptline_validation::{DEFAULT_TRANSFORMS, ValidatorConfig};

use crate::stages::StageDefinition;

/// Source of a configuration value.
///
/// Precedence: CLI arguments > environment > config file > programmatic > defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env,
    ConfigFile(PathBuf),
    Programmatic,
    Defaults,
}

impl ConfigSource {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Env => "env",
            Self::ConfigFile(_) => "config",
            Self::Programmatic => "programmatic",
            Self::Defaults => "default",
        }
    }
}

/// Resolved configuration for scriptline operations.
///
/// Use [`Config::discover`] for CLI behavior, or [`Config::builder`] when the
/// caller wants a deterministic config independent of the environment.
///
/// ```toml
/// [defaults]
/// max_iterations = 20
///
/// [llm]
/// provider = "anthropic"
/// model = "claude-sonnet-4-5"
/// api_key_env = "ANTHROPIC_API_KEY"
///
/// [llm.tasks.judge]
/// temperature = 0.0
///
/// [validator]
/// min_chars = 1000
/// max_chars = 1600
///
/// [quality_gate]
/// max_rounds = 3
/// apply_mode = "propose"
///
/// [pipeline]
/// skip = ["research"]
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub defaults: Defaults,
    pub llm: LlmConfig,
    pub validator: ValidatorConfig,
    pub quality_gate: QualityGateConfig,
    pub pipeline: PipelineConfig,
    /// Explicit home directory; `None` defers to `SCRIPTLINE_HOME` / `.scriptline`
    pub home: Option<Utf8PathBuf>,
    /// Where each effective value came from, keyed by dotted path (`validator.min_chars`)
    pub source_attribution: BTreeMap<String, ConfigSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            llm: LlmConfig::default(),
            validator: ValidatorConfig::default(),
            quality_gate: QualityGateConfig::default(),
            pipeline: PipelineConfig::default(),
            home: None,
            source_attribution: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Home directory in effect for this config.
    #[must_use]
    pub fn home_dir(&self) -> Utf8PathBuf {
        self.home
            .clone()
            .unwrap_or_else(scriptline_utils::paths::scriptline_home)
    }

    /// Source of a key, `Defaults` when never overridden.
    #[must_use]
    pub fn source_of(&self, key: &str) -> &ConfigSource {
        self.source_attribution
            .get(key)
            .unwrap_or(&ConfigSource::Defaults)
    }

    pub(crate) fn attribute(&mut self, key: &str, source: ConfigSource) {
        self.source_attribution.insert(key.to_string(), source);
    }

    /// Relative job paths resolve against this home.
    #[must_use]
    pub fn with_home(mut self, home: &Utf8Path) -> Self {
        self.home = Some(home.to_path_buf());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    /// Upper bound on `run-all` iterations
    pub max_iterations: u32,
    pub verbose: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            verbose: false,
        }
    }
}

/// Generation providers the factory knows how to build.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    Openrouter,
    /// Deterministic offline generator
    Stub,
    /// Every call is deferred to an operator through the artifact cache
    Manual,
}

/// Per-task routing injected into gateway calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRoute {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    /// Provider default when unset
    pub model: Option<String>,
    pub timeout_seconds: u64,
    /// Call budget per process
    pub max_calls: u32,
    pub base_url: Option<String>,
    /// Environment variable holding the API key; provider default when unset
    pub api_key_env: Option<String>,
    pub max_tokens: u32,
    pub tasks: BTreeMap<String, TaskRoute>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            timeout_seconds: 120,
            max_calls: 200,
            base_url: None,
            api_key_env: None,
            max_tokens: 4096,
            tasks: BTreeMap::new(),
        }
    }
}

impl LlmConfig {
    /// Routing for `task`, falling back to the section defaults.
    #[must_use]
    pub fn route(&self, task: &str) -> TaskRoute {
        let route = self.tasks.get(task);
        TaskRoute {
            model: route
                .and_then(|r| r.model.clone())
                .or_else(|| self.model.clone()),
            max_tokens: route.and_then(|r| r.max_tokens).or(Some(self.max_tokens)),
            temperature: route.and_then(|r| r.temperature),
        }
    }
}

/// Whether the quality gate overwrites the canonical artifact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ApplyMode {
    /// Write the canonical output once validator and judge both pass
    #[default]
    Apply,
    /// Write `<output>.proposed` and wait for an operator
    Propose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityGateConfig {
    /// Judge rounds; fix calls are bounded by `max_rounds - 1`
    pub max_rounds: u32,
    /// Rescue passes per rescue invocation
    pub rescue_passes: u32,
    /// Allow one rebuild from a section plan after rounds run out
    pub rebuild: bool,
    pub rebuild_sections: usize,
    pub apply_mode: ApplyMode,
    /// Write each round's candidate under `<job>/gate/`
    pub snapshots: bool,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            rescue_passes: 3,
            rebuild: false,
            rebuild_sections: 4,
            apply_mode: ApplyMode::Apply,
            snapshots: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Stage names marked completed-and-skipped when reached
    pub skip: Vec<String>,
    /// Transforms for generate stages that do not name their own
    pub transforms: Vec<String>,
    /// Full registry override; `None` uses the built-in stages
    pub stages: Option<Vec<StageDefinition>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip: Vec::new(),
            transforms: DEFAULT_TRANSFORMS.iter().map(ToString::to_string).collect(),
            stages: None,
        }
    }
}

/// CLI arguments relevant to configuration.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub verbose: Option<bool>,
    pub max_iterations: Option<u32>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub min_chars: Option<usize>,
    pub max_chars: Option<usize>,
    pub max_rounds: Option<u32>,
    pub apply_mode: Option<ApplyMode>,
    pub skip: Vec<String>,
}
