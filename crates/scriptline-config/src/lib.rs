//! Configuration management for scriptline
//!
//! Hierarchical configuration with discovery and precedence:
//! CLI > environment > config file > defaults. The TOML file carries
//! `[defaults]`, `[llm]`, `[validator]`, `[quality_gate]` and `[pipeline]`
//! sections.

mod builder;
mod discovery;
mod model;
mod sources;
mod stages;
mod validation;

pub use builder::ConfigBuilder;
pub use discovery::{CONFIG_DIR, CONFIG_FILE, PROVIDER_ENV};
pub use model::{
    ApplyMode, CliArgs, Config, ConfigSource, Defaults, LlmConfig, PipelineConfig, ProviderKind,
    QualityGateConfig, TaskRoute,
};
pub use stages::{OutputSpec, StageDefinition, StageKind};

pub use scriptline_utils::error::ConfigError;
pub use scriptline_validation::ValidatorConfig;
