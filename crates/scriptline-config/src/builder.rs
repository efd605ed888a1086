use camino::Utf8PathBuf;

use scriptline_utils::error::ConfigError;

use crate::model::{ApplyMode, Config, ConfigSource, ProviderKind};
use crate::stages::StageDefinition;

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// ```rust,no_run
    /// use scriptline_config::{Config, ProviderKind};
    ///
    /// let config = Config::builder()
    ///     .home("/tmp/scriptline")
    ///     .provider(ProviderKind::Stub)
    ///     .char_limits(1000, 1600)
    ///     .max_rounds(3)
    ///     .build()
    ///     .expect("valid config");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Fluent construction of a [`Config`] without reading files or the
/// environment. Every value set here is attributed to
/// [`ConfigSource::Programmatic`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

macro_rules! setter {
    ($(#[$doc:meta])* $name:ident: $ty:ty => $section:ident . $field:ident) => {
        $(#[$doc])*
        #[must_use]
        pub fn $name(mut self, value: $ty) -> Self {
            self.config.$section.$field = value.into();
            self.config.attribute(
                concat!(stringify!($section), ".", stringify!($field)),
                ConfigSource::Programmatic,
            );
            self
        }
    };
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State directory; overrides `SCRIPTLINE_HOME`.
    #[must_use]
    pub fn home(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.config.home = Some(path.into());
        self.config
            .attribute("defaults.home", ConfigSource::Programmatic);
        self
    }

    setter!(provider: ProviderKind => llm.provider);
    setter!(max_calls: u32 => llm.max_calls);
    setter!(timeout_seconds: u64 => llm.timeout_seconds);
    setter!(max_iterations: u32 => defaults.max_iterations);
    setter!(verbose: bool => defaults.verbose);
    setter!(
        /// Judge rounds, `1..=9`.
        max_rounds: u32 => quality_gate.max_rounds
    );
    setter!(rescue_passes: u32 => quality_gate.rescue_passes);
    setter!(rebuild: bool => quality_gate.rebuild);
    setter!(rebuild_sections: usize => quality_gate.rebuild_sections);
    setter!(apply_mode: ApplyMode => quality_gate.apply_mode);
    setter!(snapshots: bool => quality_gate.snapshots);
    setter!(error_ratio: f64 => validator.error_ratio);
    setter!(marker: &str => validator.marker);

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.model = Some(model.into());
        self.config.attribute("llm.model", ConfigSource::Programmatic);
        self
    }

    /// Counted-character band for the validator.
    #[must_use]
    pub fn char_limits(mut self, min_chars: usize, max_chars: usize) -> Self {
        self.config.validator.min_chars = min_chars;
        self.config.validator.max_chars = max_chars;
        self.config
            .attribute("validator.min_chars", ConfigSource::Programmatic);
        self.config
            .attribute("validator.max_chars", ConfigSource::Programmatic);
        self
    }

    #[must_use]
    pub fn skip(mut self, stages: &[&str]) -> Self {
        self.config.pipeline.skip = stages.iter().map(ToString::to_string).collect();
        self.config
            .attribute("pipeline.skip", ConfigSource::Programmatic);
        self
    }

    #[must_use]
    pub fn transforms(mut self, names: &[&str]) -> Self {
        self.config.pipeline.transforms = names.iter().map(ToString::to_string).collect();
        self.config
            .attribute("pipeline.transforms", ConfigSource::Programmatic);
        self
    }

    #[must_use]
    pub fn stages(mut self, stages: Vec<StageDefinition>) -> Self {
        self.config.pipeline.stages = Some(stages);
        self.config
            .attribute("pipeline.stages", ConfigSource::Programmatic);
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_attributes_programmatic() {
        let config = Config::builder()
            .provider(ProviderKind::Stub)
            .char_limits(200, 400)
            .max_rounds(2)
            .apply_mode(ApplyMode::Propose)
            .marker("***")
            .build()
            .unwrap();

        assert_eq!(config.llm.provider, ProviderKind::Stub);
        assert_eq!(config.validator.max_chars, 400);
        assert_eq!(config.validator.marker, "***");
        assert_eq!(config.quality_gate.max_rounds, 2);
        assert_eq!(config.source_of("quality_gate.max_rounds").label(), "programmatic");
        assert_eq!(config.source_of("llm.max_calls").label(), "default");
    }

    #[test]
    fn test_builder_validates() {
        let err = Config::builder().char_limits(500, 100).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
