use scriptline_utils::error::ConfigError;
use scriptline_validation::TransformPipeline;

use crate::model::Config;

fn invalid(key: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    }
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.defaults.max_iterations == 0 || self.defaults.max_iterations > 1000 {
            return Err(invalid(
                "defaults.max_iterations",
                "must be between 1 and 1000",
            ));
        }

        let v = &self.validator;
        if v.max_chars == 0 {
            return Err(invalid("validator.max_chars", "must be greater than 0"));
        }
        if v.min_chars > v.max_chars {
            return Err(invalid(
                "validator.min_chars",
                format!(
                    "{} is greater than validator.max_chars ({})",
                    v.min_chars, v.max_chars
                ),
            ));
        }
        if !(0.0..=1.0).contains(&v.error_ratio) {
            return Err(invalid("validator.error_ratio", "must be within [0, 1]"));
        }
        if v.marker.trim().is_empty() || v.marker.contains(char::is_whitespace) {
            return Err(invalid(
                "validator.marker",
                "must be a non-empty token without whitespace",
            ));
        }
        if v.sentence_endings.is_empty() {
            return Err(invalid(
                "validator.sentence_endings",
                "must list at least one character",
            ));
        }

        let gate = &self.quality_gate;
        if !(1..=9).contains(&gate.max_rounds) {
            return Err(invalid(
                "quality_gate.max_rounds",
                format!("{} is outside 1..=9", gate.max_rounds),
            ));
        }
        if gate.rescue_passes > 10 {
            return Err(invalid(
                "quality_gate.rescue_passes",
                "exceeds maximum limit of 10",
            ));
        }
        if !(1..=20).contains(&gate.rebuild_sections) {
            return Err(invalid(
                "quality_gate.rebuild_sections",
                "must be between 1 and 20",
            ));
        }

        if self.llm.timeout_seconds == 0 || self.llm.timeout_seconds > 3600 {
            return Err(invalid(
                "llm.timeout_seconds",
                "must be between 1 and 3600",
            ));
        }
        if self.llm.max_calls == 0 {
            return Err(invalid("llm.max_calls", "must be greater than 0"));
        }
        if self.llm.max_tokens == 0 {
            return Err(invalid("llm.max_tokens", "must be greater than 0"));
        }
        for (task, route) in &self.llm.tasks {
            if let Some(t) = route.temperature
                && !(0.0..=2.0).contains(&t)
            {
                return Err(invalid(
                    &format!("llm.tasks.{task}.temperature"),
                    "must be within [0, 2]",
                ));
            }
        }

        TransformPipeline::from_names(&self.pipeline.transforms, &v.marker)?;
        if let Some(stages) = &self.pipeline.stages {
            if stages.is_empty() {
                return Err(ConfigError::InvalidRegistry(
                    "[[pipeline.stages]] is present but empty".to_string(),
                ));
            }
            for stage in stages {
                TransformPipeline::from_names(&stage.transforms, &v.marker)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_round_bounds() {
        let mut config = Config::default();
        config.quality_gate.max_rounds = 0;
        assert!(config.validate().is_err());
        config.quality_gate.max_rounds = 9;
        assert!(config.validate().is_ok());
        config.quality_gate.max_rounds = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_marker_must_be_a_token() {
        let mut config = Config::default();
        config.validator.marker = "- -".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "validator.marker"));
    }

    #[test]
    fn test_error_ratio_range() {
        let mut config = Config::default();
        config.validator.error_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_stage_override() {
        let mut config = Config::default();
        config.pipeline.stages = Some(Vec::new());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRegistry(_))
        ));
    }
}
