use std::collections::BTreeMap;

use crate::model::Config;

impl Config {
    /// Effective configuration as `key -> (value, source label)`, for status display.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let mut out = BTreeMap::new();
        let mut add = |key: &str, value: String| {
            let source = self.source_of(key).label().to_string();
            out.insert(key.to_string(), (value, source));
        };

        add("defaults.max_iterations", self.defaults.max_iterations.to_string());
        add("defaults.verbose", self.defaults.verbose.to_string());
        add("llm.provider", self.llm.provider.to_string());
        if let Some(model) = &self.llm.model {
            add("llm.model", model.clone());
        }
        add("llm.timeout_seconds", self.llm.timeout_seconds.to_string());
        add("llm.max_calls", self.llm.max_calls.to_string());
        add("validator.min_chars", self.validator.min_chars.to_string());
        add("validator.max_chars", self.validator.max_chars.to_string());
        add("validator.error_ratio", self.validator.error_ratio.to_string());
        add("validator.marker", self.validator.marker.clone());
        add("quality_gate.max_rounds", self.quality_gate.max_rounds.to_string());
        add(
            "quality_gate.rescue_passes",
            self.quality_gate.rescue_passes.to_string(),
        );
        add("quality_gate.rebuild", self.quality_gate.rebuild.to_string());
        add(
            "quality_gate.apply_mode",
            self.quality_gate.apply_mode.to_string(),
        );
        add("pipeline.skip", self.pipeline.skip.join(", "));
        add("pipeline.transforms", self.pipeline.transforms.join(", "));
        add(
            "pipeline.stages",
            if self.pipeline.stages.is_some() {
                "custom".to_string()
            } else {
                "built-in".to_string()
            },
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConfigSource;

    #[test]
    fn test_effective_config_labels_sources() {
        let mut config = Config::default();
        config.validator.min_chars = 10;
        config.attribute("validator.min_chars", ConfigSource::Cli);

        let effective = config.effective_config();
        assert_eq!(
            effective.get("validator.min_chars"),
            Some(&("10".to_string(), "cli".to_string()))
        );
        assert_eq!(effective["quality_gate.apply_mode"].0, "apply");
        assert_eq!(effective["pipeline.stages"].1, "default");
    }
}
