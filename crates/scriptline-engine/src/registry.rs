//! Ordered stage registry.
//!
//! Order is dependency: a stage is eligible only once every stage before it
//! is completed (or skipped).

use scriptline_config::{Config, OutputSpec, StageDefinition, StageKind};
use scriptline_utils::PathTemplate;
use std::collections::BTreeSet;

use crate::error::RegistryError;

#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageDefinition>,
}

fn template(stage: &str, raw: &str) -> Result<PathTemplate, RegistryError> {
    PathTemplate::parse(raw).map_err(|source| RegistryError::Template {
        stage: stage.to_string(),
        source,
    })
}

/// The built-in five-stage pipeline.
pub fn default_stages() -> Result<Vec<StageDefinition>, RegistryError> {
    Ok(vec![
        StageDefinition::new("research", StageKind::Generate)
            .output(OutputSpec::required(template("research", "research/brief.md")?))
            .prompt(
                "Collect the facts, names and dates a narrator needs for this topic. \
                 Plain prose, no headings or lists.",
            ),
        StageDefinition::new("outline", StageKind::Generate)
            .input(template("outline", "research/brief.md")?)
            .output(OutputSpec::required(template("outline", "plan/outline.md")?))
            .prompt(
                "Plan the narration as a sequence of sections. Separate sections \
                 with the pause marker on its own line.",
            ),
        StageDefinition::new("draft", StageKind::Generate)
            .input(template("draft", "research/brief.md")?)
            .input(template("draft", "plan/outline.md")?)
            .output(OutputSpec::required(template("draft", "content/draft.md")?))
            .prompt(
                "Write the full narration following the outline. Spoken prose only: \
                 no headings, lists, links or footnotes. Put the pause marker on its \
                 own line between sections.",
            ),
        StageDefinition::new("script", StageKind::QualityGate)
            .input(template("script", "content/draft.md")?)
            .output(
                OutputSpec::required(template("script", "content/script.md")?)
                    .rejecting_placeholders(),
            )
            .output(OutputSpec::optional(template("script", "content/quality_gate.json")?))
            .checkpoint(),
        StageDefinition::new("narration", StageKind::Render)
            .input(template("narration", "content/script.md")?)
            .output(OutputSpec::required(template("narration", "final/narration.txt")?))
            .transforms(&["markers_to_pauses", "collapse_blank_lines"]),
    ])
}

impl StageRegistry {
    /// Validate and wrap an ordered list of definitions.
    pub fn from_definitions(stages: Vec<StageDefinition>) -> Result<Self, RegistryError> {
        if stages.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = BTreeSet::new();
        for stage in &stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(RegistryError::DuplicateStage(stage.name.clone()));
            }
            if stage.outputs.is_empty() {
                return Err(RegistryError::NoOutputs(stage.name.clone()));
            }
            if matches!(stage.kind, StageKind::QualityGate | StageKind::Render)
                && stage.inputs.is_empty()
            {
                return Err(RegistryError::MissingInput {
                    stage: stage.name.clone(),
                    kind: stage.kind.to_string(),
                });
            }
        }
        Ok(Self { stages })
    }

    pub fn defaults() -> Result<Self, RegistryError> {
        Self::from_definitions(default_stages()?)
    }

    /// `[[pipeline.stages]]` when configured, else the built-in stages.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        match &config.pipeline.stages {
            Some(stages) => Self::from_definitions(stages.clone()),
            None => Self::defaults(),
        }
    }

    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    /// Stages whose completion yields `<name>_validated`.
    #[must_use]
    pub fn checkpoints(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| s.checkpoint)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Every stage ordered before `name` (empty for unknown names).
    #[must_use]
    pub fn predecessors(&self, name: &str) -> &[StageDefinition] {
        match self.position(name) {
            Some(pos) => &self.stages[..pos],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str) -> StageDefinition {
        StageDefinition::new(name, StageKind::Generate)
            .output(OutputSpec::required(PathTemplate::parse("out/{key}.md").unwrap()))
    }

    #[test]
    fn test_default_registry_shape() {
        let registry = StageRegistry::defaults().unwrap();
        assert_eq!(
            registry.names(),
            vec!["research", "outline", "draft", "script", "narration"]
        );
        assert_eq!(registry.checkpoints(), vec!["script"]);

        let script = registry.get("script").unwrap();
        assert_eq!(script.kind, StageKind::QualityGate);
        assert!(script.outputs[0].required && script.outputs[0].reject_placeholders);
        assert!(!script.outputs[1].required);

        let names: Vec<&str> = registry
            .predecessors("draft")
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["research", "outline"]);
    }

    #[test]
    fn test_registry_validation() {
        assert_eq!(
            StageRegistry::from_definitions(Vec::new()).unwrap_err(),
            RegistryError::Empty
        );
        assert_eq!(
            StageRegistry::from_definitions(vec![stage("a"), stage("a")]).unwrap_err(),
            RegistryError::DuplicateStage("a".into())
        );
        assert_eq!(
            StageRegistry::from_definitions(vec![StageDefinition::new("a", StageKind::Generate)])
                .unwrap_err(),
            RegistryError::NoOutputs("a".into())
        );

        let gate = StageDefinition::new("gate", StageKind::QualityGate)
            .output(OutputSpec::required(PathTemplate::parse("x.md").unwrap()));
        assert!(matches!(
            StageRegistry::from_definitions(vec![gate]),
            Err(RegistryError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_config_override_wins() {
        let config = Config::builder()
            .stages(vec![stage("only")])
            .build()
            .unwrap();
        let registry = StageRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["only"]);
    }
}
