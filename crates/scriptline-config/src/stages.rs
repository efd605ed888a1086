use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use scriptline_utils::PathTemplate;

/// What a stage handler does with its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageKind {
    /// One gateway call whose transformed reply becomes the first output
    Generate,
    /// Judge, fix and rescue an input until it passes the validator
    QualityGate,
    /// Deterministic transforms over the first input, no gateway call
    Render,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    pub path: PathTemplate,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Refuse to accept the output while it still contains template slots
    #[serde(default)]
    pub reject_placeholders: bool,
}

fn default_true() -> bool {
    true
}

impl OutputSpec {
    #[must_use]
    pub fn required(path: PathTemplate) -> Self {
        Self {
            path,
            required: true,
            reject_placeholders: false,
        }
    }

    #[must_use]
    pub fn optional(path: PathTemplate) -> Self {
        Self {
            required: false,
            ..Self::required(path)
        }
    }

    #[must_use]
    pub fn rejecting_placeholders(mut self) -> Self {
        self.reject_placeholders = true;
        self
    }
}

/// One entry of the stage registry, as written under `[[pipeline.stages]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDefinition {
    pub name: String,
    pub kind: StageKind,
    /// Gateway task name; defaults to the stage name
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub inputs: Vec<PathTemplate>,
    pub outputs: Vec<OutputSpec>,
    /// Empty means the pipeline defaults for generate stages, nothing otherwise
    #[serde(default)]
    pub transforms: Vec<String>,
    /// Completing this stage sets the job status to `<name>_validated`
    #[serde(default)]
    pub checkpoint: bool,
    /// System instruction sent with generation requests
    #[serde(default)]
    pub prompt: Option<String>,
}

impl StageDefinition {
    #[must_use]
    pub fn new(name: &str, kind: StageKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            task: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            transforms: Vec::new(),
            checkpoint: false,
            prompt: None,
        }
    }

    #[must_use]
    pub fn input(mut self, path: PathTemplate) -> Self {
        self.inputs.push(path);
        self
    }

    #[must_use]
    pub fn output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    #[must_use]
    pub fn transforms(mut self, names: &[&str]) -> Self {
        self.transforms = names.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }

    #[must_use]
    pub fn prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }

    /// The gateway task this stage calls under.
    #[must_use]
    pub fn task_name(&self) -> &str {
        self.task.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_definition_from_toml() {
        let def: StageDefinition = toml::from_str(
            r#"
name = "script"
kind = "quality_gate"
inputs = ["content/draft.md"]
checkpoint = true

[[outputs]]
path = "content/{key}.md"
reject_placeholders = true

[[outputs]]
path = "content/report.json"
required = false
"#,
        )
        .unwrap();

        assert_eq!(def.kind, StageKind::QualityGate);
        assert_eq!(def.task_name(), "script");
        assert!(def.checkpoint);
        assert!(def.outputs[0].required);
        assert!(def.outputs[0].reject_placeholders);
        assert!(!def.outputs[1].required);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let parsed: Result<StageDefinition, _> = toml::from_str(
            r#"
name = "x"
kind = "render"
outputs = []
retries = 3
"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_builder_helpers() {
        let def = StageDefinition::new("narration", StageKind::Render)
            .input(PathTemplate::parse("content/script.md").unwrap())
            .output(OutputSpec::required(
                PathTemplate::parse("final/narration.txt").unwrap(),
            ))
            .transforms(&["markers_to_pauses"]);
        assert_eq!(def.inputs[0].as_str(), "content/script.md");
        assert_eq!(def.transforms, vec!["markers_to_pauses"]);
        assert_eq!(StageKind::QualityGate.to_string(), "quality_gate");
    }
}
