//! Checks over a stage's declared outputs, shared by the orchestrator and
//! the reconciler.

use camino::Utf8Path;
use std::collections::BTreeMap;
use std::fs;

use scriptline_config::StageDefinition;
use scriptline_status::ErrorCode;
use scriptline_utils::{JobKey, fingerprint_text};
use scriptline_validation::find_placeholder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputProblem {
    Missing(String),
    Empty(String),
    Placeholder {
        path: String,
        line: usize,
        token: String,
    },
}

impl OutputProblem {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Missing(_) | Self::Empty(_) => ErrorCode::MissingOutput,
            Self::Placeholder { .. } => ErrorCode::SemanticMismatch,
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Missing(path) => format!("required output {path} is missing"),
            Self::Empty(path) => format!("required output {path} is empty"),
            Self::Placeholder { path, line, token } => {
                format!("output {path} still contains '{token}' at line {line}")
            }
        }
    }
}

/// Fingerprint every existing output, failing on the first required output
/// that is missing, blank or (when flagged) still templated.
///
/// Keys are paths relative to the job directory.
pub fn verify(
    stage: &StageDefinition,
    job_dir: &Utf8Path,
    key: &JobKey,
) -> Result<BTreeMap<String, String>, OutputProblem> {
    let mut fingerprints = BTreeMap::new();
    for output in &stage.outputs {
        let rel = output.path.render(key).to_string();
        let path = output.path.resolve(job_dir, key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) if !output.required => continue,
            Err(_) => return Err(OutputProblem::Missing(rel)),
        };
        if output.required && content.trim().is_empty() {
            return Err(OutputProblem::Empty(rel));
        }
        if output.reject_placeholders
            && let Some((line, token)) = find_placeholder(&content)
        {
            return Err(OutputProblem::Placeholder {
                path: rel,
                line,
                token,
            });
        }
        fingerprints.insert(rel, fingerprint_text(&content));
    }
    Ok(fingerprints)
}
