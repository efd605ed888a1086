//! Everything a stage handler may touch during one execution.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::time::Duration;
use tracing::{debug, warn};

use scriptline_config::{Config, StageDefinition, StageKind};
use scriptline_llm::{
    CallOptions, Generation, GenerationGateway, GenerationRequest, LlmError, MARKER_METADATA,
    Message,
};
use scriptline_status::{GateSummary, GenerationRecord, JobMetadata};
use scriptline_utils::JobKey;
use scriptline_utils::atomic_write::write_file_atomic;
use scriptline_validation::{Issue, TransformPipeline, ValidatorConfig};

use crate::cache::{ArtifactCache, CacheEntry};
use crate::error::StageError;

/// Diagnostics a handler accumulates; copied into the stage details whether
/// the handler succeeds or not.
#[derive(Debug, Default)]
pub(crate) struct StageLedger {
    pub generations: Vec<GenerationRecord>,
    pub quality_gate: Option<GateSummary>,
    pub issues: Vec<Issue>,
}

/// Validator limits for one job: configured limits, narrowed by the job's
/// own targets when it has any.
#[must_use]
pub fn validator_for(config: &Config, metadata: &JobMetadata) -> ValidatorConfig {
    let base = config.validator.clone();
    let min = metadata.target_min_chars.unwrap_or(base.min_chars);
    let max = metadata.target_max_chars.unwrap_or(base.max_chars);
    if min > max {
        warn!(min, max, "Ignoring job length targets with min above max");
        return base;
    }
    base.with_limits(min, max)
}

pub(crate) struct StageContext<'a> {
    pub key: &'a JobKey,
    pub job_dir: &'a Utf8Path,
    pub metadata: &'a JobMetadata,
    pub stage: &'a StageDefinition,
    pub config: &'a Config,
    pub validator: ValidatorConfig,
    pub cache: &'a ArtifactCache,
    gateway: &'a dyn GenerationGateway,
    pub ledger: StageLedger,
}

impl<'a> StageContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: &'a JobKey,
        job_dir: &'a Utf8Path,
        metadata: &'a JobMetadata,
        stage: &'a StageDefinition,
        config: &'a Config,
        cache: &'a ArtifactCache,
        gateway: &'a dyn GenerationGateway,
    ) -> Self {
        Self {
            key,
            job_dir,
            metadata,
            stage,
            config,
            validator: validator_for(config, metadata),
            cache,
            gateway,
            ledger: StageLedger::default(),
        }
    }

    pub fn into_ledger(self) -> StageLedger {
        self.ledger
    }

    pub fn input_path(&self, index: usize) -> Result<Utf8PathBuf, StageError> {
        self.stage
            .inputs
            .get(index)
            .map(|t| t.resolve(self.job_dir, self.key))
            .ok_or_else(|| {
                StageError::Internal(format!(
                    "stage '{}' has no input #{index}",
                    self.stage.name
                ))
            })
    }

    pub fn output_path(&self, index: usize) -> Result<Utf8PathBuf, StageError> {
        self.stage
            .outputs
            .get(index)
            .map(|o| o.path.resolve(self.job_dir, self.key))
            .ok_or_else(|| {
                StageError::Internal(format!(
                    "stage '{}' has no output #{index}",
                    self.stage.name
                ))
            })
    }

    /// Path relative to the job directory, for records and cache keys.
    pub fn relative(&self, path: &Utf8Path) -> String {
        path.strip_prefix(self.job_dir)
            .map_or_else(|_| path.to_string(), ToString::to_string)
    }

    /// Read one declared input. A missing file is a prerequisite problem; an
    /// empty one is malformed.
    pub fn read_input(&self, index: usize) -> Result<String, StageError> {
        let path = self.input_path(index)?;
        read_artifact(&path)
    }

    /// Every declared input as `(relative path, content)`.
    pub fn read_inputs(&self) -> Result<Vec<(String, String)>, StageError> {
        (0..self.stage.inputs.len())
            .map(|i| {
                let path = self.input_path(i)?;
                Ok((self.relative(&path), read_artifact(&path)?))
            })
            .collect()
    }

    pub fn write(&self, path: &Utf8Path, content: &str) -> Result<(), StageError> {
        write_file_atomic(path, content)
            .map(|_| ())
            .map_err(|e| StageError::Internal(format!("Failed to write {path}: {e:#}")))
    }

    /// The stage's own transforms, or the configured defaults for generate
    /// stages that name none.
    pub fn pipeline(&self) -> Result<TransformPipeline, StageError> {
        let marker = &self.validator.marker;
        let names: &[String] = if !self.stage.transforms.is_empty() {
            &self.stage.transforms
        } else if self.stage.kind == StageKind::Render {
            &[]
        } else {
            &self.config.pipeline.transforms
        };
        TransformPipeline::from_names(names, marker).map_err(|e| StageError::Internal(e.to_string()))
    }

    /// A request for `task` carrying the routed options and the marker.
    pub fn request(
        &self,
        task: &str,
        messages: Vec<Message>,
        target_chars: Option<usize>,
    ) -> GenerationRequest {
        let route = self.config.llm.route(task);
        GenerationRequest::new(task, messages)
            .with_options(CallOptions {
                model: route.model,
                max_tokens: route.max_tokens,
                temperature: route.temperature,
                timeout: Duration::from_secs(self.config.llm.timeout_seconds),
                target_chars,
            })
            .with_metadata(
                MARKER_METADATA,
                serde_json::Value::from(self.validator.marker.clone()),
            )
    }

    /// Call the gateway and record the call in the ledger.
    ///
    /// Blank content is reported as `EmptyContent`, never returned.
    pub async fn call(&mut self, request: GenerationRequest) -> Result<Generation, StageError> {
        let task = request.task.clone();
        debug!(job = %self.key, stage = %self.stage.name, task = %task, "Gateway call");
        let result = self.gateway.call(request).await;
        match result {
            Ok(generation) => {
                self.ledger.generations.push(GenerationRecord {
                    task: task.clone(),
                    provider: generation.provider.clone(),
                    model: generation.model.clone(),
                    input_tokens: generation.usage.map(|u| u.input_tokens),
                    output_tokens: generation.usage.map(|u| u.output_tokens),
                    cached: false,
                });
                if generation.content.trim().is_empty() {
                    return Err(StageError::EmptyContent { task });
                }
                Ok(generation)
            }
            Err(source) => {
                if !matches!(source, LlmError::Deferred(_)) {
                    warn!(job = %self.key, stage = %self.stage.name, task = %task, error = %source, "Gateway call failed");
                }
                Err(StageError::Gateway { task, source })
            }
        }
    }

    pub fn record_cached(&mut self, task: &str, entry: &CacheEntry) {
        self.ledger.generations.push(GenerationRecord {
            task: task.to_string(),
            provider: entry.provider.clone().unwrap_or_else(|| "operator".to_string()),
            model: entry.model.clone().unwrap_or_else(|| "operator".to_string()),
            input_tokens: None,
            output_tokens: None,
            cached: true,
        });
    }

    /// Title/style preamble shared by every prompt of this job.
    pub fn job_brief(&self) -> String {
        let mut brief = format!("Job: {}\n", self.key);
        if let Some(title) = &self.metadata.title {
            brief.push_str(&format!("Title: {title}\n"));
        }
        if let Some(style) = &self.metadata.style {
            brief.push_str(&format!("Style: {style}\n"));
        }
        brief.push_str(&format!(
            "Length: {}-{} characters (whitespace and pause markers not counted)\n\
             Pause marker: a line containing only {}\n",
            self.validator.min_chars, self.validator.max_chars, self.validator.marker
        ));
        brief
    }
}

fn read_artifact(path: &Utf8Path) -> Result<String, StageError> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Err(StageError::MalformedInput {
            path: path.to_string(),
            reason: "file is empty".to_string(),
        }),
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StageError::MissingInput {
            path: path.to_string(),
        }),
        Err(e) => Err(StageError::MalformedInput {
            path: path.to_string(),
            reason: e.to_string(),
        }),
    }
}
