//! The job record: coarse lifecycle label, per-stage states and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use scriptline_utils::JobKey;

use crate::stage::{StageState, StageStatus};

pub const SCHEMA_VERSION: &str = "1";

const VALIDATED_SUFFIX: &str = "_validated";

/// Coarse job lifecycle label.
///
/// `Validated(stage)` is the checkpoint emitted once a checkpoint stage
/// completes; it serializes as `<stage>_validated`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[default]
    Pending,
    InProgress,
    Validated(String),
    Completed,
    Failed,
}

impl JobStatus {
    /// Milestone ordering used to keep the label from regressing.
    ///
    /// Checkpoints rank by their position in `order` so a later checkpoint
    /// outranks an earlier one. `InProgress` and `Failed` share a rank.
    #[must_use]
    pub fn milestone(&self, order: &[String]) -> (u8, usize) {
        match self {
            Self::Pending => (0, 0),
            Self::InProgress | Self::Failed => (1, 0),
            Self::Validated(stage) => {
                let pos = order.iter().position(|s| s == stage).map_or(0, |p| p + 1);
                (2, pos)
            }
            Self::Completed => (3, 0),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::InProgress => f.write_str("in_progress"),
            Self::Validated(stage) => write!(f, "{stage}{VALIDATED_SUFFIX}"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => match other.strip_suffix(VALIDATED_SUFFIX) {
                Some(stage) if !stage.is_empty() => Ok(Self::Validated(stage.to_string())),
                _ => Err(format!("unknown job status '{other}'")),
            },
        }
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Seed metadata supplied at `init`, plus whatever operators add later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Per-job override of `[validator] min_chars`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_min_chars: Option<usize>,
    /// Per-job override of `[validator] max_chars`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_max_chars: Option<usize>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub schema_version: String,
    pub key: JobKey,
    pub status: JobStatus,
    #[serde(default)]
    pub stages: BTreeMap<String, StageState>,
    #[serde(default)]
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    #[must_use]
    pub fn new<S: AsRef<str>>(key: JobKey, metadata: JobMetadata, stage_names: &[S]) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            key,
            status: JobStatus::Pending,
            stages: stage_names
                .iter()
                .map(|name| (name.as_ref().to_string(), StageState::pending()))
                .collect(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageState> {
        self.stages.get(name)
    }

    /// Mutable access, synthesizing a `pending` state for stages the record
    /// has never seen.
    pub fn stage_mut(&mut self, name: &str) -> &mut StageState {
        self.stages.entry(name.to_string()).or_default()
    }

    #[must_use]
    pub fn is_stage_completed(&self, name: &str) -> bool {
        self.stage(name).is_some_and(StageState::is_completed)
    }

    /// Add a `pending` state for each registry stage the record lacks.
    ///
    /// Stages the registry no longer names are left in place. Returns the
    /// names that were added.
    pub fn sync_with_registry<S: AsRef<str>>(&mut self, order: &[S]) -> Vec<String> {
        let mut added = Vec::new();
        for name in order {
            let name = name.as_ref();
            if !self.stages.contains_key(name) {
                self.stages.insert(name.to_string(), StageState::pending());
                added.push(name.to_string());
            }
        }
        added
    }

    /// Registry stages not yet completed, in registry order.
    #[must_use]
    pub fn pending_stage_names<S: AsRef<str>>(&self, order: &[S]) -> Vec<String> {
        order
            .iter()
            .map(|name| name.as_ref())
            .filter(|name| !self.is_stage_completed(name))
            .map(str::to_string)
            .collect()
    }

    /// Compute the status label implied by the stage states alone.
    ///
    /// - every registry stage completed: `Completed`
    /// - otherwise, the latest completed checkpoint: `<stage>_validated`
    /// - the first incomplete stage carries a non-wait error: `Failed`
    /// - any stage completed or processing: `InProgress`
    /// - else `Pending`
    #[must_use]
    pub fn derive_status(&self, order: &[String], checkpoints: &[String]) -> JobStatus {
        if !order.is_empty() && order.iter().all(|name| self.is_stage_completed(name)) {
            return JobStatus::Completed;
        }

        if let Some(stage) = order
            .iter()
            .rev()
            .find(|name| checkpoints.contains(name) && self.is_stage_completed(name))
        {
            return JobStatus::Validated(stage.clone());
        }

        let first_open = order
            .iter()
            .find(|name| !self.is_stage_completed(name))
            .and_then(|name| self.stage(name));
        if let Some(state) = first_open
            && state.details.error.is_some_and(|code| !code.is_wait())
        {
            return JobStatus::Failed;
        }

        let started = order.iter().filter_map(|name| self.stage(name)).any(|s| {
            matches!(s.status, StageStatus::Completed | StageStatus::Processing)
        });
        if started {
            JobStatus::InProgress
        } else {
            JobStatus::Pending
        }
    }

    /// Replace the status label with the derived one.
    ///
    /// Without `allow_downgrade` the label only moves to an equal or higher
    /// milestone. Returns `true` when the label changed.
    pub fn refresh_status(
        &mut self,
        order: &[String],
        checkpoints: &[String],
        allow_downgrade: bool,
    ) -> bool {
        let derived = self.derive_status(order, checkpoints);
        if derived == self.status {
            return false;
        }
        if !allow_downgrade && derived.milestone(order) < self.status.milestone(order) {
            tracing::debug!(
                job = %self.key,
                current = %self.status,
                derived = %derived,
                "Keeping higher milestone"
            );
            return false;
        }
        self.status = derived;
        true
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
