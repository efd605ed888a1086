//! Per-stage state and the typed diagnostics bag attached to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use scriptline_validation::Issue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Processing,
    Completed,
}

impl StageStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason a stage stopped short of completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MissingInput,
    MalformedInput,
    PrerequisiteIncomplete,
    ValidationFailed,
    ConvergenceExhausted,
    FixRejected,
    RescueFailed,
    GatewayFailure,
    EmptyContent,
    JudgeUnparseable,
    AwaitingExternal,
    AwaitingApproval,
    SemanticMismatch,
    Abandoned,
    MissingOutput,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingInput => "missing_input",
            Self::MalformedInput => "malformed_input",
            Self::PrerequisiteIncomplete => "prerequisite_incomplete",
            Self::ValidationFailed => "validation_failed",
            Self::ConvergenceExhausted => "convergence_exhausted",
            Self::FixRejected => "fix_rejected",
            Self::RescueFailed => "rescue_failed",
            Self::GatewayFailure => "gateway_failure",
            Self::EmptyContent => "empty_content",
            Self::JudgeUnparseable => "judge_unparseable",
            Self::AwaitingExternal => "awaiting_external",
            Self::AwaitingApproval => "awaiting_approval",
            Self::SemanticMismatch => "semantic_mismatch",
            Self::Abandoned => "abandoned",
            Self::MissingOutput => "missing_output",
            Self::Internal => "internal",
        }
    }

    /// An output produced under this error must not be trusted just because
    /// the file exists.
    #[must_use]
    pub const fn is_disqualifying(self) -> bool {
        matches!(
            self,
            Self::SemanticMismatch
                | Self::ValidationFailed
                | Self::ConvergenceExhausted
                | Self::FixRejected
                | Self::RescueFailed
        )
    }

    /// The stage is waiting on something outside the run rather than failing.
    #[must_use]
    pub const fn is_wait(self) -> bool {
        matches!(
            self,
            Self::AwaitingExternal | Self::AwaitingApproval | Self::PrerequisiteIncomplete
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gateway call made on behalf of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub task: String,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// Served from the artifact cache instead of a live call
    #[serde(default)]
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        })
    }
}

/// Postmortem record of one judge/fix iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGateRound {
    pub round: u32,
    pub verdict: Verdict,
    #[serde(default)]
    pub must_fix: Vec<String>,
    /// Snapshot of the judged candidate, relative to the job directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
    pub char_count: usize,
    /// Rescue strategies applied before this round was judged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rescue: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Passed,
    Proposed,
    Exhausted,
    FixRejected,
    RescueFailed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSummary {
    pub rounds: Vec<QualityGateRound>,
    pub outcome: GateOutcome,
    #[serde(default)]
    pub rebuilt: bool,
}

/// Known diagnostic fields plus an escape hatch for fields added later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generations: Vec<GenerationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_gate: Option<GateSummary>,
    /// Output path (relative to the job directory) to BLAKE3 fingerprint
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciled_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StageDetails {
    pub fn record_error(&mut self, code: ErrorCode, message: impl Into<String>, hints: Vec<String>) {
        self.error = Some(code);
        self.message = Some(message.into());
        self.hints = hints;
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.message = None;
        self.hints.clear();
    }

    #[must_use]
    pub fn is_disqualified(&self) -> bool {
        self.error.is_some_and(ErrorCode::is_disqualifying)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,
    #[serde(default)]
    pub details: StageDetails,
}

impl StageState {
    #[must_use]
    pub fn pending() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }

    /// Enter `processing` for a fresh attempt. Diagnostics from the previous
    /// attempt are dropped; the attempt counter survives.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        let attempts = self.details.attempts + 1;
        self.details = StageDetails {
            attempts,
            started_at: Some(now),
            extra: std::mem::take(&mut self.details.extra),
            ..StageDetails::default()
        };
        self.status = StageStatus::Processing;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = StageStatus::Completed;
        self.details.clear_error();
        self.details.finished_at = Some(now);
    }

    /// Leave the stage resumable with a recorded reason.
    pub fn park(
        &mut self,
        now: DateTime<Utc>,
        code: ErrorCode,
        message: impl Into<String>,
        hints: Vec<String>,
    ) {
        self.status = StageStatus::Pending;
        self.details.record_error(code, message, hints);
        self.details.finished_at = Some(now);
    }

    pub fn skip(&mut self, now: DateTime<Utc>) {
        self.status = StageStatus::Completed;
        self.details.skipped = true;
        self.details.finished_at = Some(now);
    }

    /// Back to a clean `pending`, as if the stage never ran.
    pub fn reset(&mut self) {
        *self = Self::pending();
    }
}
