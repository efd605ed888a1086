//! Resynchronise a job record with the artifacts on disk.
//!
//! Repairs drift from interrupted runs and manual edits. Completed stages
//! stay completed unless the caller allows downgrades, and a stage whose
//! last error disqualifies it is never promoted just because a file exists.
//! Quality-gate outputs must also pass the validator before promotion.

use camino::Utf8Path;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use scriptline_config::{StageDefinition, StageKind};
use scriptline_status::{ErrorCode, Job, StageStatus};
use scriptline_utils::JobKey;
use scriptline_validation::{ValidatorConfig, validate};

use crate::outputs::{self, OutputProblem};
use crate::registry::StageRegistry;

/// One stage whose status the reconciler changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageChange {
    pub stage: String,
    pub from: StageStatus,
    pub to: StageStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub job: Job,
    pub changes: Vec<StageChange>,
}

pub struct Reconciler<'r> {
    registry: &'r StageRegistry,
    job_dir: &'r Utf8Path,
    validator: Option<ValidatorConfig>,
}

impl<'r> Reconciler<'r> {
    #[must_use]
    pub fn new(registry: &'r StageRegistry, job_dir: &'r Utf8Path) -> Self {
        Self {
            registry,
            job_dir,
            validator: None,
        }
    }

    /// Check quality-gate outputs against `validator` before promoting them.
    #[must_use]
    pub fn validating(mut self, validator: ValidatorConfig) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Error count of the gated output, when it is validated and fails.
    fn gate_errors(&self, stage: &StageDefinition, key: &JobKey) -> Option<usize> {
        let validator = self.validator.as_ref()?;
        if stage.kind != StageKind::QualityGate {
            return None;
        }
        let path = stage.outputs.first()?.path.resolve(self.job_dir, key);
        let text = std::fs::read_to_string(&path).ok()?;
        let errors = validate(&text, validator).error_count();
        (errors > 0).then_some(errors)
    }

    /// Apply the reconciliation rules to every registry stage of `job`.
    ///
    /// Only stage states are touched; refreshing the status label and saving
    /// are left to the caller.
    pub fn reconcile(&self, job: &mut Job, allow_downgrade: bool) -> Vec<StageChange> {
        let key = job.key.clone();
        let mut changes = Vec::new();

        for stage in self.registry.stages() {
            let verified = outputs::verify(stage, self.job_dir, &key);
            let gate_errors = match &verified {
                Ok(_) => self.gate_errors(stage, &key),
                Err(_) => None,
            };
            let state = job.stage_mut(&stage.name);
            let from = state.status;
            let now = Utc::now();

            let reason = match (state.status, verified) {
                (StageStatus::Completed, _) if state.details.skipped => None,
                (StageStatus::Completed, _) if state.details.is_disqualified() => {
                    state.status = StageStatus::Pending;
                    Some("recorded error disqualifies the output".to_string())
                }
                (StageStatus::Completed, Ok(fingerprints)) => {
                    state.details.outputs = fingerprints;
                    None
                }
                (StageStatus::Completed, Err(problem)) => {
                    if allow_downgrade {
                        state.park(now, problem.code(), problem.message(), rerun_hint(&stage.name));
                        Some(problem.message())
                    } else {
                        warn!(job = %key, stage = %stage.name, problem = %problem.message(), "Completed stage no longer matches its outputs; keeping it");
                        None
                    }
                }
                (StageStatus::Processing, _) if state.details.error.is_some() => {
                    state.status = StageStatus::Pending;
                    state
                        .details
                        .hints
                        .push("The previous run was interrupted; re-run the stage".to_string());
                    Some("interrupted run with a recorded error".to_string())
                }
                (StageStatus::Processing, Ok(_)) if gate_errors.is_some() => {
                    let errors = gate_errors.unwrap_or_default();
                    state.park(
                        now,
                        ErrorCode::ValidationFailed,
                        format!("run interrupted; output has {errors} validation errors"),
                        rerun_hint(&stage.name),
                    );
                    Some("interrupted run left an output that fails validation".to_string())
                }
                (StageStatus::Processing, Ok(fingerprints)) => {
                    state.details.outputs = fingerprints;
                    state.complete(now);
                    Some("interrupted run left complete outputs".to_string())
                }
                (StageStatus::Processing, Err(problem)) => {
                    state.park(
                        now,
                        ErrorCode::Abandoned,
                        format!("run interrupted: {}", problem.message()),
                        rerun_hint(&stage.name),
                    );
                    Some("interrupted run without usable outputs".to_string())
                }
                (StageStatus::Pending, Ok(_)) if state.details.is_disqualified() => {
                    debug!(job = %key, stage = %stage.name, error = ?state.details.error, "Not promoting disqualified stage");
                    None
                }
                (StageStatus::Pending, Ok(_)) if gate_errors.is_some() => {
                    let errors = gate_errors.unwrap_or_default();
                    debug!(job = %key, stage = %stage.name, errors, "Not promoting output that fails validation");
                    None
                }
                (StageStatus::Pending, Ok(fingerprints)) => {
                    state.details.outputs = fingerprints;
                    state.complete(now);
                    Some("required outputs present".to_string())
                }
                (StageStatus::Pending, Err(OutputProblem::Placeholder { path, .. })) => {
                    debug!(job = %key, stage = %stage.name, output = %path, "Output still templated");
                    None
                }
                (StageStatus::Pending, Err(_)) => None,
            };

            if let Some(reason) = reason {
                state.details.reconciled_at = Some(now);
                let to = state.status;
                info!(job = %key, stage = %stage.name, from = %from, to = %to, reason = %reason, "Reconciled stage");
                changes.push(StageChange {
                    stage: stage.name.clone(),
                    from,
                    to,
                    reason,
                });
            }
        }
        changes
    }
}

fn rerun_hint(stage: &str) -> Vec<String> {
    vec![format!("Run stage '{stage}' again")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, prose};
    use scriptline_config::Config;
    use scriptline_status::JobMetadata;

    fn setup() -> (Fixture, StageRegistry, Job) {
        let fixture = Fixture::new(Config::default());
        let registry = StageRegistry::from_config(&fixture.config).unwrap();
        let job = Job::new(fixture.key.clone(), JobMetadata::default(), &registry.names());
        (fixture, registry, job)
    }

    #[test]
    fn test_completed_stage_survives_missing_output_without_downgrade() {
        let (fixture, registry, mut job) = setup();
        job.stage_mut("research").complete(Utc::now());

        let changes = Reconciler::new(&registry, &fixture.job_dir).reconcile(&mut job, false);

        assert!(changes.is_empty());
        assert!(job.is_stage_completed("research"));
    }

    #[test]
    fn test_downgrade_demotes_completed_stage_with_missing_output() {
        let (fixture, registry, mut job) = setup();
        job.stage_mut("research").complete(Utc::now());

        let changes = Reconciler::new(&registry, &fixture.job_dir).reconcile(&mut job, true);

        assert_eq!(changes.len(), 1);
        let state = job.stage("research").unwrap();
        assert_eq!(state.status, StageStatus::Pending);
        assert_eq!(state.details.error, Some(ErrorCode::MissingOutput));
    }

    #[test]
    fn test_pending_stage_with_outputs_is_promoted() {
        let (fixture, registry, mut job) = setup();
        fixture.write("research/brief.md", "The harbour opened in spring.\n");

        let changes = Reconciler::new(&registry, &fixture.job_dir).reconcile(&mut job, false);

        assert_eq!(changes[0].stage, "research");
        assert_eq!(changes[0].to, StageStatus::Completed);
        let state = job.stage("research").unwrap();
        assert!(state.details.reconciled_at.is_some());
        assert!(state.details.outputs.contains_key("research/brief.md"));
    }

    #[test]
    fn test_approved_proposal_is_promoted() {
        let (fixture, registry, mut job) = setup();
        job.stage_mut("script").park(
            Utc::now(),
            ErrorCode::AwaitingApproval,
            "awaiting approval",
            Vec::new(),
        );
        fixture.write("content/script.md", "Approved narration text.\n");

        Reconciler::new(&registry, &fixture.job_dir).reconcile(&mut job, false);

        let state = job.stage("script").unwrap();
        assert!(state.is_completed());
        assert_eq!(state.details.error, None);
    }

    #[test]
    fn test_disqualified_stage_is_not_promoted() {
        let (fixture, registry, mut job) = setup();
        job.stage_mut("script").park(
            Utc::now(),
            ErrorCode::ConvergenceExhausted,
            "judge never passed",
            Vec::new(),
        );
        fixture.write("content/script.md", "Text that never passed the judge.\n");

        let changes = Reconciler::new(&registry, &fixture.job_dir).reconcile(&mut job, false);

        assert!(changes.iter().all(|c| c.stage != "script"));
        assert_eq!(job.stage("script").unwrap().status, StageStatus::Pending);
    }

    #[test]
    fn test_unresolved_rescue_failure_is_not_promoted() {
        let (fixture, registry, mut job) = setup();
        job.stage_mut("script").park(
            Utc::now(),
            ErrorCode::RescueFailed,
            "still 600 characters short",
            Vec::new(),
        );
        fixture.write("content/script.md", "Too short to record.\n");

        let changes = Reconciler::new(&registry, &fixture.job_dir).reconcile(&mut job, false);

        assert!(changes.iter().all(|c| c.stage != "script"));
        assert_eq!(job.stage("script").unwrap().status, StageStatus::Pending);
    }

    #[test]
    fn test_gate_output_must_validate_before_promotion() {
        let (fixture, registry, mut job) = setup();
        let validator = fixture.config.validator.clone().with_limits(1000, 1600);
        fixture.write("content/script.md", "Too short to record.\n");

        let reconciler = Reconciler::new(&registry, &fixture.job_dir).validating(validator);
        let changes = reconciler.reconcile(&mut job, false);
        assert!(changes.iter().all(|c| c.stage != "script"));
        assert!(!job.is_stage_completed("script"));

        fixture.write("content/script.md", &prose(1300, "---"));
        reconciler.reconcile(&mut job, false);
        assert!(job.is_stage_completed("script"));
    }

    #[test]
    fn test_interrupted_gate_with_invalid_output_is_parked() {
        let (fixture, registry, mut job) = setup();
        let validator = fixture.config.validator.clone().with_limits(1000, 1600);
        job.stage_mut("script").begin(Utc::now());
        fixture.write("content/script.md", "Too short to record.\n");

        Reconciler::new(&registry, &fixture.job_dir)
            .validating(validator)
            .reconcile(&mut job, false);

        let state = job.stage("script").unwrap();
        assert_eq!(state.status, StageStatus::Pending);
        assert_eq!(state.details.error, Some(ErrorCode::ValidationFailed));
    }

    #[test]
    fn test_placeholder_output_is_not_promoted() {
        let (fixture, registry, mut job) = setup();
        fixture.write("content/script.md", "Open with [INSERT HOOK] and go.\n");

        Reconciler::new(&registry, &fixture.job_dir).reconcile(&mut job, false);

        assert!(!job.is_stage_completed("script"));
    }

    #[test]
    fn test_interrupted_processing_stage_is_reverified() {
        let (fixture, registry, mut job) = setup();
        job.stage_mut("research").begin(Utc::now());
        job.stage_mut("outline").begin(Utc::now());
        fixture.write("research/brief.md", "Finished before the crash.\n");

        Reconciler::new(&registry, &fixture.job_dir).reconcile(&mut job, false);

        assert!(job.is_stage_completed("research"));
        let outline = job.stage("outline").unwrap();
        assert_eq!(outline.status, StageStatus::Pending);
        assert_eq!(outline.details.error, Some(ErrorCode::Abandoned));
    }

    #[test]
    fn test_processing_stage_with_error_returns_to_pending() {
        let (fixture, registry, mut job) = setup();
        let state = job.stage_mut("research");
        state.begin(Utc::now());
        state
            .details
            .record_error(ErrorCode::GatewayFailure, "timeout", Vec::new());
        fixture.write("research/brief.md", "Half written.\n");

        Reconciler::new(&registry, &fixture.job_dir).reconcile(&mut job, false);

        let state = job.stage("research").unwrap();
        assert_eq!(state.status, StageStatus::Pending);
        assert_eq!(state.details.error, Some(ErrorCode::GatewayFailure));
    }
}
