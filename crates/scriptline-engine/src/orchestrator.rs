//! Stage orchestration over a job record.
//!
//! Every decision is derived from the persisted record plus artifacts on
//! disk, so re-running after a crash repeats the same next action. Work on
//! one job key is serialized twice: a keyed async mutex inside the process
//! and an advisory `FileLock` in the job directory across processes.

use camino::Utf8Path;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{Instrument, debug, info, warn};

use scriptline_config::{Config, StageDefinition};
use scriptline_llm::{GenerationGateway, gateway_from_config};
use scriptline_lock::FileLock;
use scriptline_status::{ErrorCode, Job, JobMetadata, JobStore};
use scriptline_utils::JobKey;
use scriptline_utils::logging::{log_stage_complete, log_stage_pending, log_stage_start, stage_span};
use scriptline_utils::paths::artifact_cache_dir;

use crate::cache::{ArtifactCache, CacheStats};
use crate::context::{StageContext, validator_for};
use crate::error::EngineError;
use crate::handlers;
use crate::outcome::{NextStep, RunReport, StageOutcome, StageRun, StopReason};
use crate::outputs::{self, OutputProblem};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::registry::StageRegistry;

/// Which stages `reset` returns to `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetScope {
    Stage(String),
    /// The named stage and every stage after it
    From(String),
    All,
}

/// One async mutex per job key, created on first use and dropped once no
/// caller holds or waits on it.
#[derive(Debug, Default)]
struct KeyedLocks {
    slots: Mutex<HashMap<JobKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &JobKey) -> KeyedGuard<'_> {
        let slot = Arc::clone(self.slots().entry(key.clone()).or_default());
        let guard = slot.lock_owned().await;
        KeyedGuard {
            locks: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<JobKey, Arc<tokio::sync::Mutex<()>>>> {
        match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots().len()
    }
}

struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: JobKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex first so only the map's reference can remain.
        self.guard.take();
        let mut slots = self.locks.slots();
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

pub struct Orchestrator {
    config: Config,
    registry: StageRegistry,
    gateway: Arc<dyn GenerationGateway>,
    store: JobStore,
    cache: ArtifactCache,
    locks: KeyedLocks,
    force_lock: bool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("home", &self.store.home())
            .field("stages", &self.registry.names())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator with an explicit gateway.
    pub fn new(config: Config, gateway: Arc<dyn GenerationGateway>) -> Result<Self, EngineError> {
        let registry = StageRegistry::from_config(&config)?;
        let home = config.home_dir();
        Ok(Self {
            store: JobStore::new(home.clone()),
            cache: ArtifactCache::new(artifact_cache_dir(&home)),
            config,
            registry,
            gateway,
            locks: KeyedLocks::default(),
            force_lock: false,
        })
    }

    /// Build an orchestrator with the gateway the config names.
    pub fn from_config(config: Config) -> Result<Self, EngineError> {
        let gateway = gateway_from_config(&config)?;
        Self::new(config, gateway)
    }

    /// Override a job lock held by a live process.
    #[must_use]
    pub fn with_force_lock(mut self, force: bool) -> Self {
        self.force_lock = force;
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn init(
        &self,
        key: &JobKey,
        metadata: JobMetadata,
        force: bool,
    ) -> Result<Job, EngineError> {
        Ok(self.store.init(key, metadata, &self.registry.names(), force)?)
    }

    /// The persisted job, with stages the registry gained since it was
    /// written synthesized as `pending` (not saved).
    pub fn status(&self, key: &JobKey) -> Result<Job, EngineError> {
        let mut job = self.store.load(key)?;
        job.sync_with_registry(&self.registry.names());
        Ok(job)
    }

    /// Execute one named stage.
    ///
    /// An unknown stage name is an error; everything that goes wrong inside
    /// the stage is recorded on it and reported through the outcome.
    pub async fn run_stage(&self, key: &JobKey, stage: &str) -> Result<StageRun, EngineError> {
        let definition = self.stage_definition(stage)?;
        let _serial = self.locks.acquire(key).await;
        let (mut job, _lock) = self.open(key)?;
        self.execute(&mut job, definition).await
    }

    /// Execute the first stage that is not completed, marking skip-listed
    /// stages on the way.
    pub async fn run_next(&self, key: &JobKey) -> Result<NextStep, EngineError> {
        let _serial = self.locks.acquire(key).await;
        let (mut job, _lock) = self.open(key)?;

        for definition in self.registry.stages() {
            if job.is_stage_completed(&definition.name) {
                continue;
            }
            if self.config.pipeline.skip.contains(&definition.name) {
                info!(job = %key, stage = %definition.name, "Skipping stage");
                job.stage_mut(&definition.name).skip(Utc::now());
                job.touch();
                self.persist(&mut job, false)?;
                continue;
            }
            return Ok(NextStep::Ran(self.execute(&mut job, definition).await?));
        }

        if self.persist(&mut job, false)? {
            debug!(job = %key, status = %job.status, "Nothing left to run");
        }
        Ok(NextStep::Finished(job))
    }

    /// Call [`Self::run_next`] until the job completes, stops making
    /// progress, or `max_iterations` steps have run.
    pub async fn run_until_done_or_stuck(
        &self,
        key: &JobKey,
        max_iterations: u32,
    ) -> Result<RunReport, EngineError> {
        let order = self.registry.names();
        let mut runs = Vec::new();
        let mut job = self.status(key)?;
        if job.pending_stage_names(&order).is_empty() {
            return Ok(RunReport {
                job,
                runs,
                stop: StopReason::Completed,
            });
        }

        for iteration in 1..=max_iterations {
            let before = job.pending_stage_names(&order);
            match self.run_next(key).await? {
                NextStep::Finished(finished) => {
                    return Ok(RunReport {
                        job: finished,
                        runs,
                        stop: StopReason::Completed,
                    });
                }
                NextStep::Ran(run) => {
                    job = run.job.clone();
                    runs.push(run);
                }
            }

            let after = job.pending_stage_names(&order);
            if after.is_empty() {
                return Ok(RunReport {
                    job,
                    runs,
                    stop: StopReason::Completed,
                });
            }
            if after == before {
                warn!(job = %key, iteration, stage = %after[0], "No progress; stopping");
                return Ok(RunReport {
                    job,
                    runs,
                    stop: StopReason::Stuck,
                });
            }
        }

        info!(job = %key, max_iterations, "Iteration limit reached");
        Ok(RunReport {
            job,
            runs,
            stop: StopReason::MaxIterations,
        })
    }

    /// Return stages to a clean `pending`; the status label may move down.
    pub async fn reset(&self, key: &JobKey, scope: ResetScope) -> Result<Job, EngineError> {
        let names: Vec<String> = match &scope {
            ResetScope::Stage(name) => vec![self.stage_definition(name)?.name.clone()],
            ResetScope::From(name) => {
                self.stage_definition(name)?;
                let start = self.registry.position(name).unwrap_or_default();
                self.registry.names().split_off(start)
            }
            ResetScope::All => self.registry.names(),
        };

        let _serial = self.locks.acquire(key).await;
        let (mut job, _lock) = self.open(key)?;
        for name in &names {
            job.stage_mut(name).reset();
        }
        job.touch();
        self.persist(&mut job, true)?;
        info!(job = %key, stages = ?names, status = %job.status, "Reset stages");
        Ok(job)
    }

    /// Re-derive stage states from the artifacts on disk.
    pub async fn reconcile(
        &self,
        key: &JobKey,
        allow_downgrade: bool,
    ) -> Result<ReconcileReport, EngineError> {
        let _serial = self.locks.acquire(key).await;
        let (mut job, _lock) = self.open(key)?;
        let job_dir = self.store.job_dir(key);
        let changes = Reconciler::new(&self.registry, &job_dir)
            .validating(validator_for(&self.config, &job.metadata))
            .reconcile(&mut job, allow_downgrade);
        if !changes.is_empty() {
            job.touch();
        }
        self.persist(&mut job, allow_downgrade)?;
        info!(job = %key, changes = changes.len(), status = %job.status, "Reconciled job");
        Ok(ReconcileReport { job, changes })
    }

    fn stage_definition(&self, name: &str) -> Result<&StageDefinition, EngineError> {
        self.registry
            .get(name)
            .ok_or_else(|| EngineError::UnknownStage {
                stage: name.to_string(),
                known: self.registry.names().join(", "),
            })
    }

    /// Load the record under the job's file lock. The record must exist.
    fn open(&self, key: &JobKey) -> Result<(Job, FileLock), EngineError> {
        if !self.store.exists(key) {
            // Surfaces NotFound/Corrupt without creating the job directory.
            self.store.load(key)?;
        }
        let lock = FileLock::acquire(&self.store.job_dir(key), &key.to_string(), self.force_lock)?;
        let mut job = self.store.load(key)?;
        let added = job.sync_with_registry(&self.registry.names());
        if !added.is_empty() {
            debug!(job = %key, stages = ?added, "Synthesized stages missing from record");
        }
        Ok((job, lock))
    }

    fn persist(&self, job: &mut Job, allow_downgrade: bool) -> Result<bool, EngineError> {
        job.refresh_status(
            &self.registry.names(),
            &self.registry.checkpoints(),
            allow_downgrade,
        );
        Ok(self.store.save(job)?)
    }

    async fn execute(
        &self,
        job: &mut Job,
        definition: &StageDefinition,
    ) -> Result<StageRun, EngineError> {
        let key = job.key.clone();
        let job_str = key.to_string();
        let name = definition.name.clone();
        let started = Instant::now();

        let waiting: Vec<String> = self
            .registry
            .predecessors(&name)
            .iter()
            .filter(|p| !job.is_stage_completed(&p.name))
            .map(|p| p.name.clone())
            .collect();
        if !waiting.is_empty() {
            let message = format!("waiting on {}", waiting.join(", "));
            let hints: Vec<String> = waiting
                .iter()
                .map(|w| format!("Run stage '{w}' first"))
                .collect();
            job.stage_mut(&name).park(
                Utc::now(),
                ErrorCode::PrerequisiteIncomplete,
                message.clone(),
                hints.clone(),
            );
            let outcome = StageOutcome::from_parts(ErrorCode::PrerequisiteIncomplete, message, hints);
            job.touch();
            self.persist(job, false)?;
            log_stage_pending(&job_str, &name, ErrorCode::PrerequisiteIncomplete.as_str(), 0);
            return Ok(StageRun {
                stage: name,
                outcome,
                job: job.clone(),
            });
        }

        let attempt = {
            let state = job.stage_mut(&name);
            state.begin(Utc::now());
            state.details.attempts
        };
        job.touch();
        self.persist(job, false)?;
        log_stage_start(&job_str, &name, attempt);

        let job_dir = self.store.job_dir(&key);
        let metadata = job.metadata.clone();
        let mut ctx = StageContext::new(
            &key,
            &job_dir,
            &metadata,
            definition,
            &self.config,
            &self.cache,
            self.gateway.as_ref(),
        );
        let result = handlers::execute(&mut ctx)
            .instrument(stage_span(&job_str, &name))
            .await;
        let ledger = ctx.into_ledger();

        let outcome = match result {
            Ok(()) => match outputs::verify(definition, &job_dir, &key) {
                Ok(fingerprints) => {
                    let state = job.stage_mut(&name);
                    state.details.outputs = fingerprints;
                    state.complete(Utc::now());
                    StageOutcome::Completed
                }
                // A missing output stays resumable: re-running the stage may produce it
                Err(problem @ (OutputProblem::Missing(_) | OutputProblem::Empty(_))) => {
                    StageOutcome::Pending {
                        code: problem.code(),
                        message: problem.message(),
                        hints: output_hints(&job_dir),
                    }
                }
                Err(problem) => {
                    StageOutcome::from_parts(problem.code(), problem.message(), output_hints(&job_dir))
                }
            },
            Err(err) => {
                job.stage_mut(&name).details.issues = err.issues().to_vec();
                StageOutcome::from_error(&err)
            }
        };

        let state = job.stage_mut(&name);
        state.details.generations = ledger.generations;
        state.details.quality_gate = ledger.quality_gate;
        if state.details.issues.is_empty() {
            state.details.issues = ledger.issues;
        }
        match &outcome {
            StageOutcome::Completed => {}
            StageOutcome::Pending {
                code,
                message,
                hints,
            }
            | StageOutcome::Fatal {
                code,
                message,
                hints,
            } => state.park(Utc::now(), *code, message.clone(), hints.clone()),
        }
        job.touch();
        self.persist(job, false)?;

        let elapsed = started.elapsed().as_millis();
        match &outcome {
            StageOutcome::Completed => log_stage_complete(&job_str, &name, elapsed),
            other => log_stage_pending(&job_str, &name, &other.to_string(), elapsed),
        }
        Ok(StageRun {
            stage: name,
            outcome,
            job: job.clone(),
        })
    }
}

fn output_hints(job_dir: &Utf8Path) -> Vec<String> {
    vec![
        format!("Check the stage outputs under {job_dir}"),
        "Re-run the stage".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, prose};
    use scriptline_config::{OutputSpec, StageKind};
    use scriptline_llm::{ScriptedGateway, StubGateway, tasks};
    use scriptline_status::{JobStatus, StageStatus};
    use scriptline_utils::PathTemplate;

    fn two_stage_config() -> Config {
        let stage = |name: &str, out: &str| {
            StageDefinition::new(name, StageKind::Generate)
                .output(OutputSpec::required(PathTemplate::parse(out).unwrap()))
        };
        Config::builder()
            .stages(vec![stage("a", "a.md"), stage("b", "b.md")])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_next_skips_completed_stage() {
        let fixture = Fixture::new(two_stage_config());
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push("b", "Stage b output.");
        let orchestrator = fixture.orchestrator(gateway.clone());
        let mut job = orchestrator
            .init(&fixture.key, JobMetadata::default(), false)
            .unwrap();
        job.stage_mut("a").complete(Utc::now());
        orchestrator.store().save(&job).unwrap();

        let step = orchestrator.run_next(&fixture.key).await.unwrap();

        let NextStep::Ran(run) = step else {
            panic!("expected a stage to run");
        };
        assert_eq!(run.stage, "b");
        assert_eq!(run.outcome, StageOutcome::Completed);
        assert_eq!(gateway.calls("a"), 0);
        assert_eq!(gateway.calls("b"), 1);
        assert_eq!(run.job.status, JobStatus::Completed);
        assert_eq!(run.job.stage("a"), job.stage("a"));
    }

    #[tokio::test]
    async fn test_unknown_stage_is_an_error() {
        let fixture = Fixture::new(two_stage_config());
        let orchestrator = fixture.orchestrator(Arc::new(StubGateway::new()));
        orchestrator
            .init(&fixture.key, JobMetadata::default(), false)
            .unwrap();

        let err = orchestrator.run_stage(&fixture.key, "c").await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownStage { .. }));
    }

    #[tokio::test]
    async fn test_missing_job_requires_init() {
        let fixture = Fixture::new(two_stage_config());
        let orchestrator = fixture.orchestrator(Arc::new(StubGateway::new()));

        let err = orchestrator.run_next(&fixture.key).await.unwrap_err();
        assert_eq!(
            err.to_exit_code(),
            scriptline_utils::exit_codes::ExitCode::JOB_NOT_FOUND
        );
        assert!(!fixture.job_dir.exists());
    }

    #[tokio::test]
    async fn test_prerequisites_gate_run_stage() {
        let fixture = Fixture::new(two_stage_config());
        let gateway = Arc::new(ScriptedGateway::new());
        let orchestrator = fixture.orchestrator(gateway.clone());
        orchestrator
            .init(&fixture.key, JobMetadata::default(), false)
            .unwrap();

        let run = orchestrator.run_stage(&fixture.key, "b").await.unwrap();

        assert!(matches!(
            run.outcome,
            StageOutcome::Pending {
                code: ErrorCode::PrerequisiteIncomplete,
                ..
            }
        ));
        assert_eq!(gateway.total_calls(), 0);
        assert_eq!(run.job.stage("b").unwrap().status, StageStatus::Pending);
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_stage_pending_and_job_failed() {
        let fixture = Fixture::new(two_stage_config());
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_err("a", scriptline_llm::LlmError::ProviderOutage("503".into()));
        let orchestrator = fixture.orchestrator(gateway.clone());
        orchestrator
            .init(&fixture.key, JobMetadata::default(), false)
            .unwrap();

        let run = orchestrator.run_stage(&fixture.key, "a").await.unwrap();

        assert!(run.outcome.is_fatal());
        let state = run.job.stage("a").unwrap();
        assert_eq!(state.status, StageStatus::Pending);
        assert_eq!(state.details.error, Some(ErrorCode::GatewayFailure));
        assert_eq!(state.details.attempts, 1);
        assert_eq!(run.job.status, JobStatus::Failed);

        // The persisted record matches what was returned
        let reloaded = orchestrator.status(&fixture.key).unwrap();
        assert_eq!(reloaded.stage("a"), run.job.stage("a"));
    }

    #[tokio::test]
    async fn test_run_all_stops_when_stuck() {
        let fixture = Fixture::new(two_stage_config());
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push("a", "Stage a output.");
        let orchestrator = fixture.orchestrator(gateway.clone());
        orchestrator
            .init(&fixture.key, JobMetadata::default(), false)
            .unwrap();

        let report = orchestrator
            .run_until_done_or_stuck(&fixture.key, 10)
            .await
            .unwrap();

        // a completes; b fails on its only run and the pending set does not shrink
        assert_eq!(report.stop, StopReason::Stuck);
        assert_eq!(report.runs.len(), 2);
        assert!(report.job.is_stage_completed("a"));
        assert!(!report.job.is_stage_completed("b"));
    }

    #[tokio::test]
    async fn test_run_all_completes_default_pipeline_with_stub() {
        let fixture = Fixture::new(Config::default());
        let orchestrator = fixture.orchestrator(Arc::new(StubGateway::new()));
        orchestrator
            .init(&fixture.key, JobMetadata::default(), false)
            .unwrap();

        let report = orchestrator
            .run_until_done_or_stuck(&fixture.key, 20)
            .await
            .unwrap();

        assert_eq!(report.stop, StopReason::Completed, "{:?}", report.last_outcome());
        assert_eq!(report.job.status, JobStatus::Completed);
        assert!(fixture.job_dir.join("final/narration.txt").is_file());
        let script = report.job.stage("script").unwrap();
        assert!(script.details.quality_gate.is_some());
        assert!(script.details.outputs.contains_key("content/script.md"));
    }

    #[tokio::test]
    async fn test_skip_list_marks_stage_skipped() {
        let config = Config::builder()
            .stages(two_stage_config().pipeline.stages.unwrap())
            .skip(&["a"])
            .build()
            .unwrap();
        let fixture = Fixture::new(config);
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push("b", "Stage b output.");
        let orchestrator = fixture.orchestrator(gateway.clone());
        orchestrator
            .init(&fixture.key, JobMetadata::default(), false)
            .unwrap();

        let NextStep::Ran(run) = orchestrator.run_next(&fixture.key).await.unwrap() else {
            panic!("expected b to run");
        };
        assert_eq!(run.stage, "b");
        assert!(run.job.stage("a").unwrap().details.skipped);
        assert_eq!(gateway.calls("a"), 0);
    }

    #[tokio::test]
    async fn test_reset_from_allows_downgrade() {
        let fixture = Fixture::new(Config::default());
        let orchestrator = fixture.orchestrator(Arc::new(StubGateway::new()));
        orchestrator
            .init(&fixture.key, JobMetadata::default(), false)
            .unwrap();
        orchestrator
            .run_until_done_or_stuck(&fixture.key, 20)
            .await
            .unwrap();

        let job = orchestrator
            .reset(&fixture.key, ResetScope::From("script".into()))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.is_stage_completed("draft"));
        assert_eq!(job.stage("script").unwrap().status, StageStatus::Pending);
        assert_eq!(job.stage("narration").unwrap().status, StageStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_runs_on_one_key_serialize() {
        let fixture = Fixture::new(two_stage_config());
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.always("a", prose(200, "---"));
        gateway.always("b", prose(200, "---"));
        let orchestrator = fixture.orchestrator(gateway.clone());
        orchestrator
            .init(&fixture.key, JobMetadata::default(), false)
            .unwrap();

        let (first, second) = tokio::join!(
            orchestrator.run_next(&fixture.key),
            orchestrator.run_next(&fixture.key)
        );

        let ran: Vec<String> = [first.unwrap(), second.unwrap()]
            .into_iter()
            .filter_map(|step| match step {
                NextStep::Ran(run) => Some(run.stage),
                NextStep::Finished(_) => None,
            })
            .collect();
        assert_eq!(ran, vec!["a", "b"]);
        assert_eq!(gateway.calls(tasks::JUDGE), 0);
        assert_eq!(gateway.calls("a"), 1);
        assert_eq!(orchestrator.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_keyed_locks_are_released_per_key() {
        let fixture = Fixture::new(two_stage_config());
        let orchestrator = fixture.orchestrator(Arc::new(ScriptedGateway::new()));
        let other = JobKey::new("CH01", 2).unwrap();

        let first = orchestrator.locks.acquire(&fixture.key).await;
        let second = orchestrator.locks.acquire(&other).await;
        assert_eq!(orchestrator.locks.len(), 2);

        drop(first);
        assert_eq!(orchestrator.locks.len(), 1);
        drop(second);
        assert_eq!(orchestrator.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_run_all_on_finished_job_reports_completed() {
        let fixture = Fixture::new(two_stage_config());
        let gateway = Arc::new(ScriptedGateway::new());
        let orchestrator = fixture.orchestrator(gateway.clone());
        let mut job = orchestrator
            .init(&fixture.key, JobMetadata::default(), false)
            .unwrap();
        job.stage_mut("a").complete(Utc::now());
        job.stage_mut("b").complete(Utc::now());
        orchestrator.store().save(&job).unwrap();

        let report = orchestrator
            .run_until_done_or_stuck(&fixture.key, 0)
            .await
            .unwrap();

        assert_eq!(report.stop, StopReason::Completed);
        assert!(report.runs.is_empty());
        assert_eq!(gateway.calls("a") + gateway.calls("b"), 0);
    }
}
