//! The quality gate: judge, fix, rescue and rebuild a draft until it passes
//! both the validator and the judge, or the round budget runs out.
//!
//! Gateway calls are bounded: at most `max_rounds` judge calls and
//! `max_rounds - 1` fix calls, plus `rescue_passes` calls per rescue
//! invocation, plus (when rebuild is enabled) one section call per planned
//! section and a single extra judge call.

pub mod judge;
pub mod rebuild;
pub mod rescue;

use camino::Utf8PathBuf;
use tracing::{debug, info, warn};

use scriptline_config::QualityGateConfig;
use scriptline_llm::{Message, tasks};
use scriptline_status::{GateOutcome, GateSummary, QualityGateRound, Verdict};
use scriptline_validation::{TransformPipeline, ValidationReport, validate};

use crate::context::StageContext;
use crate::error::StageError;

pub use judge::{JudgeReport, parse_judge_reply};
pub use rebuild::plan_sections;
pub use rescue::truncate_proportionally;

/// A candidate that passed validator and judge.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub text: String,
    pub report: ValidationReport,
}

pub(crate) struct QualityGate<'c, 'a> {
    ctx: &'c mut StageContext<'a>,
    policy: QualityGateConfig,
    pipeline: TransformPipeline,
    rounds: Vec<QualityGateRound>,
    rebuilt: bool,
}

impl<'c, 'a> QualityGate<'c, 'a> {
    pub fn new(ctx: &'c mut StageContext<'a>) -> Result<Self, StageError> {
        let policy = ctx.config.quality_gate.clone();
        let pipeline = ctx.pipeline()?;
        Ok(Self {
            ctx,
            policy,
            pipeline,
            rounds: Vec::new(),
            rebuilt: false,
        })
    }

    /// Run the gate over `draft`. The round log lands in the stage ledger
    /// whatever the result.
    pub async fn run(mut self, draft: &str) -> Result<GateResult, StageError> {
        let result = self.converge(draft).await;
        let outcome = match &result {
            Ok(_) => GateOutcome::Passed,
            Err(StageError::ConvergenceExhausted { .. }) => GateOutcome::Exhausted,
            Err(StageError::FixRejected { .. }) => GateOutcome::FixRejected,
            Err(StageError::RescueFailed { .. }) => GateOutcome::RescueFailed,
            Err(_) => GateOutcome::Failed,
        };
        if let Ok(passed) = &result {
            self.ctx.ledger.issues = passed.report.issues.clone();
        }
        self.ctx.ledger.quality_gate = Some(GateSummary {
            rounds: self.rounds,
            outcome,
            rebuilt: self.rebuilt,
        });
        result
    }

    async fn converge(&mut self, draft: &str) -> Result<GateResult, StageError> {
        let mut candidate = self.clean(draft, tasks::FIX)?;
        let mut rescued = self.settle(&mut candidate).await?;

        let max_rounds = self.policy.max_rounds.max(1);
        let mut last_must_fix = Vec::new();
        for round in 1..=max_rounds {
            let report = validate(&candidate, &self.ctx.validator);
            let verdict = self.judge(&candidate, &report).await?;
            self.record_round(round, &verdict, &candidate, &report, std::mem::take(&mut rescued))?;

            if verdict.verdict == Verdict::Pass {
                info!(job = %self.ctx.key, round, "Quality gate passed");
                return Ok(GateResult {
                    text: candidate,
                    report,
                });
            }
            debug!(job = %self.ctx.key, round, must_fix = verdict.must_fix.len(), "Judge failed candidate");
            last_must_fix = verdict.must_fix;
            if round == max_rounds {
                break;
            }

            let fixed = self.fix(&candidate, &last_must_fix).await?;
            let fixed_report = validate(&fixed, &self.ctx.validator);
            if fixed_report.hard_errors().next().is_some() {
                warn!(job = %self.ctx.key, round, errors = fixed_report.error_count(), "Rejecting fix output");
                return Err(StageError::FixRejected {
                    issues: fixed_report.issues,
                });
            }
            candidate = fixed;
            rescued = self.settle(&mut candidate).await?;
        }

        if self.policy.rebuild
            && let Some(result) = self.rebuild_and_judge(&candidate, max_rounds + 1).await?
        {
            return Ok(result);
        }

        Err(StageError::ConvergenceExhausted {
            rounds: max_rounds,
            must_fix: last_must_fix,
        })
    }

    /// Run the transform pipeline; blank output is a collaborator failure.
    fn clean(&self, text: &str, task: &str) -> Result<String, StageError> {
        let cleaned = self.pipeline.apply(text);
        if cleaned.trim().is_empty() {
            return Err(StageError::EmptyContent {
                task: task.to_string(),
            });
        }
        Ok(cleaned)
    }

    /// Rescue the candidate in place when its only error is length.
    async fn settle(&mut self, candidate: &mut String) -> Result<Vec<String>, StageError> {
        let report = validate(candidate, &self.ctx.validator);
        let length_error = report.length_issue().is_some_and(|i| i.is_error());
        if !length_error || !report.is_length_only() {
            return Ok(Vec::new());
        }
        let rescued = self.rescue(candidate).await?;
        *candidate = rescued.text;
        Ok(rescued.applied)
    }

    async fn judge(
        &mut self,
        candidate: &str,
        report: &ValidationReport,
    ) -> Result<JudgeReport, StageError> {
        let system = "You review narration scripts before recording. Reply with a single JSON \
                      object: {\"verdict\": \"pass\" or \"fail\", \"must_fix\": [strings], \
                      \"notes\": string}. List only problems that block recording.";
        let user = format!(
            "{}Counted characters: {}\n\nScript:\n{}",
            self.ctx.job_brief(),
            report.stats.char_count,
            candidate
        );
        let request = self
            .ctx
            .request(tasks::JUDGE, vec![Message::system(system), Message::user(user)], None);
        let reply = self.ctx.call(request).await?;
        let mut verdict = parse_judge_reply(&reply.content)?;
        verdict.merge_validation(report);
        Ok(verdict)
    }

    async fn fix(&mut self, candidate: &str, must_fix: &[String]) -> Result<String, StageError> {
        let system = "Revise the narration script so every listed problem is resolved. Keep \
                      everything else unchanged. Return only the full revised script.";
        let list: String = must_fix.iter().map(|item| format!("- {item}\n")).collect();
        let user = format!(
            "{}\nProblems to fix:\n{list}\nScript:\n{candidate}",
            self.ctx.job_brief()
        );
        let target = self.ctx.validator.target_chars();
        let request = self.ctx.request(
            tasks::FIX,
            vec![Message::system(system), Message::user(user)],
            Some(target),
        );
        let generation = self.ctx.call(request).await?;
        self.clean(&generation.content, tasks::FIX)
    }

    fn record_round(
        &mut self,
        round: u32,
        verdict: &JudgeReport,
        candidate: &str,
        report: &ValidationReport,
        rescue: Vec<String>,
    ) -> Result<(), StageError> {
        let snapshot = if self.policy.snapshots {
            let rel = format!("gate/round-{round}.md");
            let path: Utf8PathBuf = self.ctx.job_dir.join(&rel);
            self.ctx.write(&path, candidate)?;
            Some(rel)
        } else {
            None
        };
        self.rounds.push(QualityGateRound {
            round,
            verdict: verdict.verdict,
            must_fix: verdict.must_fix.clone(),
            candidate: snapshot,
            char_count: report.stats.char_count,
            rescue,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactCache;
    use crate::test_support::{Fixture, prose};
    use scriptline_llm::ScriptedGateway;
    use scriptline_status::GateOutcome;

    const PASS: &str = r#"{"verdict":"pass","must_fix":[]}"#;
    const FAIL: &str = r#"{"verdict":"fail","must_fix":["the hook is weak"]}"#;

    async fn run_gate(
        fixture: &Fixture,
        gateway: &ScriptedGateway,
        draft: &str,
    ) -> (Result<GateResult, StageError>, Option<GateSummary>) {
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let stage = fixture.stage("script");
        let mut ctx = fixture.context(&stage, &cache, gateway);
        let result = match QualityGate::new(&mut ctx) {
            Ok(gate) => gate.run(draft).await,
            Err(e) => Err(e),
        };
        (result, ctx.into_ledger().quality_gate)
    }

    #[tokio::test]
    async fn test_passes_clean_draft_in_one_round() {
        let fixture = Fixture::new(Default::default());
        let gateway = ScriptedGateway::new();
        gateway.push(tasks::JUDGE, PASS);

        let draft = prose(1300, "---");
        let (result, summary) = run_gate(&fixture, &gateway, &draft).await;

        let result = result.unwrap();
        assert!(!result.report.has_errors());
        let summary = summary.unwrap();
        assert_eq!(summary.outcome, GateOutcome::Passed);
        assert_eq!(summary.rounds.len(), 1);
        assert!(fixture.job_dir.join("gate/round-1.md").is_file());
        assert_eq!(gateway.calls(tasks::FIX), 0);
    }

    #[tokio::test]
    async fn test_never_passing_judge_is_bounded() {
        let fixture = Fixture::new(Default::default());
        let gateway = ScriptedGateway::new();
        gateway.always(tasks::JUDGE, FAIL);
        gateway.always(tasks::FIX, prose(1300, "---"));

        let (result, summary) = run_gate(&fixture, &gateway, &prose(1300, "---")).await;

        match result {
            Err(StageError::ConvergenceExhausted { rounds, must_fix }) => {
                assert_eq!(rounds, 3);
                assert_eq!(must_fix, vec!["the hook is weak"]);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(gateway.calls(tasks::JUDGE), 3);
        assert_eq!(gateway.calls(tasks::FIX), 2);
        assert_eq!(summary.unwrap().outcome, GateOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_fix_breaking_structure_is_rejected() {
        let fixture = Fixture::new(Default::default());
        let gateway = ScriptedGateway::new();
        gateway.push(tasks::JUDGE, FAIL);
        let draft = prose(1300, "---");
        let first = draft.split("\n\n").next().unwrap().to_string();
        gateway.push(tasks::FIX, format!("{}\n\n{first}\n", draft.trim_end()));

        let (result, summary) = run_gate(&fixture, &gateway, &draft).await;

        assert!(matches!(result, Err(StageError::FixRejected { .. })));
        assert_eq!(summary.unwrap().outcome, GateOutcome::FixRejected);
    }

    #[tokio::test]
    async fn test_fix_then_pass() {
        let fixture = Fixture::new(Default::default());
        let gateway = ScriptedGateway::new();
        gateway.push(tasks::JUDGE, FAIL).push(tasks::JUDGE, PASS);
        gateway.push(tasks::FIX, prose(1250, "---"));

        let (result, summary) = run_gate(&fixture, &gateway, &prose(1300, "---")).await;

        assert!(result.is_ok());
        let rounds = summary.unwrap().rounds;
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].verdict, Verdict::Fail);
        assert_eq!(rounds[1].verdict, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_unparseable_judge_fails_the_gate() {
        let fixture = Fixture::new(Default::default());
        let gateway = ScriptedGateway::new();
        gateway.push(tasks::JUDGE, "Looks fine to me!");

        let (result, summary) = run_gate(&fixture, &gateway, &prose(1300, "---")).await;

        assert!(matches!(result, Err(StageError::JudgeUnparseable { .. })));
        assert_eq!(summary.unwrap().outcome, GateOutcome::Failed);
    }

    #[tokio::test]
    async fn test_rebuild_after_exhaustion_gets_one_judge() {
        let config = scriptline_config::Config::builder()
            .max_rounds(1)
            .rebuild(true)
            .rebuild_sections(2)
            .build()
            .unwrap();
        let fixture = Fixture::new(config);
        let gateway = ScriptedGateway::new();
        gateway.push(tasks::JUDGE, FAIL).push(tasks::JUDGE, PASS);
        gateway.push(tasks::REBUILD_SECTION, prose(650, "---"));
        gateway.push(tasks::REBUILD_SECTION, prose(650, "---"));

        let (result, summary) = run_gate(&fixture, &gateway, &prose(1300, "---")).await;

        assert!(result.is_ok(), "{result:?}");
        assert_eq!(gateway.calls(tasks::JUDGE), 2);
        assert_eq!(gateway.calls(tasks::REBUILD_SECTION), 2);
        let summary = summary.unwrap();
        assert!(summary.rebuilt);
        assert_eq!(summary.rounds.len(), 2);
    }
}
