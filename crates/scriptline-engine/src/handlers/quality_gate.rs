use camino::Utf8PathBuf;
use serde_json::json;
use tracing::info;

use scriptline_config::ApplyMode;
use scriptline_status::GateOutcome;
use scriptline_validation::find_placeholder;

use crate::context::StageContext;
use crate::error::StageError;
use crate::gate::QualityGate;

/// Converge the first input through the quality gate and write the result.
///
/// The second declared output, when present, receives a JSON report of the
/// run whether the gate passed or not.
pub(super) async fn run(ctx: &mut StageContext<'_>) -> Result<(), StageError> {
    let draft = ctx.read_input(0)?;
    let result = match QualityGate::new(ctx) {
        Ok(gate) => gate.run(&draft).await,
        Err(e) => Err(e),
    };

    let outcome = match result {
        Ok(passed) => publish(ctx, &passed.text),
        Err(e) => Err(e),
    };
    write_report(ctx, outcome.as_ref().err())?;
    outcome
}

fn publish(ctx: &mut StageContext<'_>, text: &str) -> Result<(), StageError> {
    let target = ctx.output_path(0)?;
    let rejects_placeholders = ctx.stage.outputs[0].reject_placeholders;
    if rejects_placeholders && let Some((line, token)) = find_placeholder(text) {
        return Err(StageError::Placeholder {
            path: ctx.relative(&target),
            token,
            line,
        });
    }

    match ctx.config.quality_gate.apply_mode {
        ApplyMode::Apply => {
            ctx.write(&target, text)?;
            info!(job = %ctx.key, output = %ctx.relative(&target), "Quality gate output applied");
            Ok(())
        }
        ApplyMode::Propose => {
            let proposed = Utf8PathBuf::from(format!("{target}.proposed"));
            ctx.write(&proposed, text)?;
            if let Some(summary) = ctx.ledger.quality_gate.as_mut() {
                summary.outcome = GateOutcome::Proposed;
            }
            info!(job = %ctx.key, proposed = %proposed, "Quality gate output proposed");
            Err(StageError::AwaitingApproval {
                path: proposed.to_string(),
            })
        }
    }
}

fn write_report(ctx: &StageContext<'_>, error: Option<&StageError>) -> Result<(), StageError> {
    if ctx.stage.outputs.len() < 2 {
        return Ok(());
    }
    let path = ctx.output_path(1)?;
    let report = json!({
        "job": ctx.key,
        "stage": ctx.stage.name,
        "quality_gate": ctx.ledger.quality_gate,
        "issues": ctx.ledger.issues,
        "error": error.map(|e| json!({
            "code": e.code(),
            "message": e.to_string(),
            "issues": e.issues(),
        })),
        "limits": {
            "min_chars": ctx.validator.min_chars,
            "max_chars": ctx.validator.max_chars,
            "target_chars": ctx.validator.target_chars(),
        },
    });
    let body = serde_json::to_string_pretty(&report)
        .map_err(|e| StageError::Internal(format!("quality gate report: {e}")))?;
    ctx.write(&path, &format!("{body}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactCache;
    use crate::test_support::{Fixture, prose};
    use scriptline_config::Config;
    use scriptline_llm::{ScriptedGateway, StubGateway, tasks};

    #[tokio::test]
    async fn test_apply_writes_script_and_report() {
        let fixture = Fixture::new(Config::default());
        fixture.write("content/draft.md", &prose(1300, "---"));
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let stub = StubGateway::new();
        let stage = fixture.stage("script");
        let mut ctx = fixture.context(&stage, &cache, &stub);

        run(&mut ctx).await.unwrap();

        assert!(fixture.job_dir.join("content/script.md").is_file());
        let report: serde_json::Value =
            serde_json::from_str(&fixture.read("content/quality_gate.json")).unwrap();
        assert_eq!(report["quality_gate"]["outcome"], "passed");
        assert!(report["error"].is_null());
    }

    #[tokio::test]
    async fn test_propose_waits_for_approval() {
        let config = Config::builder()
            .apply_mode(ApplyMode::Propose)
            .build()
            .unwrap();
        let fixture = Fixture::new(config);
        fixture.write("content/draft.md", &prose(1300, "---"));
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let stub = StubGateway::new();
        let stage = fixture.stage("script");
        let mut ctx = fixture.context(&stage, &cache, &stub);

        let err = run(&mut ctx).await.unwrap_err();

        assert!(matches!(err, StageError::AwaitingApproval { .. }));
        assert!(!fixture.job_dir.join("content/script.md").exists());
        assert!(fixture.job_dir.join("content/script.md.proposed").is_file());
        assert_eq!(
            ctx.into_ledger().quality_gate.unwrap().outcome,
            GateOutcome::Proposed
        );
    }

    #[tokio::test]
    async fn test_placeholder_in_passing_text_is_rejected() {
        let fixture = Fixture::new(Config::default());
        let draft = format!("{}\nWe close with [INSERT QUOTE] here.\n", prose(1250, "---").trim_end());
        fixture.write("content/draft.md", &draft);
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let gateway = ScriptedGateway::new();
        gateway.always(tasks::JUDGE, r#"{"verdict":"pass"}"#);
        let stage = fixture.stage("script");
        let mut ctx = fixture.context(&stage, &cache, &gateway);

        let err = run(&mut ctx).await.unwrap_err();

        assert!(matches!(err, StageError::Placeholder { .. }), "{err:?}");
        assert!(!fixture.job_dir.join("content/script.md").exists());
        let report: serde_json::Value =
            serde_json::from_str(&fixture.read("content/quality_gate.json")).unwrap();
        assert_eq!(report["error"]["code"], "semantic_mismatch");
    }
}
