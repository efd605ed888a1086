use tracing::debug;

use crate::context::StageContext;
use crate::error::StageError;

/// Deterministic rewrite of the first input into the first output.
pub(super) fn run(ctx: &mut StageContext<'_>) -> Result<(), StageError> {
    let source = ctx.read_input(0)?;
    let rendered = ctx.pipeline()?.apply(&source);
    if rendered.trim().is_empty() {
        return Err(StageError::EmptyContent {
            task: ctx.stage.name.clone(),
        });
    }
    let output = ctx.output_path(0)?;
    ctx.write(&output, &rendered)?;
    debug!(job = %ctx.key, stage = %ctx.stage.name, output = %output, "Rendered output");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactCache;
    use crate::test_support::Fixture;
    use scriptline_llm::ScriptedGateway;

    #[test]
    fn test_markers_become_pauses() {
        let fixture = Fixture::new(Default::default());
        fixture.write("content/script.md", "First part.\n\n---\n\nSecond part.\n");
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let gateway = ScriptedGateway::new();
        let stage = fixture.stage("narration");
        let mut ctx = fixture.context(&stage, &cache, &gateway);

        run(&mut ctx).unwrap();

        assert_eq!(
            fixture.read("final/narration.txt"),
            "First part.\n\nSecond part.\n"
        );
        assert_eq!(gateway.total_calls(), 0);
    }

    #[test]
    fn test_missing_script_is_missing_input() {
        let fixture = Fixture::new(Default::default());
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let gateway = ScriptedGateway::new();
        let stage = fixture.stage("narration");
        let mut ctx = fixture.context(&stage, &cache, &gateway);

        assert!(matches!(run(&mut ctx), Err(StageError::MissingInput { .. })));
    }
}
