use serde_json::json;
use tracing::{debug, info};

use scriptline_llm::{LlmError, Message};
use scriptline_utils::fingerprint_json;

use crate::cache::{CacheKey, CacheLookup};
use crate::context::StageContext;
use crate::error::StageError;

/// One gateway call per stage, through the artifact cache.
pub(super) async fn run(ctx: &mut StageContext<'_>) -> Result<(), StageError> {
    let stage = ctx.stage;
    let cache = ctx.cache;
    let inputs = ctx.read_inputs()?;
    let task = stage.task_name().to_string();
    let target = ctx.validator.target_chars();
    let request = ctx.request(&task, messages(ctx, &inputs), Some(target));

    let output = ctx.output_path(0)?;
    let output_rel = ctx.relative(&output);
    let fingerprint = fingerprint_json(&json!({
        "provider": ctx.config.llm.provider.to_string(),
        "task": &request.task,
        "messages": &request.messages,
        "model": &request.options.model,
        "max_tokens": request.options.max_tokens,
        "target_chars": request.options.target_chars,
        "marker": &ctx.validator.marker,
    }))
    .map_err(|e| StageError::Internal(format!("fingerprint: {e:#}")))?;
    let key = CacheKey {
        stage: &stage.name,
        output_path: &output_rel,
        fingerprint: &fingerprint,
    };

    let pipeline = ctx.pipeline()?;
    let cleaned = match cache.lookup(key)? {
        CacheLookup::Hit(entry) => {
            info!(job = %ctx.key, stage = %ctx.stage.name, "Using cached generation");
            ctx.record_cached(&task, &entry);
            pipeline.apply(entry.content.as_deref().unwrap_or_default())
        }
        CacheLookup::Waiting(entry) => {
            return Err(StageError::AwaitingExternal {
                entry: entry.to_string(),
            });
        }
        CacheLookup::Miss => match ctx.call(request.clone()).await {
            Ok(generation) => {
                // Only accepted output is cached, so a re-run asks again
                let cleaned = pipeline.apply(&generation.content);
                if !cleaned.trim().is_empty() {
                    cache.store_ready(key, &generation)?;
                }
                cleaned
            }
            Err(StageError::Gateway {
                source: LlmError::Deferred(reason),
                ..
            }) => {
                let entry = cache.store_pending(key, &request)?;
                info!(job = %ctx.key, stage = %ctx.stage.name, entry = %entry, reason = %reason, "Generation deferred to operator");
                return Err(StageError::AwaitingExternal {
                    entry: entry.to_string(),
                });
            }
            Err(e) => return Err(e),
        },
    };

    if cleaned.trim().is_empty() {
        return Err(StageError::EmptyContent { task });
    }
    ctx.write(&output, &cleaned)?;
    debug!(job = %ctx.key, stage = %ctx.stage.name, output = %output_rel, "Wrote generated output");
    Ok(())
}

fn messages(ctx: &StageContext<'_>, inputs: &[(String, String)]) -> Vec<Message> {
    let system = ctx.stage.prompt.clone().unwrap_or_else(|| {
        format!(
            "Produce the {} for a narrated script. Plain prose only.",
            ctx.stage.name
        )
    });
    let mut user = ctx.job_brief();
    for (path, content) in inputs {
        user.push_str(&format!("\n[{path}]\n{}\n", content.trim_end()));
    }
    vec![Message::system(system), Message::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactCache;
    use crate::test_support::{Fixture, prose};
    use scriptline_llm::{ManualGateway, ScriptedGateway};

    #[tokio::test]
    async fn test_generates_and_caches() {
        let fixture = Fixture::new(Default::default());
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let gateway = ScriptedGateway::new();
        gateway.push("research", "## Notes\n\nThe harbour opened in spring.\n");
        let stage = fixture.stage("research");

        let mut ctx = fixture.context(&stage, &cache, &gateway);
        run(&mut ctx).await.unwrap();
        assert_eq!(ctx.into_ledger().generations.len(), 1);
        // Default transforms drop the heading prefix
        assert_eq!(
            fixture.read("research/brief.md"),
            "Notes\n\nThe harbour opened in spring.\n"
        );

        // Same inputs again: served from the cache, no second call
        let mut ctx = fixture.context(&stage, &cache, &gateway);
        run(&mut ctx).await.unwrap();
        let ledger = ctx.into_ledger();
        assert!(ledger.generations[0].cached);
        assert_eq!(gateway.calls("research"), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_rejected_output_is_not_cached() {
        let fixture = Fixture::new(Default::default());
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let gateway = ScriptedGateway::new();
        // Nothing but a link: the transforms leave an empty brief
        gateway.push("research", "https://example.com/source");
        gateway.push("research", "The harbour opened in spring.");
        let stage = fixture.stage("research");

        let mut ctx = fixture.context(&stage, &cache, &gateway);
        let err = run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, StageError::EmptyContent { .. }), "{err:?}");
        assert_eq!(cache.stats().writes, 0);

        let mut ctx = fixture.context(&stage, &cache, &gateway);
        run(&mut ctx).await.unwrap();
        assert_eq!(gateway.calls("research"), 2);
        assert_eq!(fixture.read("research/brief.md"), "The harbour opened in spring.\n");
    }

    #[tokio::test]
    async fn test_changed_input_misses_the_cache() {
        let fixture = Fixture::new(Default::default());
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let gateway = ScriptedGateway::new();
        gateway.always("outline", prose(300, "---"));
        let stage = fixture.stage("outline");

        fixture.write("research/brief.md", "First brief.\n");
        let mut ctx = fixture.context(&stage, &cache, &gateway);
        run(&mut ctx).await.unwrap();

        fixture.write("research/brief.md", "Second brief.\n");
        let mut ctx = fixture.context(&stage, &cache, &gateway);
        run(&mut ctx).await.unwrap();

        assert_eq!(gateway.calls("outline"), 2);
    }

    #[tokio::test]
    async fn test_manual_provider_waits_on_cache_entry() {
        let fixture = Fixture::new(Default::default());
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let gateway = ManualGateway;
        let stage = fixture.stage("research");

        let mut ctx = fixture.context(&stage, &cache, &gateway);
        let err = run(&mut ctx).await.unwrap_err();
        let StageError::AwaitingExternal { entry } = err else {
            panic!("expected awaiting_external, got {err:?}");
        };
        assert!(entry.ends_with(".json"));
        assert!(!fixture.job_dir.join("research/brief.md").exists());

        // Still waiting until the operator marks the entry ready
        let mut ctx = fixture.context(&stage, &cache, &gateway);
        assert!(matches!(
            run(&mut ctx).await,
            Err(StageError::AwaitingExternal { .. })
        ));

        let raw = std::fs::read_to_string(&entry).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["status"] = "ready".into();
        value["content"] = "Operator supplied brief.".into();
        std::fs::write(&entry, value.to_string()).unwrap();

        let mut ctx = fixture.context(&stage, &cache, &gateway);
        run(&mut ctx).await.unwrap();
        assert_eq!(fixture.read("research/brief.md"), "Operator supplied brief.\n");
    }

    #[tokio::test]
    async fn test_gateway_failure_propagates() {
        let fixture = Fixture::new(Default::default());
        let cache = ArtifactCache::new(fixture.home.join("cache"));
        let gateway = ScriptedGateway::new();
        gateway.push_err("research", LlmError::Timeout {
            duration: std::time::Duration::from_secs(120),
        });
        let stage = fixture.stage("research");

        let mut ctx = fixture.context(&stage, &cache, &gateway);
        let err = run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Gateway { .. }));
        assert_eq!(ctx.into_ledger().generations.len(), 0);
    }
}
