//! Commands over the job record: init, status, reconcile, reset.

use anyhow::Result;
use serde_json::json;

use scriptline_engine::ResetScope;
use scriptline_status::JobMetadata;
use scriptline_utils::ExitCode;

use super::output::{print_job, print_json};
use crate::cli::ResetArgs;
use super::{CommandContext, parse_key};

/// Seed metadata collected from `init` flags.
#[derive(Debug, Default)]
pub struct InitOptions {
    pub title: Option<String>,
    pub style: Option<String>,
    pub min_chars: Option<usize>,
    pub max_chars: Option<usize>,
    pub force: bool,
}

pub fn execute_init_command(ctx: &CommandContext, key: &str, options: InitOptions) -> Result<ExitCode> {
    let key = parse_key(key)?;
    let orchestrator = ctx.offline_orchestrator()?;
    let metadata = JobMetadata {
        title: options.title,
        style: options.style,
        target_min_chars: options.min_chars,
        target_max_chars: options.max_chars,
        ..JobMetadata::default()
    };
    let job = orchestrator.init(&key, metadata, options.force)?;

    if ctx.json {
        print_json(&job)?;
    } else {
        println!("✓ Initialized job {key}");
        println!("  Directory: {}", orchestrator.store().job_dir(&key));
        println!();
        print_job(&job, &orchestrator.registry().names());
    }
    Ok(ExitCode::SUCCESS)
}

pub fn execute_status_command(ctx: &CommandContext, key: &str) -> Result<ExitCode> {
    let key = parse_key(key)?;
    let orchestrator = ctx.offline_orchestrator()?;
    let job = orchestrator.status(&key)?;

    if ctx.json {
        print_json(&job)?;
    } else {
        print_job(&job, &orchestrator.registry().names());
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn execute_reconcile_command(
    ctx: &CommandContext,
    key: &str,
    allow_downgrade: bool,
) -> Result<ExitCode> {
    let key = parse_key(key)?;
    let orchestrator = ctx.offline_orchestrator()?;
    let report = orchestrator.reconcile(&key, allow_downgrade).await?;

    if ctx.json {
        print_json(&report)?;
    } else {
        if report.changes.is_empty() {
            println!("No drift found for {key}");
        }
        for change in &report.changes {
            println!(
                "  {}: {} → {} ({})",
                change.stage, change.from, change.to, change.reason
            );
        }
        println!();
        print_job(&report.job, &orchestrator.registry().names());
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn execute_reset_command(
    ctx: &CommandContext,
    args: &ResetArgs,
) -> Result<ExitCode> {
    let key = parse_key(&args.key)?;
    let scope = args.scope();
    let orchestrator = ctx.offline_orchestrator()?;
    let job = orchestrator.reset(&key, scope.clone()).await?;

    if ctx.json {
        print_json(&json!({ "reset": describe(&scope), "job": job }))?;
    } else {
        println!("✓ Reset {} of {key}", describe(&scope));
        println!();
        print_job(&job, &orchestrator.registry().names());
    }
    Ok(ExitCode::SUCCESS)
}

fn describe(scope: &ResetScope) -> String {
    match scope {
        ResetScope::Stage(stage) => format!("stage '{stage}'"),
        ResetScope::From(stage) => format!("stages from '{stage}'"),
        ResetScope::All => "all stages".to_string(),
    }
}
