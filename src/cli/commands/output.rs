//! Human and JSON rendering of command results.

use anyhow::{Context, Result};
use serde::Serialize;

use scriptline_engine::StageOutcome;
use scriptline_status::Job;
use scriptline_utils::emit_jcs;
use scriptline_validation::ValidationReport;

/// Print `value` as one line of canonical JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = emit_jcs(value).context("Failed to emit JSON")?;
    println!("{json}");
    Ok(())
}

/// Job header plus one row per stage, registry stages first in order.
pub fn print_job(job: &Job, order: &[String]) {
    println!("Job {}: {}", job.key, job.status);
    if let Some(title) = &job.metadata.title {
        println!("  Title: {title}");
    }
    println!("  Updated: {}", job.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
    println!("  {:<12} {:<11} {:>8}  Note", "Stage", "Status", "Attempts");
    let extra = job.stages.keys().filter(|name| !order.contains(name));
    for name in order.iter().chain(extra) {
        let Some(state) = job.stage(name) else {
            continue;
        };
        let note = match (&state.details.error, &state.details.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(code), None) => code.to_string(),
            _ if state.details.skipped => "skipped".to_string(),
            _ => String::new(),
        };
        println!(
            "  {:<12} {:<11} {:>8}  {}",
            name,
            state.status.as_str(),
            state.details.attempts,
            note
        );
    }
}

pub fn print_outcome(stage: &str, outcome: &StageOutcome) {
    match outcome {
        StageOutcome::Completed => println!("✓ Stage '{stage}' completed"),
        StageOutcome::Pending { .. } => println!("… Stage '{stage}' {outcome}"),
        StageOutcome::Fatal { .. } => println!("✗ Stage '{stage}' {outcome}"),
    }
    for hint in outcome.hints() {
        println!("    → {hint}");
    }
}

pub fn print_report(label: &str, report: &ValidationReport) {
    let stats = &report.stats;
    println!(
        "{label}: {} characters (limits {}..={}), {} markers, {} paragraphs",
        stats.char_count, stats.min_chars, stats.max_chars, stats.marker_count, stats.paragraph_count
    );
    for issue in &report.issues {
        println!("  {issue}");
    }
    let errors = report.error_count();
    let warnings = report.issues.len() - errors;
    if errors == 0 {
        println!("✓ Valid ({warnings} warnings)");
    } else {
        println!("✗ {errors} errors, {warnings} warnings");
    }
}
