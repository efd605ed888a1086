//! Commands that execute stages: run, next, run-all.

use anyhow::Result;
use serde_json::json;

use scriptline_engine::{NextStep, StageOutcome, StageRun, StopReason};
use scriptline_status::ErrorCode;
use scriptline_utils::ExitCode;

use super::output::{print_job, print_json, print_outcome};
use super::{CommandContext, parse_key};

/// Exit code for a single stage outcome. Waiting is not a failure.
fn outcome_exit(outcome: &StageOutcome) -> ExitCode {
    match outcome {
        StageOutcome::Fatal {
            code: ErrorCode::GatewayFailure,
            ..
        } => ExitCode::GATEWAY_FAILURE,
        StageOutcome::Fatal { .. } => ExitCode::STAGE_FAILED,
        _ => ExitCode::SUCCESS,
    }
}

pub async fn execute_run_command(ctx: &CommandContext, key: &str, stage: &str) -> Result<ExitCode> {
    let key = parse_key(key)?;
    let orchestrator = ctx.orchestrator()?;
    let run = orchestrator.run_stage(&key, stage).await?;

    if ctx.json {
        print_json(&json!({
            "stage": run.stage,
            "outcome": run.outcome,
            "job": run.job,
        }))?;
    } else {
        print_outcome(&run.stage, &run.outcome);
        println!();
        print_job(&run.job, &orchestrator.registry().names());
    }
    Ok(outcome_exit(&run.outcome))
}

pub async fn execute_next_command(ctx: &CommandContext, key: &str) -> Result<ExitCode> {
    let key = parse_key(key)?;
    let orchestrator = ctx.orchestrator()?;
    let step = orchestrator.run_next(&key).await?;

    match &step {
        NextStep::Ran(run) => {
            if ctx.json {
                print_json(&json!({
                    "stage": run.stage,
                    "outcome": run.outcome,
                    "job": run.job,
                }))?;
            } else {
                print_outcome(&run.stage, &run.outcome);
                println!();
                print_job(&run.job, &orchestrator.registry().names());
            }
            Ok(outcome_exit(&run.outcome))
        }
        NextStep::Finished(job) => {
            if ctx.json {
                print_json(&json!({ "finished": true, "job": job }))?;
            } else {
                println!("✓ Nothing left to run for {key}");
                println!();
                print_job(job, &orchestrator.registry().names());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

pub async fn execute_run_all_command(ctx: &CommandContext, key: &str) -> Result<ExitCode> {
    let key = parse_key(key)?;
    let orchestrator = ctx.orchestrator()?;
    let max_iterations = ctx.config.defaults.max_iterations;
    let report = orchestrator
        .run_until_done_or_stuck(&key, max_iterations)
        .await?;

    let code = match report.stop {
        StopReason::Stuck => report
            .last_outcome()
            .map(outcome_exit)
            .filter(|code| *code != ExitCode::SUCCESS)
            .unwrap_or(ExitCode::STAGE_FAILED),
        StopReason::Completed | StopReason::MaxIterations => ExitCode::SUCCESS,
    };

    if ctx.json {
        let runs: Vec<_> = report.runs.iter().map(run_view).collect();
        print_json(&json!({
            "stop": report.stop,
            "runs": runs,
            "job": report.job,
        }))?;
    } else {
        for run in &report.runs {
            print_outcome(&run.stage, &run.outcome);
        }
        match report.stop {
            StopReason::Completed => println!("✓ Job {key} completed"),
            StopReason::Stuck => println!("✗ Job {key} is stuck; see the notes below"),
            StopReason::MaxIterations => println!(
                "… Stopped after {} stage executions; run again to continue",
                report.runs.len()
            ),
        }
        println!();
        print_job(&report.job, &orchestrator.registry().names());
    }
    Ok(code)
}

fn run_view(run: &StageRun) -> serde_json::Value {
    json!({ "stage": run.stage, "outcome": run.outcome })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fatal(code: ErrorCode) -> StageOutcome {
        StageOutcome::Fatal {
            code,
            message: "boom".to_string(),
            hints: Vec::new(),
        }
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(outcome_exit(&StageOutcome::Completed), ExitCode::SUCCESS);
        assert_eq!(
            outcome_exit(&StageOutcome::Pending {
                code: ErrorCode::MissingInput,
                message: "waiting".to_string(),
                hints: Vec::new(),
            }),
            ExitCode::SUCCESS
        );
        assert_eq!(outcome_exit(&fatal(ErrorCode::GatewayFailure)), ExitCode::GATEWAY_FAILURE);
        assert_eq!(outcome_exit(&fatal(ErrorCode::SemanticMismatch)), ExitCode::STAGE_FAILED);
    }
}
