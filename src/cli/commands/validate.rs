//! `validate`: run the text validator over a file or a job's gated script.

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use serde_json::json;

use scriptline_config::StageKind;
use scriptline_engine::validator_for;
use scriptline_utils::ExitCode;
use scriptline_validation::{ValidatorConfig, validate};

use super::output::{print_json, print_report};
use super::{CommandContext, parse_key};
use crate::cli::ValidateArgs;

pub fn execute_validate_command(ctx: &CommandContext, args: &ValidateArgs) -> Result<ExitCode> {
    let (path, config) = match (&args.file, &args.key) {
        (Some(file), _) => {
            let path = Utf8PathBuf::from_path_buf(file.clone())
                .map_err(|p| anyhow::anyhow!("Path is not valid UTF-8: {}", p.display()))?;
            (path, ctx.config.validator.clone())
        }
        (None, Some(key)) => gated_script(ctx, key)?,
        (None, None) => bail!("validate needs --file or --key"),
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read text to validate: {path}"))?;
    let report = validate(&text, &config);

    if ctx.json {
        print_json(&json!({
            "file": path.as_str(),
            "valid": !report.has_errors(),
            "report": report,
        }))?;
    } else {
        print_report(path.as_str(), &report);
    }

    Ok(if report.has_errors() {
        ExitCode::VALIDATION_FAILED
    } else {
        ExitCode::SUCCESS
    })
}

/// The text the job's quality gate works on, with the job's own length
/// targets applied. Falls back to the gate input when no script exists yet.
fn gated_script(ctx: &CommandContext, raw: &str) -> Result<(Utf8PathBuf, ValidatorConfig)> {
    let key = parse_key(raw)?;
    let orchestrator = ctx.offline_orchestrator()?;
    let job = orchestrator.status(&key)?;
    let job_dir = orchestrator.store().job_dir(&key);

    let Some(stage) = orchestrator
        .registry()
        .stages()
        .iter()
        .find(|s| s.kind == StageKind::QualityGate)
    else {
        bail!("No quality gate stage is configured for {key}");
    };

    let output = stage.outputs.first().map(|o| o.path.resolve(&job_dir, &key));
    let path = match output {
        Some(path) if path.exists() => path,
        _ => match stage.inputs.first() {
            Some(input) => input.resolve(&job_dir, &key),
            None => bail!("Stage '{}' has no script to validate", stage.name),
        },
    };

    Ok((path, validator_for(orchestrator.config(), &job.metadata)))
}
