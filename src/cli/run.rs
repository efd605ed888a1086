//! CLI entry point and dispatch logic
//!
//! `run()` parses arguments, discovers the configuration, builds the tokio
//! runtime, dispatches to a command and prints every error. It returns the
//! process exit code; main.rs never prints.

use clap::Parser;

use scriptline_config::{CliArgs, Config, ConfigError};
use scriptline_engine::EngineError;
use scriptline_utils::logging::init_tracing;
use scriptline_utils::{ExitCode, JobKeyError, display_for_user};

use super::args::{Cli, Commands};
use super::commands::{self, CommandContext};

/// Main CLI execution function.
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        verbose: cli.verbose.then_some(true),
        provider: cli.provider.clone(),
        model: cli.model.clone(),
        max_iterations: match &cli.command {
            Commands::RunAll { max_iter, .. } => *max_iter,
            _ => None,
        },
        ..CliArgs::default()
    };

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            eprint!("{}", display_for_user(&err));
            return ExitCode::CONFIG;
        }
    };

    if let Err(e) = init_tracing(config.defaults.verbose) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }
    tracing::debug!(home = %config.home_dir(), provider = %config.llm.provider, "Configuration loaded");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return ExitCode::INTERNAL;
        }
    };

    let ctx = CommandContext {
        config,
        json: cli.json,
        force_lock: cli.force_lock,
    };

    let result = rt.block_on(async {
        match cli.command {
            Commands::Init {
                key,
                title,
                style,
                min_chars,
                max_chars,
                force,
            } => commands::execute_init_command(
                &ctx,
                &key,
                commands::InitOptions {
                    title,
                    style,
                    min_chars,
                    max_chars,
                    force,
                },
            ),
            Commands::Run { key, stage } => commands::execute_run_command(&ctx, &key, &stage).await,
            Commands::Next { key } => commands::execute_next_command(&ctx, &key).await,
            Commands::RunAll { key, .. } => commands::execute_run_all_command(&ctx, &key).await,
            Commands::Status { key } => commands::execute_status_command(&ctx, &key),
            Commands::Validate(args) => commands::execute_validate_command(&ctx, &args),
            Commands::Reconcile {
                key,
                allow_downgrade,
            } => commands::execute_reconcile_command(&ctx, &key, allow_downgrade).await,
            Commands::Reset(args) => commands::execute_reset_command(&ctx, &args).await,
        }
    });

    match result {
        Ok(code) => code,
        Err(error) => report_error(&error),
    }
}

/// Print `error` for an operator and pick the exit code.
fn report_error(error: &anyhow::Error) -> ExitCode {
    if let Some(engine) = error.downcast_ref::<EngineError>() {
        eprint!("{}", display_for_user(engine));
        return engine.to_exit_code();
    }
    if let Some(config) = error.downcast_ref::<ConfigError>() {
        eprint!("{}", display_for_user(config));
        return ExitCode::CONFIG;
    }
    if let Some(key) = error.downcast_ref::<JobKeyError>() {
        eprint!("{}", display_for_user(key));
        return ExitCode::CLI_ARGS;
    }

    eprintln!("✗ Unexpected error: {error:#}");
    eprintln!("\n  General troubleshooting:");
    eprintln!("    - Run with --verbose for more detailed output");
    eprintln!("    - Check that SCRIPTLINE_HOME points at a writable directory");
    ExitCode::INTERNAL
}
