//! CLI argument definitions and parsing structures
//!
//! This module defines the command-line interface structure using clap,
//! including the main `Cli` struct and the `Commands` enum.

use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

use scriptline_engine::ResetScope;

/// scriptline - resumable script generation with a bounded quality gate
#[derive(Parser, Debug)]
#[command(name = "scriptline")]
#[command(about = "Drive narration jobs through research, drafting and a bounded quality gate")]
#[command(long_about = r#"
scriptline moves each job through an ordered set of stages. Every transition is
persisted under the job directory, so any command can be re-run after a crash
and continues from the recorded state.

EXAMPLES:
  # Create a job record
  scriptline init CH01-012 --title "The harbour" --min-chars 1000 --max-chars 1600

  # Run the next eligible stage, or one stage by name
  scriptline next CH01-012
  scriptline run CH01-012 --stage script

  # Run until the job completes or stops making progress
  scriptline run-all CH01-012 --max-iter 10

  # Inspect and repair
  scriptline status CH01-012 --json
  scriptline validate --file content/script.md
  scriptline reconcile CH01-012
  scriptline reset CH01-012 --from script

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > environment > config file > defaults
  The config file is discovered by searching upward from CWD for .scriptline/config.toml
  Use --config to specify an explicit config file path
  SCRIPTLINE_HOME sets where job records live; SCRIPTLINE_LLM_PROVIDER picks the provider

STAGES:
  research → outline → draft → script (quality gate) → narration
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the resulting state as canonical JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Generation provider: anthropic, openrouter, stub or manual
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Model for generation calls (provider default when unset)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Override a job lock held by another process
    #[arg(long, global = true)]
    pub force_lock: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the job record with every stage pending
    Init {
        /// Job key, e.g. CH01-012
        key: String,

        /// Working title stored in the job metadata
        #[arg(long)]
        title: Option<String>,

        /// Style notes passed to every generation call
        #[arg(long)]
        style: Option<String>,

        /// Per-job lower bound for the script length
        #[arg(long)]
        min_chars: Option<usize>,

        /// Per-job upper bound for the script length
        #[arg(long)]
        max_chars: Option<usize>,

        /// Replace an existing record
        #[arg(long)]
        force: bool,
    },

    /// Run one named stage
    Run {
        key: String,

        /// Stage name from the registry
        #[arg(long)]
        stage: String,
    },

    /// Run the first stage that is not completed
    Next { key: String },

    /// Run stages until the job completes or stops making progress
    RunAll {
        key: String,

        /// Upper bound on stage executions (default: [defaults] max_iterations)
        #[arg(long = "max-iter")]
        max_iter: Option<u32>,
    },

    /// Show the job record
    Status { key: String },

    /// Check a text against the validator rules
    Validate(ValidateArgs),

    /// Re-derive stage states from the artifacts on disk
    Reconcile {
        key: String,

        /// Allow completed stages (and the status label) to move back
        #[arg(long)]
        allow_downgrade: bool,
    },

    /// Return stages to pending
    Reset(ResetArgs),
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["file", "key"])))]
pub struct ValidateArgs {
    /// Text file to validate
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Validate the quality-gated script of this job
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("scope").required(true).args(["stage", "from", "all"])))]
pub struct ResetArgs {
    pub key: String,

    /// Reset only this stage
    #[arg(long)]
    pub stage: Option<String>,

    /// Reset this stage and every stage after it
    #[arg(long)]
    pub from: Option<String>,

    /// Reset every stage
    #[arg(long)]
    pub all: bool,
}

impl ResetArgs {
    /// The scope named by whichever of `--stage`, `--from` or `--all` was given.
    #[must_use]
    pub fn scope(&self) -> ResetScope {
        match (&self.stage, &self.from) {
            (Some(stage), _) => ResetScope::Stage(stage.clone()),
            (None, Some(from)) => ResetScope::From(from.clone()),
            (None, None) => ResetScope::All,
        }
    }
}
