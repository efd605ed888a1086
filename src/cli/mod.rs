//! Command-line interface for scriptline
//!
//! ## Module Structure
//!
//! - `args`: CLI argument definitions (clap)
//! - `run`: entry point, config discovery and error reporting
//! - `commands`: command implementations and output rendering

pub mod args;
mod commands;
mod run;

pub use args::{Cli, Commands, ResetArgs, ValidateArgs};
pub use run::run;
