//! Foundation utilities shared by every scriptline crate.
//!
//! Nothing in here knows about stages or the quality gate; it only covers
//! the plumbing the rest of the workspace leans on: atomic file writes,
//! error categories and exit codes, tracing setup, home/job paths, job keys,
//! output path templates and content fingerprints.

pub mod atomic_write;
pub mod error;
pub mod exit_codes;
pub mod fingerprint;
pub mod job_key;
pub mod logging;
pub mod paths;
pub mod template;

pub use atomic_write::{AtomicWriteResult, write_file_atomic, write_if_changed};
pub use error::{ErrorCategory, UserFriendlyError, display_for_user};
pub use exit_codes::ExitCode;
pub use fingerprint::{emit_jcs, fingerprint_json, fingerprint_text};
pub use job_key::{JobKey, JobKeyError};
pub use template::{PathTemplate, TemplateError};
