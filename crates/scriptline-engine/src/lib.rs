//! Stage orchestration for scriptline jobs.
//!
//! The [`Orchestrator`] drives a job through the [`StageRegistry`], one
//! stage at a time, persisting every transition through the status store.
//! Quality-gate stages run the judge/fix loop in [`gate`]; the
//! [`Reconciler`] repairs drift between records and artifacts.

// Re-export member crates so callers need only this one.
pub use scriptline_config as config;
pub use scriptline_llm as llm;
pub use scriptline_status as status;
pub use scriptline_validation as validation;

pub mod cache;
mod context;
pub mod error;
pub mod gate;
mod handlers;
pub mod orchestrator;
pub mod outcome;
pub mod outputs;
pub mod reconcile;
pub mod registry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use cache::{ArtifactCache, CacheEntry, CacheKey, CacheLookup, CacheStats, EntryStatus};
pub use context::validator_for;
pub use error::{EngineError, RegistryError, StageError};
pub use orchestrator::{Orchestrator, ResetScope};
pub use outcome::{NextStep, RunReport, StageOutcome, StageRun, StopReason};
pub use reconcile::{ReconcileReport, Reconciler, StageChange};
pub use registry::{StageRegistry, default_stages};
