//! Job status store.
//!
//! A [`Job`] record is the single source of truth for resumability: its
//! coarse [`JobStatus`] label, one [`StageState`] per registry stage and the
//! seed metadata. [`JobStore`] owns the on-disk form.

pub mod job;
pub mod stage;
pub mod store;

pub use job::{Job, JobMetadata, JobStatus, SCHEMA_VERSION};
pub use stage::{
    ErrorCode, GateOutcome, GateSummary, GenerationRecord, QualityGateRound, StageDetails,
    StageState, StageStatus, Verdict,
};
pub use store::{JobStore, STATUS_FILE, StatusError};
