//! Deterministic text rules for generated scripts.
//!
//! [`validate`] is a pure function from a text and a [`ValidatorConfig`] to a
//! [`ValidationReport`]. Four rule classes (length, structural marker,
//! forbidden patterns, hygiene) run independently and their issues are
//! concatenated in class order, so one violation never hides another.
//!
//! [`TransformPipeline`] holds the named clean-up passes applied to
//! gateway output before it is validated.

pub mod config;
pub mod issue;
pub mod placeholder;
pub mod segments;
pub mod transform;
pub mod validator;

pub use config::ValidatorConfig;
pub use issue::{Issue, IssueCode, RuleClass, Severity};
pub use placeholder::find_placeholder;
pub use transform::{DEFAULT_TRANSFORMS, TextTransform, TransformPipeline};
pub use validator::{ValidationReport, ValidationStats, count_chars, validate};
