//! Process exit codes for the scriptline binary.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments |
//! | 3 | `CONFIG` | Configuration or stage registry is invalid |
//! | 4 | `STAGE_FAILED` | A stage ended fatally or the run got stuck |
//! | 5 | `VALIDATION_FAILED` | `validate` found error-severity issues |
//! | 6 | `JOB_NOT_FOUND` | Job record missing or corrupt |
//! | 9 | `LOCK_HELD` | Another process holds the job lock |
//! | 70 | `GATEWAY_FAILURE` | Generation gateway could not be constructed |

/// Exit codes matching the documented exit code table.
///
/// The numeric values are stable; scripts driving the CLI may branch on them.
///
/// ```rust
/// use scriptline_utils::ExitCode;
///
/// assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
/// assert_eq!(ExitCode::LOCK_HELD, ExitCode::from_i32(9));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - operation completed successfully
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// CLI arguments error - invalid or missing command-line arguments
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Configuration error - unreadable config or invalid registry
    pub const CONFIG: ExitCode = ExitCode(3);

    /// Stage failed - fatal stage outcome, or run-all stopped making progress
    pub const STAGE_FAILED: ExitCode = ExitCode(4);

    /// Validation failed - the validated text carries error-severity issues
    pub const VALIDATION_FAILED: ExitCode = ExitCode(5);

    /// Job not found - missing or corrupt status record
    pub const JOB_NOT_FOUND: ExitCode = ExitCode(6);

    /// Lock held - another process is already working on the same job
    pub const LOCK_HELD: ExitCode = ExitCode(9);

    /// Gateway failure - the configured provider could not be set up
    pub const GATEWAY_FAILURE: ExitCode = ExitCode(70);

    /// Get the numeric exit code value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Create an ExitCode from a raw i32 value.
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}
