//! Durable job records under `<home>/jobs/<key>/status.json`.
//!
//! Records are emitted as JCS (RFC 8785) canonical JSON and written through
//! [`write_if_changed`], so saving an unchanged job is a no-op on disk and a
//! crash mid-save leaves the previous record intact.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use thiserror::Error;
use tracing::{debug, info};

use scriptline_utils::atomic_write::write_if_changed;
use scriptline_utils::error::{ErrorCategory, UserFriendlyError};
use scriptline_utils::{JobKey, paths};

use crate::job::{Job, JobMetadata};

pub const STATUS_FILE: &str = "status.json";

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("No job record for {key}")]
    NotFound { key: String },

    #[error("Job record {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Job {key} already exists")]
    AlreadyExists { key: String },

    #[error("Failed to write job record {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to read job record {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl UserFriendlyError for StatusError {
    fn user_message(&self) -> String {
        match self {
            Self::NotFound { key } => format!("Job {key} has not been initialized"),
            Self::Corrupt { path, .. } => format!("The job record at {path} cannot be read"),
            Self::AlreadyExists { key } => format!("Job {key} is already initialized"),
            Self::WriteFailed { path, .. } => format!("Could not save the job record at {path}"),
            Self::Io { path, .. } => format!("Could not read the job record at {path}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Corrupt { reason, .. } | Self::WriteFailed { reason, .. } => {
                Some(reason.clone())
            }
            Self::Io { source, .. } => Some(source.to_string()),
            Self::NotFound { .. } | Self::AlreadyExists { .. } => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound { key } => vec![format!("Run 'scriptline init {key}' first")],
            Self::Corrupt { .. } => vec![
                "Restore status.json from a backup".to_string(),
                "Or re-create the job with 'scriptline init --force'".to_string(),
            ],
            Self::AlreadyExists { .. } => {
                vec!["Pass --force to re-initialize and discard stage state".to_string()]
            }
            Self::WriteFailed { .. } | Self::Io { .. } => {
                vec!["Check permissions and free space under the scriptline home".to_string()]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } | Self::AlreadyExists { .. } | Self::Corrupt { .. } => {
                ErrorCategory::Validation
            }
            Self::WriteFailed { .. } | Self::Io { .. } => ErrorCategory::FileSystem,
        }
    }
}

/// Loads and saves job records for one scriptline home.
#[derive(Debug, Clone)]
pub struct JobStore {
    home: Utf8PathBuf,
}

impl JobStore {
    #[must_use]
    pub fn new(home: impl Into<Utf8PathBuf>) -> Self {
        Self { home: home.into() }
    }

    #[must_use]
    pub fn home(&self) -> &Utf8Path {
        &self.home
    }

    #[must_use]
    pub fn job_dir(&self, key: &JobKey) -> Utf8PathBuf {
        paths::job_dir(&self.home, key)
    }

    #[must_use]
    pub fn status_path(&self, key: &JobKey) -> Utf8PathBuf {
        self.job_dir(key).join(STATUS_FILE)
    }

    #[must_use]
    pub fn exists(&self, key: &JobKey) -> bool {
        self.status_path(key).is_file()
    }

    pub fn load(&self, key: &JobKey) -> Result<Job, StatusError> {
        let path = self.status_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StatusError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(source) => {
                return Err(StatusError::Io {
                    path: path.to_string(),
                    source,
                });
            }
        };

        let job: Job = serde_json::from_str(&raw).map_err(|e| StatusError::Corrupt {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        if &job.key != key {
            return Err(StatusError::Corrupt {
                path: path.to_string(),
                reason: format!("record belongs to {}, not {key}", job.key),
            });
        }
        Ok(job)
    }

    /// Persist `job` atomically. Returns `false` when the on-disk record
    /// already matched.
    pub fn save(&self, job: &Job) -> Result<bool, StatusError> {
        let path = self.status_path(&job.key);
        let content = emit_canonical(job).map_err(|reason| StatusError::WriteFailed {
            path: path.to_string(),
            reason,
        })?;
        let written = write_if_changed(&path, &content).map_err(|e| StatusError::WriteFailed {
            path: path.to_string(),
            reason: format!("{e:#}"),
        })?;
        if written {
            debug!(job = %job.key, status = %job.status, "Saved job record");
        }
        Ok(written)
    }

    /// Create a fresh record with every stage `pending`.
    ///
    /// An existing record is an error unless `force` is set, in which case it
    /// is replaced. Artifacts on disk are left alone either way.
    pub fn init<S: AsRef<str>>(
        &self,
        key: &JobKey,
        metadata: JobMetadata,
        stage_names: &[S],
        force: bool,
    ) -> Result<Job, StatusError> {
        if self.exists(key) && !force {
            return Err(StatusError::AlreadyExists {
                key: key.to_string(),
            });
        }
        let job = Job::new(key.clone(), metadata, stage_names);
        self.save(&job)?;
        info!(job = %key, stages = stage_names.len(), "Initialized job");
        Ok(job)
    }

    /// Keys of every job record under this home, sorted.
    pub fn list(&self) -> Result<Vec<JobKey>, StatusError> {
        let root = paths::jobs_root(&self.home);
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StatusError::Io {
                    path: root.to_string(),
                    source,
                });
            }
        };

        let mut keys: Vec<JobKey> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join(STATUS_FILE).is_file())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn emit_canonical(job: &Job) -> Result<String, String> {
    let value = serde_json::to_value(job).map_err(|e| e.to_string())?;
    let bytes = serde_json_canonicalizer::to_vec(&value).map_err(|e| e.to_string())?;
    let mut text = String::from_utf8(bytes).map_err(|e| e.to_string())?;
    text.push('\n');
    Ok(text)
}
