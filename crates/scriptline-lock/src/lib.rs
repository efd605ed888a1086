//! Advisory per-job file lock.
//!
//! One `.lock` file per job directory keeps two scriptline processes from
//! running stages of the same job at once. The lock is advisory: it
//! coordinates scriptline processes but is not a security boundary.
//!
//! A lock left behind by a process that no longer exists (crash, kill -9)
//! is reclaimed automatically; a lock held by a live process is only
//! overridden with `force`.

use camino::{Utf8Path, Utf8PathBuf};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Name of the lock file inside a job directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Lock information stored in the lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process ID that created the lock
    pub pid: u32,
    /// Seconds since UNIX epoch when the lock was created
    pub created_at: u64,
    /// Job key being locked
    pub job: String,
    /// scriptline version that created the lock
    pub version: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Job '{job}' is locked by running process {pid} (created {created_ago} ago)")]
    ConcurrentExecution {
        job: String,
        pid: u32,
        created_ago: String,
    },

    #[error("Lock file is corrupted or invalid: {reason}")]
    CorruptedLock { reason: String },

    #[error("Failed to acquire lock: {reason}")]
    AcquisitionFailed { reason: String },

    #[error("Failed to release lock: {reason}")]
    ReleaseFailed { reason: String },

    #[error("IO error during lock operation: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive lock on one job directory; released on drop.
pub struct FileLock {
    lock_path: Utf8PathBuf,
    _fd_lock: Option<Box<RwLock<fs::File>>>,
    lock_info: LockInfo,
}

impl FileLock {
    /// Acquire the lock for `job` inside `job_dir`, creating the directory.
    ///
    /// Uses `create_new` so two racing processes cannot both succeed.
    pub fn acquire(job_dir: &Utf8Path, job: &str, force: bool) -> Result<Self, LockError> {
        fs::create_dir_all(job_dir).map_err(|e| LockError::AcquisitionFailed {
            reason: format!("Failed to create job directory {job_dir}: {e}"),
        })?;
        let lock_path = Self::lock_path(job_dir);

        for attempt in 0..3u32 {
            let lock_info = LockInfo {
                pid: process::id(),
                created_at: now_secs(),
                job: job.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            };

            match fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&lock_path)
            {
                Ok(file) => return Self::finalize(lock_path, file, lock_info),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Self::check_existing(&lock_path, job, force)?;
                    Self::remove_stale(&lock_path, job)?;
                    if attempt > 0 {
                        std::thread::sleep(std::time::Duration::from_millis(
                            10 * u64::from(attempt),
                        ));
                    }
                }
                Err(e) => {
                    return Err(LockError::AcquisitionFailed {
                        reason: format!("Failed to create lock file {lock_path}: {e}"),
                    });
                }
            }
        }

        Err(LockError::AcquisitionFailed {
            reason: format!("Another process re-acquired the lock for job '{job}' while retrying"),
        })
    }

    fn finalize(
        lock_path: Utf8PathBuf,
        file: fs::File,
        lock_info: LockInfo,
    ) -> Result<Self, LockError> {
        let lock_json =
            serde_json::to_string_pretty(&lock_info).map_err(|e| LockError::AcquisitionFailed {
                reason: format!("Failed to serialize lock info: {e}"),
            })?;

        let mut rw_lock = Box::new(RwLock::new(file));
        {
            let guard = rw_lock
                .try_write()
                .map_err(|_| LockError::ConcurrentExecution {
                    job: lock_info.job.clone(),
                    pid: 0,
                    created_ago: "unknown".to_string(),
                })?;
            let mut file_ref = &*guard;
            file_ref.write_all(lock_json.as_bytes())?;
            file_ref.flush()?;
            file_ref.sync_all()?;
        }

        Ok(Self {
            lock_path,
            _fd_lock: Some(rw_lock),
            lock_info,
        })
    }

    /// `Ok(())` means the existing lock may be removed.
    fn check_existing(lock_path: &Utf8Path, job: &str, force: bool) -> Result<(), LockError> {
        let existing = match Self::read_info(lock_path) {
            Ok(Some(info)) => info,
            Ok(None) => return Ok(()),
            // An unreadable lock from a crashed writer is reclaimable only by force
            Err(e) if !force => return Err(e),
            Err(_) => return Ok(()),
        };

        let held = existing.pid == process::id() || is_process_running(existing.pid);
        if held && !force {
            return Err(LockError::ConcurrentExecution {
                job: job.to_string(),
                pid: existing.pid,
                created_ago: format_duration_since(existing.created_at),
            });
        }

        if held {
            warn!(job = %job, pid = existing.pid, "Overriding a live lock (forced)");
        } else {
            warn!(job = %job, pid = existing.pid, "Reclaiming lock left by a process that is gone");
        }
        Ok(())
    }

    fn remove_stale(lock_path: &Utf8Path, job: &str) -> Result<(), LockError> {
        let stale_path = lock_path.with_extension(format!("stale.{}", process::id()));
        match fs::rename(lock_path, &stale_path) {
            Ok(()) => {
                let _ = fs::remove_file(&stale_path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::AcquisitionFailed {
                reason: format!("Failed to remove stale lock for job '{job}': {e}"),
            }),
        }
    }

    fn read_info(lock_path: &Utf8Path) -> Result<Option<LockInfo>, LockError> {
        let content = match fs::read_to_string(lock_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LockError::CorruptedLock {
                    reason: format!("Failed to read lock file: {e}"),
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| LockError::CorruptedLock {
                reason: format!("Failed to parse lock file: {e}"),
            })
    }

    /// Information about the lock currently held on `job_dir`, if any.
    pub fn get_lock_info(job_dir: &Utf8Path) -> Result<Option<LockInfo>, LockError> {
        Self::read_info(&Self::lock_path(job_dir))
    }

    #[must_use]
    pub fn exists(job_dir: &Utf8Path) -> bool {
        Self::lock_path(job_dir).exists()
    }

    #[must_use]
    pub fn lock_path(job_dir: &Utf8Path) -> Utf8PathBuf {
        job_dir.join(LOCK_FILE_NAME)
    }

    #[must_use]
    pub const fn lock_info(&self) -> &LockInfo {
        &self.lock_info
    }

    /// Release the lock explicitly, surfacing removal errors.
    pub fn release(mut self) -> Result<(), LockError> {
        self._fd_lock.take();
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).map_err(|e| LockError::ReleaseFailed {
                reason: format!("Failed to remove lock file: {e}"),
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("lock_path", &self.lock_path)
            .field("lock_info", &self.lock_info)
            .field("_fd_lock", &"<RwLock>")
            .finish()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self._fd_lock.take();
        if self.lock_path.exists() {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(raw_pid) = i32::try_from(pid) else {
            return false;
        };
        // kill(pid, 0): 0 if the process exists, EPERM if it exists but is not ours
        let rc = unsafe { libc::kill(raw_pid, 0) };
        rc == 0
            || matches!(
                io::Error::last_os_error().raw_os_error(),
                Some(code) if code == libc::EPERM
            )
    }

    #[cfg(windows)]
    {
        use winapi::um::handleapi::CloseHandle;
        use winapi::um::minwinbase::STILL_ACTIVE;
        use winapi::um::processthreadsapi::{GetExitCodeProcess, OpenProcess};
        use winapi::um::winnt::PROCESS_QUERY_LIMITED_INFORMATION;

        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return false;
            }
            let mut exit_code: u32 = 0;
            let ok = GetExitCodeProcess(handle, &mut exit_code);
            CloseHandle(handle);
            ok != 0 && exit_code == STILL_ACTIVE
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        true
    }
}

fn format_duration_since(timestamp: u64) -> String {
    let duration = now_secs().saturating_sub(timestamp);
    if duration < 60 {
        format!("{duration}s")
    } else if duration < 3600 {
        format!("{}m", duration / 60)
    } else if duration < 86400 {
        format!("{}h", duration / 3600)
    } else {
        format!("{}d", duration / 86400)
    }
}
