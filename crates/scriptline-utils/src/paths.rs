use camino::Utf8PathBuf;
use std::cell::RefCell;

use crate::job_key::JobKey;

// Thread-local override used only in tests to avoid process-global env races.
thread_local! {
    static THREAD_HOME: RefCell<Option<Utf8PathBuf>> = const { RefCell::new(None) };
}

/// Environment variable that relocates the scriptline home directory.
pub const HOME_ENV: &str = "SCRIPTLINE_HOME";

/// Resolve scriptline home:
/// 1) thread-local override (tests use this)
/// 2) env `SCRIPTLINE_HOME`
/// 3) default ".scriptline"
#[must_use]
pub fn scriptline_home() -> Utf8PathBuf {
    if let Some(tl) = THREAD_HOME.with(|tl| tl.borrow().clone()) {
        return tl;
    }
    if let Ok(p) = std::env::var(HOME_ENV) {
        return Utf8PathBuf::from(p);
    }
    Utf8PathBuf::from(".scriptline")
}

/// Returns `<home>/jobs`
#[must_use]
pub fn jobs_root(home: &camino::Utf8Path) -> Utf8PathBuf {
    home.join("jobs")
}

/// Returns `<home>/jobs/<key>`
#[must_use]
pub fn job_dir(home: &camino::Utf8Path, key: &JobKey) -> Utf8PathBuf {
    jobs_root(home).join(key.to_string())
}

/// Returns `<home>/cache/artifacts`
#[must_use]
pub fn artifact_cache_dir(home: &camino::Utf8Path) -> Utf8PathBuf {
    home.join("cache").join("artifacts")
}

/// mkdir -p; treat `AlreadyExists` as success (removes TOCTTOU races)
pub fn ensure_dir_all<P: AsRef<std::path::Path>>(p: P) -> std::io::Result<()> {
    match std::fs::create_dir_all(&p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// RAII guard for isolated home that clears thread-local state on drop
#[cfg(any(test, feature = "test-utils"))]
pub struct HomeGuard {
    inner: tempfile::TempDir,
}

#[cfg(any(test, feature = "test-utils"))]
impl HomeGuard {
    /// The isolated home as a UTF-8 path.
    #[must_use]
    pub fn home(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.inner.path().to_path_buf())
            .unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned()))
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Drop for HomeGuard {
    fn drop(&mut self) {
        THREAD_HOME.with(|tl| *tl.borrow_mut() = None);
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl std::ops::Deref for HomeGuard {
    type Target = tempfile::TempDir;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Give this test a unique home under the system temp dir.
///
/// Hold the `HomeGuard` for the test's duration so the directory stays alive.
#[cfg(any(test, feature = "test-utils"))]
#[must_use]
pub fn with_isolated_home() -> HomeGuard {
    let td = tempfile::TempDir::new().expect("create temp home");
    let guard = HomeGuard { inner: td };
    let p = guard.home();
    THREAD_HOME.with(|tl| *tl.borrow_mut() = Some(p));
    guard
}
