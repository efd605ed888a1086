//! Artifact cache for generation results.
//!
//! Entries are keyed by `(stage, output path, fingerprint of every input
//! source)` and live at `<home>/cache/artifacts/<blake3>.json`. A `ready`
//! entry replays its content instead of calling the gateway; a `pending`
//! entry is a stop-and-wait signal until an operator fills it in.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Mutex;
use tracing::{debug, warn};

use scriptline_llm::{Generation, GenerationRequest};
use scriptline_utils::atomic_write::write_file_atomic;
use scriptline_utils::fingerprint_json;

use crate::error::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Ready,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub stage: String,
    pub output_path: String,
    pub fingerprint: String,
    pub status: EntryStatus,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// The request an operator should answer; only set on pending entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<GenerationRequest>,
    pub created_at: DateTime<Utc>,
}

/// Statistics for cache performance tracking
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Lookups that found a pending entry
    pub waits: usize,
    pub writes: usize,
}

impl CacheStats {
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub enum CacheLookup {
    Hit(CacheEntry),
    /// A pending entry exists at this path
    Waiting(Utf8PathBuf),
    Miss,
}

/// Identifies one cached output.
#[derive(Debug, Clone, Copy)]
pub struct CacheKey<'a> {
    pub stage: &'a str,
    pub output_path: &'a str,
    pub fingerprint: &'a str,
}

#[derive(Debug)]
pub struct ArtifactCache {
    dir: Utf8PathBuf,
    stats: Mutex<CacheStats>,
}

impl ArtifactCache {
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        match self.stats.lock() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        match self.stats.lock() {
            Ok(mut stats) => f(&mut stats),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn entry_path(&self, key: CacheKey<'_>) -> Result<Utf8PathBuf, StageError> {
        let digest = fingerprint_json(&[key.stage, key.output_path, key.fingerprint])
            .map_err(|e| StageError::Internal(format!("cache key: {e:#}")))?;
        Ok(self.dir.join(format!("{digest}.json")))
    }

    pub fn lookup(&self, key: CacheKey<'_>) -> Result<CacheLookup, StageError> {
        let path = self.entry_path(key)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.bump(|s| s.misses += 1);
                return Ok(CacheLookup::Miss);
            }
            Err(e) => {
                return Err(StageError::Internal(format!(
                    "Failed to read cache entry {path}: {e}"
                )));
            }
        };

        let entry: CacheEntry =
            serde_json::from_str(&raw).map_err(|e| StageError::MalformedInput {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let has_content = entry
            .content
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        match entry.status {
            EntryStatus::Ready if has_content => {
                self.bump(|s| s.hits += 1);
                debug!(stage = key.stage, output = key.output_path, "Artifact cache hit");
                Ok(CacheLookup::Hit(entry))
            }
            EntryStatus::Ready => {
                warn!(entry = %path, "Cache entry marked ready without content; still waiting");
                self.bump(|s| s.waits += 1);
                Ok(CacheLookup::Waiting(path))
            }
            EntryStatus::Pending => {
                self.bump(|s| s.waits += 1);
                Ok(CacheLookup::Waiting(path))
            }
        }
    }

    pub fn store_ready(
        &self,
        key: CacheKey<'_>,
        generation: &Generation,
    ) -> Result<Utf8PathBuf, StageError> {
        self.write(
            key,
            CacheEntry {
                stage: key.stage.to_string(),
                output_path: key.output_path.to_string(),
                fingerprint: key.fingerprint.to_string(),
                status: EntryStatus::Ready,
                content: Some(generation.content.clone()),
                provider: Some(generation.provider.clone()),
                model: Some(generation.model.clone()),
                request: None,
                created_at: Utc::now(),
            },
        )
    }

    /// Record a request an operator has to answer.
    pub fn store_pending(
        &self,
        key: CacheKey<'_>,
        request: &GenerationRequest,
    ) -> Result<Utf8PathBuf, StageError> {
        self.write(
            key,
            CacheEntry {
                stage: key.stage.to_string(),
                output_path: key.output_path.to_string(),
                fingerprint: key.fingerprint.to_string(),
                status: EntryStatus::Pending,
                content: None,
                provider: None,
                model: None,
                request: Some(request.clone()),
                created_at: Utc::now(),
            },
        )
    }

    fn write(&self, key: CacheKey<'_>, entry: CacheEntry) -> Result<Utf8PathBuf, StageError> {
        let path = self.entry_path(key)?;
        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| StageError::Internal(format!("cache entry: {e}")))?;
        write_file_atomic(&path, &json).map_err(|e| {
            StageError::Internal(format!("Failed to write cache entry {path}: {e:#}"))
        })?;
        self.bump(|s| s.writes += 1);
        Ok(path)
    }
}
