//! Stable job identifiers.
//!
//! A job is addressed by its channel and video number. The canonical text
//! form is `<CHANNEL>-<video:03>` (for example `CH01-012`), and that string
//! doubles as the job's directory name, so parsing normalizes aggressively.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::error::{ErrorCategory, UserFriendlyError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobKeyError {
    #[error("Job key '{0}' has no video number (expected CHANNEL-NUMBER)")]
    MissingVideo(String),

    #[error("Job key '{0}' has an invalid video number")]
    InvalidVideo(String),

    #[error("Job key '{0}' has an empty channel")]
    EmptyChannel(String),
}

impl UserFriendlyError for JobKeyError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        Some("Job keys name a channel and a video number, e.g. CH01-012 or CH01/12.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        vec![
            "Use letters, digits or underscores for the channel".to_string(),
            "Separate channel and video number with '-' or '/'".to_string(),
        ]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

/// Composite key identifying one job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobKey {
    channel: String,
    video: u32,
}

impl JobKey {
    /// Build a key from parts, sanitizing the channel.
    pub fn new(channel: &str, video: u32) -> Result<Self, JobKeyError> {
        let sanitized = sanitize_channel(channel);
        if sanitized.is_empty() {
            return Err(JobKeyError::EmptyChannel(channel.to_string()));
        }
        Ok(Self {
            channel: sanitized,
            video,
        })
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn video(&self) -> u32 {
        self.video
    }
}

/// NFKC-normalize, uppercase ASCII letters and replace anything outside
/// `[A-Za-z0-9_]` with `_`. Leading/trailing underscores are dropped.
fn sanitize_channel(raw: &str) -> String {
    let normalized: String = raw.nfkc().collect();
    let replaced: String = normalized
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    replaced.trim_matches('_').to_string()
}

impl FromStr for JobKey {
    type Err = JobKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (channel, video) = trimmed
            .rsplit_once(['-', '/'])
            .ok_or_else(|| JobKeyError::MissingVideo(s.to_string()))?;
        let video: u32 = video
            .trim()
            .parse()
            .map_err(|_| JobKeyError::InvalidVideo(s.to_string()))?;
        JobKey::new(channel, video)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}", self.channel, self.video)
    }
}

impl Serialize for JobKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
