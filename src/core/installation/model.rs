use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lookup key for installations and downloads: one fork, one build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallKey {
    pub fork_name: String,
    pub build_version: u32,
}

impl InstallKey {
    pub fn new(fork_name: impl Into<String>, build_version: u32) -> Self {
        Self {
            fork_name: fork_name.into(),
            build_version,
        }
    }
}

impl std::fmt::Display for InstallKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.fork_name, self.build_version)
    }
}

/// A registered, extracted build on local disk.
///
/// Persisted as one element of the registry file array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: String,
    pub fork_name: String,
    pub build_version: u32,
    pub path: PathBuf,
    pub last_played: Option<DateTime<Utc>>,
}

impl Installation {
    /// Create a freshly extracted installation. It counts as just played so
    /// an immediate cleanup pass leaves it alone.
    pub fn new(fork_name: impl Into<String>, build_version: u32, path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            fork_name: fork_name.into(),
            build_version,
            path,
            last_played: Some(Utc::now()),
        }
    }

    pub fn key(&self) -> InstallKey {
        InstallKey::new(self.fork_name.clone(), self.build_version)
    }

    pub fn matches(&self, fork_name: &str, build_version: u32) -> bool {
        self.fork_name == fork_name && self.build_version == build_version
    }

    /// True when last played within `window` of `now`.
    pub fn is_recently_used(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match self.last_played {
            Some(played) => now.signed_duration_since(played) < window,
            None => false,
        }
    }
}
