use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{LauncherError, LauncherResult};

const APP_DIR_NAME: &str = "Buildkeeper";
const SETTINGS_FILE: &str = "launcher_settings.json";
const REGISTRY_FILE: &str = "installations.json";
const DEFAULT_APP_NAME: &str = "Game";
const DEFAULT_RECENT_WINDOW_MINUTES: i64 = 5;
const DEFAULT_PROGRESS_CHUNK: u64 = 4 * 1024 * 1024;

/// User preferences consumed by the installation core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherSettings {
    /// Base directory holding `<fork>/<version>` installations.
    pub installation_path: PathBuf,
    /// Allow automatic cleanup passes to delete old versions.
    pub auto_remove: bool,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            installation_path: default_data_dir().join("installations"),
            auto_remove: false,
        }
    }
}

impl LauncherSettings {
    /// Read `launcher_settings.json` from `data_dir`, falling back to
    /// defaults when missing or unreadable.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Corrupt settings at {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, data_dir: &Path) -> LauncherResult<()> {
        std::fs::create_dir_all(data_dir).map_err(|e| LauncherError::io(data_dir, e))?;
        let path = data_dir.join(SETTINGS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| LauncherError::io(&path, e))
    }
}

/// Static configuration of an `InstallationManager`.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Holds the registry and settings files.
    pub data_dir: PathBuf,
    /// Base name of the game executable inside each installation.
    pub app_name: String,
    pub registry_file: String,
    /// Installations played within this window survive cleanup.
    pub recent_window: Duration,
    /// Reference size for progress throttling.
    pub progress_chunk_size: u64,
}

impl ManagerConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            app_name: DEFAULT_APP_NAME.to_string(),
            registry_file: REGISTRY_FILE.to_string(),
            recent_window: Duration::minutes(DEFAULT_RECENT_WINDOW_MINUTES),
            progress_chunk_size: DEFAULT_PROGRESS_CHUNK,
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_recent_window(mut self, window: Duration) -> Self {
        self.recent_window = window;
        self
    }

    pub fn with_progress_chunk_size(mut self, bytes: u64) -> Self {
        self.progress_chunk_size = bytes;
        self
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(&self.registry_file)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new(default_data_dir())
    }
}

/// `<user data dir>/Buildkeeper`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LauncherSettings {
            installation_path: dir.path().join("games"),
            auto_remove: true,
        };
        settings.save(dir.path()).unwrap();
        assert_eq!(LauncherSettings::load(dir.path()), settings);
    }

    #[test]
    fn corrupt_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "[1, 2").unwrap();
        assert_eq!(LauncherSettings::load(dir.path()), LauncherSettings::default());
    }

    #[test]
    fn config_builders() {
        let config = ManagerConfig::new(PathBuf::from("/data"))
            .with_app_name("Starfall")
            .with_recent_window(Duration::minutes(1))
            .with_progress_chunk_size(10);
        assert_eq!(config.registry_path(), PathBuf::from("/data/installations.json"));
        assert_eq!(config.app_name, "Starfall");
        assert_eq!(config.recent_window, Duration::minutes(1));
        assert_eq!(config.progress_chunk_size, 10);
    }
}
