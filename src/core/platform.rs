use std::path::Path;

use serde::{Deserialize, Serialize};

/// Host platform as far as install layout and process launch are concerned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    /// Linux inside a Flatpak sandbox. Same layout as native Linux.
    Flatpak,
    Unknown,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "linux") {
            if std::env::var_os("FLATPAK_ID").is_some() || Path::new("/.flatpak-info").exists() {
                Platform::Flatpak
            } else {
                Platform::Linux
            }
        } else {
            Platform::Unknown
        }
    }

    pub fn is_windows(self) -> bool {
        self == Platform::Windows
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Linux => write!(f, "linux"),
            Platform::Flatpak => write!(f, "flatpak"),
            Platform::Unknown => write!(f, "unknown"),
        }
    }
}
