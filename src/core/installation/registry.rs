use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::model::Installation;
use crate::core::error::{LauncherError, LauncherResult};

/// Durable list of installed builds, backed by a single JSON file.
///
/// Every mutation rewrites the whole file. Callers serialize access by
/// holding the registry behind one mutex.
#[derive(Debug)]
pub struct InstallationRegistry {
    path: PathBuf,
    installations: Vec<Installation>,
}

impl InstallationRegistry {
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            installations: Vec::new(),
        }
    }

    /// Load the registry file. A missing, unreadable or corrupt file yields
    /// an empty registry.
    pub async fn load(path: PathBuf) -> Self {
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry at {:?}, starting empty", path);
                return Self::empty(path);
            }
            Err(e) => {
                warn!("Cannot read registry {:?}: {}", path, e);
                return Self::empty(path);
            }
        };

        let loaded: Vec<Installation> = match serde_json::from_str(&raw) {
            Ok(list) => list,
            Err(e) => {
                warn!("Corrupt registry at {:?}: {}", path, e);
                return Self::empty(path);
            }
        };

        let mut registry = Self::empty(path);
        for installation in loaded {
            if registry.insert(installation).is_some() {
                warn!("Duplicate registry entry dropped in {:?}", registry.path);
            }
        }
        info!(
            "Loaded {} installations from {:?}",
            registry.installations.len(),
            registry.path
        );
        registry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &[Installation] {
        &self.installations
    }

    pub fn find(&self, fork_name: &str, build_version: u32) -> Option<&Installation> {
        self.installations
            .iter()
            .find(|i| i.matches(fork_name, build_version))
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Installation> {
        self.installations.iter().find(|i| i.id == id)
    }

    pub(crate) fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Installation> {
        self.installations.iter_mut().find(|i| i.id == id)
    }

    /// Register an installation and persist. Any existing record for the
    /// same fork and build is replaced.
    pub async fn add(&mut self, installation: Installation) -> LauncherResult<()> {
        if let Some(replaced) = self.insert(installation) {
            debug!("Replaced registry entry {} ({})", replaced.id, replaced.key());
        }
        self.persist().await
    }

    /// Remove by id and persist. Returns the removed record, if any.
    pub async fn remove(&mut self, id: &str) -> LauncherResult<Option<Installation>> {
        let Some(index) = self.installations.iter().position(|i| i.id == id) else {
            return Ok(None);
        };
        let removed = self.installations.remove(index);
        self.persist().await?;
        Ok(Some(removed))
    }

    /// Apply `change` to the record with `id` and persist.
    pub async fn update<F>(&mut self, id: &str, change: F) -> LauncherResult<Option<Installation>>
    where
        F: FnOnce(&mut Installation),
    {
        let Some(installation) = self.find_by_id_mut(id) else {
            return Ok(None);
        };
        change(installation);
        let updated = installation.clone();
        self.persist().await?;
        Ok(Some(updated))
    }

    /// Overwrite the backing file with the full current set.
    pub async fn persist(&self) -> LauncherResult<()> {
        let json = serde_json::to_string_pretty(&self.installations)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::io(parent, e))?;
        }

        // Replace in one rename so a crash never leaves a truncated registry.
        let staging = self.staging_path();
        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| LauncherError::io(&staging, e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| LauncherError::io(&self.path, e))?;

        debug!(
            "Persisted {} installations to {:?}",
            self.installations.len(),
            self.path
        );
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        PathBuf::from(staging)
    }

    fn insert(&mut self, installation: Installation) -> Option<Installation> {
        let existing = self
            .installations
            .iter()
            .position(|i| i.matches(&installation.fork_name, installation.build_version));
        let replaced = existing.map(|index| self.installations.remove(index));
        self.installations.push(installation);
        replaced
    }
}
