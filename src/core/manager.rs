// ─── Installation Manager ───
// Façade over registry, downloads, extraction, launch and relocation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::core::downloader::{
    Download, DownloadCoordinator, DownloadStart, Fetcher, ServerDescriptor,
};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::extract::{ArchiveExtractor, ExtractionPipeline, ZipStreamExtractor};
use crate::core::http::HttpFetcher;
use crate::core::installation::{InstallKey, Installation, InstallationRegistry};
use crate::core::launch::{
    build_command, ensure_executable, game_arguments, resolve_executable, spawn_detached,
    InUseProbe, RunningProcessProbe,
};
use crate::core::paths::policy::rebase;
use crate::core::paths::{
    move_installation, prepare_base_path, remover_for, validate_writable, PathValidation,
    TreeRemover,
};
use crate::core::platform::Platform;
use crate::core::state::{LauncherSettings, ManagerConfig};

/// What a cleanup pass did.
#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<Installation>,
    pub kept: Vec<Installation>,
    /// Installations whose deletion failed, with the reason.
    pub failed: Vec<(Installation, String)>,
}

/// Owns all installation state. Callers only ever see copies of records and
/// shared `Download` handles.
pub struct InstallationManager {
    config: ManagerConfig,
    settings: RwLock<LauncherSettings>,
    registry: Arc<Mutex<InstallationRegistry>>,
    downloads: DownloadCoordinator,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn ArchiveExtractor>,
    remover: Arc<dyn TreeRemover>,
    probe: Arc<dyn InUseProbe>,
    platform: Platform,
}

impl InstallationManager {
    /// Load settings and registry from `config.data_dir`.
    pub async fn open(config: ManagerConfig) -> LauncherResult<Self> {
        let settings = LauncherSettings::load(&config.data_dir);
        Self::with_settings(config, settings).await
    }

    pub async fn with_settings(
        config: ManagerConfig,
        settings: LauncherSettings,
    ) -> LauncherResult<Self> {
        let registry = InstallationRegistry::load(config.registry_path()).await;
        let platform = Platform::current();
        info!(
            "Installation manager ready: {} installations, base {:?}, platform {}",
            registry.list().len(),
            settings.installation_path,
            platform
        );

        Ok(Self {
            config,
            settings: RwLock::new(settings),
            registry: Arc::new(Mutex::new(registry)),
            downloads: DownloadCoordinator::new(),
            fetcher: Arc::new(HttpFetcher::new()?),
            extractor: Arc::new(ZipStreamExtractor),
            remover: remover_for(platform),
            probe: Arc::new(RunningProcessProbe::new()),
            platform,
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Also selects the matching tree-removal strategy.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self.remover = remover_for(platform);
        self
    }

    pub fn with_tree_remover(mut self, remover: Arc<dyn TreeRemover>) -> Self {
        self.remover = remover;
        self
    }

    pub fn with_in_use_probe(mut self, probe: Arc<dyn InUseProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub async fn settings(&self) -> LauncherSettings {
        self.settings.read().await.clone()
    }

    pub async fn set_auto_remove(&self, enabled: bool) -> LauncherResult<()> {
        let mut settings = self.settings.write().await;
        settings.auto_remove = enabled;
        settings.save(&self.config.data_dir)
    }

    // ── Reads ───────────────────────────────────────────

    pub async fn list_installations(&self) -> Vec<Installation> {
        self.registry.lock().await.list().to_vec()
    }

    pub async fn get_installation(&self, fork_name: &str, build_version: u32) -> Option<Installation> {
        self.registry
            .lock()
            .await
            .find(fork_name, build_version)
            .cloned()
    }

    pub fn get_active_download(&self, fork_name: &str, build_version: u32) -> Option<Arc<Download>> {
        self.downloads
            .get_active(&InstallKey::new(fork_name, build_version))
    }

    /// Active and finished downloads still on record.
    pub fn downloads(&self) -> Vec<Arc<Download>> {
        self.downloads.list()
    }

    pub fn clear_finished_downloads(&self) {
        self.downloads.clear_finished();
    }

    // ── Downloads ───────────────────────────────────────

    /// Start downloading `server`'s build, or return the download already
    /// running for it. Returns without waiting for the transfer.
    pub async fn start_download(&self, server: &ServerDescriptor) -> LauncherResult<Arc<Download>> {
        // Held through admission so a concurrent move cannot switch the base
        // between the read and the insert.
        let settings = self.settings.read().await;
        let start = self
            .downloads
            .begin(server, &settings.installation_path)
            .map_err(|e| {
                info!("Download of {} rejected: {}", server.key(), e);
                e
            })?;
        drop(settings);

        match start {
            DownloadStart::Existing(download) => Ok(download),
            DownloadStart::Created(download) => {
                let pipeline = self.pipeline();
                let task = download.clone();
                tokio::spawn(async move { pipeline.run(task).await });
                Ok(download)
            }
        }
    }

    /// Abort a running transfer. Returns false when nothing was running.
    pub fn cancel_download(&self, fork_name: &str, build_version: u32) -> bool {
        self.downloads
            .cancel(&InstallKey::new(fork_name, build_version))
    }

    fn pipeline(&self) -> ExtractionPipeline {
        ExtractionPipeline::new(
            self.registry.clone(),
            self.fetcher.clone(),
            self.extractor.clone(),
            self.platform,
            self.config.app_name.clone(),
            self.config.progress_chunk_size,
        )
    }

    // ── Launch ──────────────────────────────────────────

    /// Launch an installation, optionally pointing it at a server. Returns
    /// the child pid; the process is not tracked afterwards.
    pub async fn start_installation(
        &self,
        id: &str,
        server: Option<&str>,
        port: Option<u16>,
    ) -> LauncherResult<u32> {
        let installation = self
            .registry
            .lock()
            .await
            .find_by_id(id)
            .cloned()
            .ok_or_else(|| LauncherError::InstallationNotFound(id.to_string()))?;

        let executable =
            resolve_executable(&installation.path, self.platform, &self.config.app_name)
                .ok_or(LauncherError::UnhandledPlatform)?;
        ensure_executable(&executable, self.platform).await?;

        let args = game_arguments(server, port);
        let command = build_command(&executable, &args, &installation.path, self.platform)
            .ok_or(LauncherError::UnhandledPlatform)?;
        let pid = spawn_detached(command)?;

        self.registry
            .lock()
            .await
            .update(id, |i| i.last_played = Some(Utc::now()))
            .await?;

        info!("Started {} (pid {})", installation.key(), pid);
        Ok(pid)
    }

    // ── Delete / cleanup ────────────────────────────────

    /// Remove an installation's directory (if present) and its registry entry.
    pub async fn delete_installation(&self, id: &str) -> LauncherResult<()> {
        let mut registry = self.registry.lock().await;
        self.delete_locked(&mut registry, id).await
    }

    /// Lookup, tree removal and record removal under one registry lock, so a
    /// move cannot relocate the tree in between.
    async fn delete_locked(&self, registry: &mut InstallationRegistry, id: &str) -> LauncherResult<()> {
        let installation = registry
            .find_by_id(id)
            .cloned()
            .ok_or_else(|| LauncherError::InstallationNotFound(id.to_string()))?;

        if installation.path.to_string_lossy().trim().is_empty() {
            return Err(LauncherError::BlankInstallPath(id.to_string()));
        }

        if tokio::fs::try_exists(&installation.path).await.unwrap_or(true) {
            if let Err(e) = self.remover.remove_tree(&installation.path).await {
                error!(
                    "Failed to delete {} at {:?}: {}",
                    installation.key(),
                    installation.path,
                    e
                );
                return Err(e);
            }
        } else {
            debug!("No directory at {:?}, dropping record only", installation.path);
        }

        registry.remove(id).await?;
        info!("Deleted installation {} ({})", installation.key(), id);
        Ok(())
    }

    /// Delete every installation that is neither in use nor recently played.
    ///
    /// Automatic passes honour the `auto_remove` preference. One failed
    /// deletion does not stop the rest.
    pub async fn cleanup_old_versions(&self, is_automatic: bool) -> LauncherResult<CleanupReport> {
        if is_automatic && !self.settings.read().await.auto_remove {
            debug!("Automatic cleanup skipped: auto-remove disabled");
            return Err(LauncherError::AutoRemoveDisabled);
        }

        let probe = self.probe.clone();
        tokio::task::spawn_blocking(move || probe.refresh()).await?;

        let now = Utc::now();
        let mut report = CleanupReport::default();
        let mut registry = self.registry.lock().await;
        let installations = registry.list().to_vec();
        for installation in installations {
            if self.probe.is_in_use(&installation)
                || installation.is_recently_used(self.config.recent_window, now)
            {
                report.kept.push(installation);
                continue;
            }

            match self.delete_locked(&mut registry, &installation.id).await {
                Ok(()) => report.removed.push(installation),
                Err(e) => {
                    warn!("Cleanup could not delete {}: {}", installation.key(), e);
                    report.failed.push((installation, e.to_string()));
                }
            }
        }

        info!(
            "Cleanup removed {}, kept {}, failed {}",
            report.removed.len(),
            report.kept.len(),
            report.failed.len()
        );
        Ok(report)
    }

    // ── Relocation ──────────────────────────────────────

    /// Move every installation under the current base path to `new_base`
    /// and make it the new base path.
    ///
    /// All destinations are checked before anything moves; an occupied one
    /// fails the whole call untouched. A failure mid-batch stops the batch,
    /// keeping the records of already moved installations accurate.
    pub async fn move_installations(&self, new_base: &Path) -> LauncherResult<()> {
        // Held until the new base is saved: downloads are admitted under the
        // read side, so none can start against the old base mid-move.
        let mut settings = self.settings.write().await;
        let old_base = settings.installation_path.clone();
        if old_base == new_base {
            return Ok(());
        }
        if self.downloads.list().iter().any(|d| d.is_active()) {
            return Err(LauncherError::Other(
                "Cannot move installations while downloads are running".into(),
            ));
        }

        prepare_base_path(new_base).await?;

        let mut registry = self.registry.lock().await;
        let plan = registry
            .list()
            .iter()
            .filter(|i| i.path.starts_with(&old_base))
            .map(|i| Ok((i.id.clone(), rebase(&i.path, &old_base, new_base)?)))
            .collect::<LauncherResult<Vec<(String, PathBuf)>>>()?;

        for (id, destination) in &plan {
            if tokio::fs::try_exists(destination).await.unwrap_or(true) {
                error!(
                    "Cannot move installation {} from {:?} to {:?}: destination exists",
                    id, old_base, destination
                );
                return Err(LauncherError::DestinationExists(destination.clone()));
            }
        }

        for (id, _) in &plan {
            let Some(installation) = registry.find_by_id_mut(id) else {
                continue;
            };
            if let Err(e) = move_installation(installation, &old_base, new_base).await {
                if let Err(persist_err) = registry.persist().await {
                    warn!("Failed to persist registry after aborted move: {}", persist_err);
                }
                return Err(e);
            }
        }
        registry.persist().await?;
        drop(registry);

        settings.installation_path = new_base.to_path_buf();
        if let Err(e) = settings.save(&self.config.data_dir) {
            warn!("Moved installations but could not save settings: {}", e);
        }

        info!(
            "Moved {} installations from {:?} to {:?}",
            plan.len(),
            old_base,
            new_base
        );
        Ok(())
    }

    /// Pre-flight check for a user-picked base path.
    pub async fn is_valid_installation_base_path(&self, path: &Path) -> PathValidation {
        validate_writable(path).await
    }

    /// `<base>/<fork>/<version>` directories with no registry entry and no
    /// running download, typically left behind by failed extractions.
    pub async fn find_orphaned_directories(&self) -> LauncherResult<Vec<PathBuf>> {
        let base = self.settings.read().await.installation_path.clone();
        if !tokio::fs::try_exists(&base)
            .await
            .map_err(|e| LauncherError::io(&base, e))?
        {
            return Ok(Vec::new());
        }

        let mut known: HashSet<PathBuf> = self
            .list_installations()
            .await
            .into_iter()
            .map(|i| i.path)
            .collect();
        known.extend(
            self.downloads
                .list()
                .into_iter()
                .filter(|d| d.is_active())
                .map(|d| d.install_path().to_path_buf()),
        );

        let mut orphans = Vec::new();
        for fork_dir in subdirectories(&base).await? {
            for version_dir in subdirectories(&fork_dir).await? {
                if !known.contains(&version_dir) {
                    orphans.push(version_dir);
                }
            }
        }
        Ok(orphans)
    }
}

async fn subdirectories(path: &Path) -> LauncherResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| LauncherError::io(path, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| LauncherError::io(path, e))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}
