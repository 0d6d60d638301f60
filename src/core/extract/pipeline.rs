// ─── Extraction Pipeline ───
// Network stream -> archive decoder -> install directory -> registry entry.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, error, info, warn};

use super::archive::ArchiveExtractor;
use crate::core::downloader::{open_stream, Download, DownloadStatus, Fetcher};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::installation::{Installation, InstallationRegistry};
use crate::core::launch::{ensure_executable, resolve_executable};
use crate::core::platform::Platform;

/// Everything a background download task needs. Cheap to clone.
#[derive(Clone)]
pub struct ExtractionPipeline {
    registry: Arc<Mutex<InstallationRegistry>>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn ArchiveExtractor>,
    platform: Platform,
    app_name: String,
    chunk_size: u64,
}

impl ExtractionPipeline {
    pub fn new(
        registry: Arc<Mutex<InstallationRegistry>>,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn ArchiveExtractor>,
        platform: Platform,
        app_name: String,
        chunk_size: u64,
    ) -> Self {
        Self {
            registry,
            fetcher,
            extractor,
            platform,
            app_name,
            chunk_size,
        }
    }

    /// Drive `download` to completion. Never returns an error: failures are
    /// logged and recorded on the download itself.
    ///
    /// A failed or cancelled run leaves its partial directory on disk
    /// without a registry entry.
    pub async fn run(&self, download: Arc<Download>) {
        let outcome = match self.install(&download).await {
            Ok(installation) => {
                info!(
                    "Installed {} at {:?} ({})",
                    installation.key(),
                    installation.path,
                    installation.id
                );
                DownloadStatus::Completed
            }
            Err(_) if download.is_cancel_requested() => {
                warn!(
                    "Download of {} cancelled, {:?} left unregistered",
                    download.key(),
                    download.install_path()
                );
                DownloadStatus::Cancelled
            }
            Err(e) => {
                error!(
                    "Download of {} failed: {}, {:?} left unregistered",
                    download.key(),
                    e,
                    download.install_path()
                );
                DownloadStatus::Failed(e.to_string())
            }
        };

        if let Err(e) = self.registry.lock().await.persist().await {
            warn!("Failed to persist registry after {}: {}", download.key(), e);
        }
        download.finish(outcome);
    }

    async fn install(&self, download: &Arc<Download>) -> LauncherResult<Installation> {
        let target = download.install_path().to_path_buf();
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| LauncherError::io(&target, e))?;

        let body = open_stream(self.fetcher.as_ref(), download, self.chunk_size).await?;
        let mut reader = SyncIoBridge::new(StreamReader::new(body));
        let extractor = self.extractor.clone();
        let dest = target.clone();

        tokio::task::spawn_blocking(move || -> LauncherResult<()> {
            extractor.extract(&mut reader, &dest)?;
            // Bytes past the last entry (central directory) still belong to the transfer.
            std::io::copy(&mut reader, &mut std::io::sink())
                .map_err(|e| LauncherError::io(&dest, e))?;
            Ok(())
        })
        .await??;

        let expected = download.total_bytes().unwrap_or_default();
        let received = download.bytes_downloaded();
        if received < expected {
            return Err(LauncherError::Truncated { expected, received });
        }

        self.fix_permissions(&target).await?;

        let installation = Installation::new(
            download.fork_name(),
            download.build_version(),
            target,
        );
        self.registry.lock().await.add(installation.clone()).await?;
        Ok(installation)
    }

    async fn fix_permissions(&self, install_dir: &Path) -> LauncherResult<()> {
        if self.platform.is_windows() {
            return Ok(());
        }
        let Some(executable) = resolve_executable(install_dir, self.platform, &self.app_name) else {
            return Ok(());
        };
        match ensure_executable(&executable, self.platform).await {
            Err(LauncherError::ExecutableNotFound(path)) => {
                debug!("Archive has no executable at {:?}", path);
                Ok(())
            }
            other => other,
        }
    }
}
