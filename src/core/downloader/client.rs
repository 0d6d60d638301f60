use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use bytes::Bytes;
use futures_util::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::fetch::{ByteStream, Fetcher};
use super::progress::{DownloadProgress, ProgressThrottle};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::installation::InstallKey;
use crate::core::paths::install_path;

/// What the server list tells us about a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub fork_name: String,
    pub build_version: u32,
    pub download_url: Option<String>,
}

impl ServerDescriptor {
    /// The archive URL, if the server advertises a usable one.
    pub fn download_url(&self) -> Option<&str> {
        self.download_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn key(&self) -> InstallKey {
        InstallKey::new(self.fork_name.clone(), self.build_version)
    }
}

/// Where a download ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum DownloadStatus {
    Active,
    Completed,
    Failed(String),
    Cancelled,
}

/// One in-flight (or just finished) transfer-and-extract operation.
///
/// Shared as `Arc<Download>` between the coordinator, the background task
/// and any observer.
#[derive(Debug)]
pub struct Download {
    url: String,
    install_path: PathBuf,
    key: InstallKey,
    total_bytes: OnceLock<u64>,
    bytes_downloaded: AtomicU64,
    active: AtomicBool,
    status: Mutex<DownloadStatus>,
    progress: watch::Sender<DownloadProgress>,
    cancel: CancellationToken,
}

impl Download {
    fn new(url: String, install_path: PathBuf, key: InstallKey) -> Self {
        let (progress, _) = watch::channel(DownloadProgress {
            bytes_downloaded: 0,
            total_bytes: None,
            active: true,
        });
        Self {
            url,
            install_path,
            key,
            total_bytes: OnceLock::new(),
            bytes_downloaded: AtomicU64::new(0),
            active: AtomicBool::new(true),
            status: Mutex::new(DownloadStatus::Active),
            progress,
            cancel: CancellationToken::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    pub fn key(&self) -> &InstallKey {
        &self.key
    }

    pub fn fork_name(&self) -> &str {
        &self.key.fork_name
    }

    pub fn build_version(&self) -> u32 {
        self.key.build_version
    }

    /// Known once response headers have arrived.
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes.get().copied()
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Latest published progress.
    pub fn progress(&self) -> DownloadProgress {
        *self.progress.borrow()
    }

    /// Independent receiver of throttled progress updates. Dropping it has
    /// no effect on the transfer or other subscribers.
    pub fn subscribe(&self) -> watch::Receiver<DownloadProgress> {
        self.progress.subscribe()
    }

    /// Wait until the background task has finished, then report how.
    pub async fn finished(&self) -> DownloadStatus {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this only returns once inactive.
        let _ = rx.wait_for(|p| !p.active).await;
        self.status()
    }

    /// Abort the network transfer. Has no effect once finished.
    pub fn cancel(&self) {
        if self.is_active() {
            info!("Cancelling download of {}", self.key);
            self.cancel.cancel();
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn set_total(&self, total: u64) {
        let _ = self.total_bytes.set(total);
        self.publish();
    }

    fn record_chunk(&self, len: u64) -> u64 {
        self.bytes_downloaded.fetch_add(len, Ordering::AcqRel) + len
    }

    fn publish(&self) {
        self.progress.send_replace(DownloadProgress {
            bytes_downloaded: self.bytes_downloaded(),
            total_bytes: self.total_bytes(),
            active: self.is_active(),
        });
    }

    /// Clear the active flag and record the outcome.
    pub(crate) fn finish(&self, outcome: DownloadStatus) {
        if let Ok(mut status) = self.status.lock() {
            *status = outcome;
        }
        self.active.store(false, Ordering::Release);
        self.publish();
    }
}

/// Result of asking the coordinator for a download.
#[derive(Debug)]
pub enum DownloadStart {
    /// A new record; the caller must hand it to the extraction pipeline.
    Created(Arc<Download>),
    /// An equivalent download was already running.
    Existing(Arc<Download>),
}

impl DownloadStart {
    pub fn download(&self) -> &Arc<Download> {
        match self {
            DownloadStart::Created(d) | DownloadStart::Existing(d) => d,
        }
    }
}

/// In-memory table of downloads keyed by fork and build.
///
/// Never persisted; a process restart starts with an empty table.
#[derive(Debug, Default)]
pub struct DownloadCoordinator {
    downloads: Mutex<HashMap<InstallKey, Arc<Download>>>,
}

impl DownloadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a download request for `server` under `base_path`.
    ///
    /// The existence check and the insert happen under one lock, so two
    /// concurrent requests for the same key never both get `Created`.
    pub fn begin(&self, server: &ServerDescriptor, base_path: &Path) -> LauncherResult<DownloadStart> {
        let key = server.key();
        let Some(url) = server.download_url() else {
            return Err(LauncherError::NoDownloadUrl(key.to_string()));
        };

        let mut downloads = self.lock();
        if let Some(existing) = downloads.get(&key).filter(|d| d.is_active()) {
            debug!("Download for {} already running", key);
            return Ok(DownloadStart::Existing(existing.clone()));
        }

        let target = install_path(base_path, &key.fork_name, key.build_version);
        if target.exists() {
            return Err(LauncherError::PathOccupied(target));
        }

        let download = Arc::new(Download::new(url.to_string(), target, key.clone()));
        downloads.insert(key, download.clone());
        info!(
            "Queued download {} -> {:?}",
            download.url, download.install_path
        );
        Ok(DownloadStart::Created(download))
    }

    pub fn get_active(&self, key: &InstallKey) -> Option<Arc<Download>> {
        self.lock().get(key).filter(|d| d.is_active()).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Download>> {
        self.lock().values().cloned().collect()
    }

    pub fn cancel(&self, key: &InstallKey) -> bool {
        match self.get_active(key) {
            Some(download) => {
                download.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop records of downloads that are no longer active.
    pub fn clear_finished(&self) {
        self.lock().retain(|_, d| d.is_active());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<InstallKey, Arc<Download>>> {
        self.downloads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Open the transfer for `download` and return its body with progress
/// accounting and cancellation wired in.
///
/// The declared content length is mandatory. Every chunk advances the byte
/// counter; subscribers and the log see throttled updates. A cancelled
/// download yields an `Interrupted` error as its last item.
pub async fn open_stream(
    fetcher: &dyn Fetcher,
    download: &Arc<Download>,
    chunk_size: u64,
) -> LauncherResult<ByteStream> {
    let token = download.cancellation();

    let response = tokio::select! {
        response = fetcher.fetch(download.url()) => response?,
        _ = token.cancelled() => return Err(LauncherError::Cancelled),
    };

    let Some(total) = response.content_length else {
        return Err(LauncherError::MissingContentLength(download.url().to_string()));
    };
    download.set_total(total);
    info!("Downloading {} ({} bytes)", download.key(), total);

    let tracked = download.clone();
    let mut throttle = ProgressThrottle::new(chunk_size);
    let counted = response.body.map(move |chunk: std::io::Result<Bytes>| {
        let chunk = chunk?;
        let downloaded = tracked.record_chunk(chunk.len() as u64);
        if throttle.should_emit(downloaded, Some(total), Instant::now()) {
            tracked.publish();
            debug!(
                "{}: {}/{} bytes ({:.0}%)",
                tracked.key(),
                downloaded,
                total,
                tracked.progress().percent().unwrap_or_default()
            );
        }
        Ok(chunk)
    });

    let after_cancel = token.clone();
    let interrupted = stream::once(async move {
        after_cancel.is_cancelled().then(|| {
            Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "download cancelled",
            ))
        })
    })
    .filter_map(future::ready);

    Ok(counted
        .take_until(token.cancelled_owned())
        .chain(interrupted)
        .boxed())
}
