use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the installation core.
/// Every module returns `Result<T, LauncherError>`; the `Display` text is the
/// human-readable reason shown to the user.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("No download URL for {0}")]
    NoDownloadUrl(String),

    #[error("Server did not report a content length for {0}")]
    MissingContentLength(String),

    #[error("Transfer ended early: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    #[error("Download cancelled")]
    Cancelled,

    // ── Paths ───────────────────────────────────────────
    #[error("Install path already occupied: {0:?}")]
    PathOccupied(PathBuf),

    #[error("Destination already exists: {0:?}")]
    DestinationExists(PathBuf),

    #[error("{path:?} is not under base path {base:?}")]
    OutsideBasePath { path: PathBuf, base: PathBuf },

    // ── Installation ────────────────────────────────────
    #[error("Installation not found: {0}")]
    InstallationNotFound(String),

    #[error("Installation {0} has no install path")]
    BlankInstallPath(String),

    #[error("Couldn't find executable at {0:?}")]
    ExecutableNotFound(PathBuf),

    #[error("Unhandled platform")]
    UnhandledPlatform,

    #[error("Failed to start process {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Automatic removal of old versions is disabled")]
    AutoRemoveDisabled,

    // ── Encoding ────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Archive ─────────────────────────────────────────
    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

impl LauncherError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LauncherError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for LauncherError {
    fn from(error: tokio::task::JoinError) -> Self {
        LauncherError::Other(format!("Task join error: {error}"))
    }
}

// ── Serialization for UI IPC ────────────────────────────
// Front-ends receive the error as its display string.
impl serde::Serialize for LauncherError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
