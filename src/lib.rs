pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::core::downloader::{Download, DownloadProgress, DownloadStatus, ServerDescriptor};
pub use crate::core::error::{LauncherError, LauncherResult};
pub use crate::core::installation::Installation;
pub use crate::core::manager::{CleanupReport, InstallationManager};
pub use crate::core::paths::PathValidation;
pub use crate::core::platform::Platform;
pub use crate::core::state::{LauncherSettings, ManagerConfig};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call more than once.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,buildkeeper=debug")),
        )
        .try_init();

    tracing::debug!("Buildkeeper logging initialised");
}
