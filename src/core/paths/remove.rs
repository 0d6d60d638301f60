// ─── Tree removal ───
// One "remove tree" capability, with the strategy picked per platform.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::platform::Platform;

#[async_trait]
pub trait TreeRemover: Send + Sync {
    /// Recursively delete `path`. The directory must exist.
    async fn remove_tree(&self, path: &Path) -> LauncherResult<()>;
}

/// Clears read-only attributes before deleting. Archives extracted on Windows
/// often carry read-only files that `remove_dir_all` refuses to delete.
pub struct AttributeResetRemover;

#[async_trait]
impl TreeRemover for AttributeResetRemover {
    async fn remove_tree(&self, path: &Path) -> LauncherResult<()> {
        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            clear_readonly_recursive(&target)?;
            std::fs::remove_dir_all(&target).map_err(|e| LauncherError::io(&target, e))
        })
        .await?
    }
}

#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly_recursive(path: &Path) -> LauncherResult<()> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| LauncherError::io(path, e))?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }

    let mut perms = meta.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms).map_err(|e| LauncherError::io(path, e))?;
    }

    if meta.is_dir() {
        for entry in std::fs::read_dir(path).map_err(|e| LauncherError::io(path, e))? {
            let entry = entry.map_err(|e| LauncherError::io(path, e))?;
            clear_readonly_recursive(&entry.path())?;
        }
    }
    Ok(())
}

/// `rm -rf` through a direct process spawn.
pub struct ShellRemover;

#[async_trait]
impl TreeRemover for ShellRemover {
    async fn remove_tree(&self, path: &Path) -> LauncherResult<()> {
        debug!("rm -rf {:?}", path);
        let output = tokio::process::Command::new("rm")
            .arg("-rf")
            .arg(path)
            .output()
            .await
            .map_err(|e| LauncherError::io(path, e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(LauncherError::Other(format!(
                "rm -rf {} failed: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

pub fn remover_for(platform: Platform) -> Arc<dyn TreeRemover> {
    if platform.is_windows() {
        Arc::new(AttributeResetRemover)
    } else {
        Arc::new(ShellRemover)
    }
}
