use std::path::{Path, PathBuf};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::platform::Platform;

/// Expected game executable inside an installation directory.
///
/// No existence check; a missing binary surfaces when the launch is attempted.
pub fn resolve_executable(install_path: &Path, platform: Platform, app_name: &str) -> Option<PathBuf> {
    match platform {
        Platform::Windows => Some(install_path.join(format!("{app_name}.exe"))),
        Platform::MacOs => Some(
            install_path
                .join(format!("{app_name}.app"))
                .join("Contents")
                .join("MacOS")
                .join(app_name.to_lowercase()),
        ),
        Platform::Linux | Platform::Flatpak => Some(install_path.join(app_name)),
        Platform::Unknown => None,
    }
}

/// Set the user execute bit on `path` (non-Windows). No-op when already set.
pub async fn ensure_executable(path: &Path, platform: Platform) -> LauncherResult<()> {
    if platform.is_windows() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LauncherError::ExecutableNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(LauncherError::io(path, e)),
        };

        let mut perms = meta.permissions();
        if perms.mode() & 0o100 == 0 {
            perms.set_mode(perms.mode() | 0o755);
            tokio::fs::set_permissions(path, perms)
                .await
                .map_err(|e| LauncherError::io(path, e))?;
        }
    }

    #[cfg(not(unix))]
    {
        if !path.exists() {
            return Err(LauncherError::ExecutableNotFound(path.to_path_buf()));
        }
    }

    Ok(())
}
