// ─── Path Policy ───
// Canonical install layout, base-path pre-flight checks and tree moves.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::installation::Installation;

/// `<base>/<fork>/<version>`.
pub fn install_path(base: &Path, fork_name: &str, build_version: u32) -> PathBuf {
    base.join(fork_name).join(build_version.to_string())
}

/// Outcome of a user-facing path check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl PathValidation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

pub fn is_ascii_path(path: &Path) -> bool {
    path.as_os_str()
        .to_str()
        .map(|s| s.is_ascii())
        .unwrap_or(false)
}

/// Pre-flight check for a base path: ASCII only, and writable.
///
/// An existing directory must accept a probe file; a missing one is created.
pub async fn validate_writable(path: &Path) -> PathValidation {
    if !is_ascii_path(path) {
        return PathValidation::invalid(format!(
            "Path contains non-ASCII characters: {}",
            path.display()
        ));
    }

    match tokio::fs::metadata(path).await {
        Ok(meta) if !meta.is_dir() => {
            return PathValidation::invalid(format!("{} is not a directory", path.display()));
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return match tokio::fs::create_dir_all(path).await {
                Ok(()) => PathValidation::ok(),
                Err(e) => PathValidation::invalid(describe_io_failure("create", path, &e)),
            };
        }
        Err(e) => return PathValidation::invalid(describe_io_failure("access", path, &e)),
    }

    let probe = path.join(format!(".write-probe-{}", Uuid::new_v4()));
    if let Err(e) = tokio::fs::write(&probe, b"probe").await {
        return PathValidation::invalid(describe_io_failure("write to", path, &e));
    }
    if let Err(e) = tokio::fs::remove_file(&probe).await {
        return PathValidation::invalid(describe_io_failure("delete files in", path, &e));
    }

    PathValidation::ok()
}

fn describe_io_failure(action: &str, path: &Path, e: &std::io::Error) -> String {
    if e.kind() == ErrorKind::PermissionDenied {
        format!("No permission to {} {}", action, path.display())
    } else {
        format!("Cannot {} {}: {}", action, path.display(), e)
    }
}

/// Create a base path and make sure the owner can use it.
pub async fn prepare_base_path(path: &Path) -> LauncherResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| LauncherError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(path)
            .await
            .map_err(|e| LauncherError::io(path, e))?
            .permissions();
        if perms.mode() & 0o700 != 0o700 {
            perms.set_mode(perms.mode() | 0o700);
            tokio::fs::set_permissions(path, perms)
                .await
                .map_err(|e| LauncherError::io(path, e))?;
        }
    }

    Ok(())
}

/// Substitute `old_base` with `new_base` at the start of `path`.
pub fn rebase(path: &Path, old_base: &Path, new_base: &Path) -> LauncherResult<PathBuf> {
    path.strip_prefix(old_base)
        .map(|rest| new_base.join(rest))
        .map_err(|_| LauncherError::OutsideBasePath {
            path: path.to_path_buf(),
            base: old_base.to_path_buf(),
        })
}

/// Move an installation tree to its place under `new_base`.
///
/// Refuses to overwrite an existing destination. The installation's path is
/// only updated once the tree is in place.
pub async fn move_installation(
    installation: &mut Installation,
    old_base: &Path,
    new_base: &Path,
) -> LauncherResult<()> {
    let source = installation.path.clone();
    let destination = rebase(&source, old_base, new_base)?;

    if let Err(e) = move_tree(&source, &destination).await {
        error!(
            "Failed to move installation {} from {:?} to {:?}: {}",
            installation.id, source, destination, e
        );
        return Err(e);
    }

    installation.path = destination;
    info!(
        "Moved installation {} ({}) to {:?}",
        installation.id,
        installation.key(),
        installation.path
    );
    Ok(())
}

/// Move a directory tree. Falls back to copy-then-delete when a plain rename
/// is not possible (e.g. across filesystems).
pub async fn move_tree(source: &Path, destination: &Path) -> LauncherResult<()> {
    if tokio::fs::try_exists(destination)
        .await
        .map_err(|e| LauncherError::io(destination, e))?
    {
        return Err(LauncherError::DestinationExists(destination.to_path_buf()));
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| LauncherError::io(parent, e))?;
    }

    match tokio::fs::rename(source, destination).await {
        Ok(()) => return Ok(()),
        Err(e) => debug!(
            "Rename {:?} -> {:?} failed ({}), copying instead",
            source, destination, e
        ),
    }

    let src = source.to_path_buf();
    let dst = destination.to_path_buf();
    let copied = tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dst)).await?;
    if let Err(e) = copied {
        // Leave the source as the single intact copy.
        if let Err(cleanup) = tokio::fs::remove_dir_all(destination).await {
            warn!(
                "Could not remove partial copy at {:?}, it will block a retry: {}",
                destination, cleanup
            );
        }
        return Err(e);
    }

    tokio::fs::remove_dir_all(source)
        .await
        .map_err(|e| LauncherError::io(source, e))
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> LauncherResult<()> {
    std::fs::create_dir_all(destination).map_err(|e| LauncherError::io(destination, e))?;

    for entry in std::fs::read_dir(source).map_err(|e| LauncherError::io(source, e))? {
        let entry = entry.map_err(|e| LauncherError::io(source, e))?;
        let src_path = entry.path();
        let dst_path = destination.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| LauncherError::io(&src_path, e))?;

        if file_type.is_symlink() {
            copy_symlink(&src_path, &dst_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            // fs::copy carries permission bits over, keeping executables runnable.
            std::fs::copy(&src_path, &dst_path).map_err(|e| LauncherError::io(&dst_path, e))?;
        }
    }

    Ok(())
}

/// Recreate the link itself; its target may be relative or dangling.
#[cfg(unix)]
fn copy_symlink(source: &Path, destination: &Path) -> LauncherResult<()> {
    let target = std::fs::read_link(source).map_err(|e| LauncherError::io(source, e))?;
    std::os::unix::fs::symlink(&target, destination).map_err(|e| LauncherError::io(destination, e))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, destination: &Path) -> LauncherResult<()> {
    if source.is_dir() {
        copy_dir_recursive(source, destination)
    } else {
        std::fs::copy(source, destination)
            .map(|_| ())
            .map_err(|e| LauncherError::io(destination, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_path_layout() {
        assert_eq!(
            install_path(Path::new("/games"), "stable", 42),
            PathBuf::from("/games/stable/42")
        );
    }

    #[test]
    fn rebase_swaps_prefix() {
        let moved = rebase(
            Path::new("/old/forkA/1"),
            Path::new("/old"),
            Path::new("/new"),
        )
        .unwrap();
        assert_eq!(moved, PathBuf::from("/new/forkA/1"));

        assert!(matches!(
            rebase(Path::new("/other/x"), Path::new("/old"), Path::new("/new")),
            Err(LauncherError::OutsideBasePath { .. })
        ));
    }

    #[tokio::test]
    async fn non_ascii_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = validate_writable(&dir.path().join("válid")).await;
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("non-ASCII"));
        assert!(!dir.path().join("válid").exists());
    }

    #[tokio::test]
    async fn writable_path_is_valid_and_probe_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(validate_writable(dir.path()).await, PathValidation::ok());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_path_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b");
        assert!(validate_writable(&target).await.valid);
        assert!(target.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_only_path_reports_permission() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Privileged users bypass mode bits; nothing to assert then.
        let bypassed = std::fs::write(locked.join("x"), b"x").is_ok();
        if !bypassed {
            let result = validate_writable(&locked).await;
            assert!(!result.valid);
            assert!(result.reason.unwrap().contains("permission"));
        }

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn move_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        std::fs::create_dir_all(old.join("forkA/1")).unwrap();
        std::fs::write(old.join("forkA/1/data.bin"), b"payload").unwrap();
        std::fs::create_dir_all(new.join("forkA/1")).unwrap();

        let mut inst = Installation::new("forkA", 1, old.join("forkA/1"));
        let result = move_installation(&mut inst, &old, &new).await;

        assert!(matches!(result, Err(LauncherError::DestinationExists(_))));
        assert_eq!(inst.path, old.join("forkA/1"));
        assert!(old.join("forkA/1/data.bin").exists());
    }

    #[tokio::test]
    async fn move_relocates_tree_and_updates_path() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        std::fs::create_dir_all(old.join("forkB/2/sub")).unwrap();
        std::fs::write(old.join("forkB/2/sub/file.txt"), b"hello").unwrap();

        let mut inst = Installation::new("forkB", 2, old.join("forkB/2"));
        move_installation(&mut inst, &old, &new).await.unwrap();

        assert_eq!(inst.path, new.join("forkB/2"));
        assert_eq!(
            std::fs::read(new.join("forkB/2/sub/file.txt")).unwrap(),
            b"hello"
        );
        assert!(!old.join("forkB/2").exists());
    }

    #[test]
    fn copy_keeps_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("a/b")).unwrap();
        std::fs::write(src.join("a/b/c.txt"), b"c").unwrap();
        std::fs::write(src.join("top.txt"), b"t").unwrap();

        let dst = dir.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();
        assert_eq!(std::fs::read(dst.join("a/b/c.txt")).unwrap(), b"c");
        assert_eq!(std::fs::read(dst.join("top.txt")).unwrap(), b"t");
    }

    #[cfg(unix)]
    #[test]
    fn copy_recreates_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("Versions/A")).unwrap();
        std::fs::write(src.join("Versions/A/core"), b"framework").unwrap();
        std::os::unix::fs::symlink("A", src.join("Versions/Current")).unwrap();
        std::os::unix::fs::symlink("missing.so", src.join("dangling")).unwrap();

        let dst = dir.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();

        let current = dst.join("Versions/Current");
        assert!(std::fs::symlink_metadata(&current).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_link(&current).unwrap(), PathBuf::from("A"));
        assert_eq!(std::fs::read(current.join("core")).unwrap(), b"framework");
        assert_eq!(
            std::fs::read_link(dst.join("dangling")).unwrap(),
            PathBuf::from("missing.so")
        );
    }

    #[tokio::test]
    async fn failed_copy_leaves_no_partial_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("old/forkA/1");
        let dst = dir.path().join("new/forkA/1");

        let result = move_tree(&src, &dst).await;

        assert!(matches!(result, Err(LauncherError::Io { .. })));
        assert!(!dst.exists());
    }
}
