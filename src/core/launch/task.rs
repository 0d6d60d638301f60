// ─── Launch Task ───
// Spawns the game process detached from the launcher.

use std::path::Path;
use std::process::{Command, Stdio};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

use tracing::{debug, info};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::platform::Platform;

/// `--server <address> [--port <port>]`, or nothing without a server.
pub fn game_arguments(server: Option<&str>, port: Option<u16>) -> Vec<String> {
    let Some(server) = server.map(str::trim).filter(|s| !s.is_empty()) else {
        return Vec::new();
    };

    let mut args = vec!["--server".to_string(), server.to_string()];
    if let Some(port) = port {
        args.push("--port".to_string());
        args.push(port.to_string());
    }
    args
}

/// Build a direct (non-shell) launch command, or `None` on platforms we
/// cannot launch on.
pub fn build_command(
    executable: &Path,
    args: &[String],
    working_dir: &Path,
    platform: Platform,
) -> Option<Command> {
    if platform == Platform::Unknown {
        return None;
    }

    let mut cmd = Command::new(executable);
    cmd.args(args);
    cmd.current_dir(working_dir);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    configure_platform_spawn(&mut cmd);
    Some(cmd)
}

/// Spawn and forget. Returns the child's pid; the launcher never waits on it.
pub fn spawn_detached(mut cmd: Command) -> LauncherResult<u32> {
    debug!("Command: {:?}", cmd);

    let child = cmd.spawn().map_err(|source| LauncherError::Spawn {
        path: cmd.get_program().into(),
        source,
    })?;

    let pid = child.id();
    info!("Launched {:?} (pid {})", cmd.get_program(), pid);
    Ok(pid)
}

fn configure_platform_spawn(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        const DETACHED_PROCESS: u32 = 0x00000008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group: terminal signals aimed at the launcher skip the game.
        cmd.process_group(0);
    }
}
