use std::path::PathBuf;
use std::sync::Mutex;

use sysinfo::System;
use tracing::debug;

use crate::core::installation::Installation;

/// Answers "is this installation in use right now?" for cleanup.
pub trait InUseProbe: Send + Sync {
    /// Called once before a batch of `is_in_use` checks.
    fn refresh(&self) {}

    fn is_in_use(&self, installation: &Installation) -> bool;
}

impl<F> InUseProbe for F
where
    F: Fn(&Installation) -> bool + Send + Sync,
{
    fn is_in_use(&self, installation: &Installation) -> bool {
        self(installation)
    }
}

/// Treats an installation as in use while any process runs an executable
/// from inside its directory.
#[derive(Default)]
pub struct RunningProcessProbe {
    executables: Mutex<Vec<PathBuf>>,
}

impl RunningProcessProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InUseProbe for RunningProcessProbe {
    fn refresh(&self) {
        let system = System::new_all();
        let running: Vec<PathBuf> = system
            .processes()
            .values()
            .filter_map(|process| process.exe().map(PathBuf::from))
            .collect();
        debug!("Process snapshot: {} executables", running.len());
        if let Ok(mut executables) = self.executables.lock() {
            *executables = running;
        }
    }

    fn is_in_use(&self, installation: &Installation) -> bool {
        self.executables
            .lock()
            .map(|exes| exes.iter().any(|exe| exe.starts_with(&installation.path)))
            .unwrap_or(false)
    }
}
