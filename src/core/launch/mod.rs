pub mod executable;
pub mod probe;
pub mod task;

pub use executable::{ensure_executable, resolve_executable};
pub use probe::{InUseProbe, RunningProcessProbe};
pub use task::{build_command, game_arguments, spawn_detached};
