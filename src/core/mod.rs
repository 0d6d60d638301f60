// ─── Buildkeeper Core ───
// Installation lifecycle for a multi-fork game launcher.
//
// Architecture:
//   core/
//     installation/ - Installation record + persisted registry
//     downloader/   - Download records, coordinator, progress stream
//     extract/      - Streaming archive extraction pipeline
//     launch/       - Executable resolution, spawning, in-use probe
//     paths/        - Install paths, pre-flight checks, moves, removal
//     state/        - Settings + manager configuration
//     manager.rs    - InstallationManager façade

pub mod downloader;
pub mod error;
pub mod extract;
pub mod http;
pub mod installation;
pub mod launch;
pub mod manager;
pub mod paths;
pub mod platform;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
