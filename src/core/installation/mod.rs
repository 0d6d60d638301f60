pub mod model;
pub mod registry;

pub use model::{InstallKey, Installation};
pub use registry::InstallationRegistry;
