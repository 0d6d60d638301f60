pub mod policy;
pub mod remove;

pub use policy::{
    install_path, move_installation, prepare_base_path, validate_writable, PathValidation,
};
pub use remove::{remover_for, AttributeResetRemover, ShellRemover, TreeRemover};
