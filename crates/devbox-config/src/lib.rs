//! Configuration for devbox
//!
//! This crate handles:
//! - The project configuration (`.devbox/devbox.toml`)
//! - Project path discovery and the on-disk layout under `.devbox/`
//! - The editor lookup table (VS Code / Cursor)
//! - The generated compose environment file

mod editor;
mod env_file;
mod error;
mod paths;
mod settings;

pub use editor::*;
pub use env_file::*;
pub use error::*;
pub use paths::*;
pub use settings::*;
