//! Core logic for devbox container lifecycle management
//!
//! This crate provides:
//! - Lifecycle orchestration (start, stop, rebuild) with step tracking
//! - SSH key material and known-hosts trust for the container
//! - Readiness monitoring over the engine's framed log stream
//! - Editor settings sync, cleanup planning and the setup wizard

pub mod editor;
mod error;
pub mod known_hosts;
mod manager;
mod prompt;
pub mod readiness;
pub mod setup;
mod ssh;

pub use error::*;
pub use manager::*;
pub use prompt::*;
pub use ssh::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
