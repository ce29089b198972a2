//! Container engine, compose driver and process runner for devbox
//!
//! This crate provides the thin layer between devbox and the outside world:
//! - [`ProcessRunner`] for every external program
//! - [`ContainerEngine`] for querying and mutating the managed container
//! - [`ComposeDriver`] for `docker compose up/down/build`

mod compose;
mod docker;
mod error;
mod process;
mod types;

pub use compose::{ComposeCli, ComposeFlavor};
pub use docker::DockerEngine;
pub use error::*;
pub use process::*;
pub use types::*;

use async_trait::async_trait;
use std::path::Path;

/// Operations on one named container
///
/// Stop and remove converge: asking for a state the container is already in
/// succeeds without touching the engine further.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Look up a container by exact name or id; absent is `Ok(None)`
    async fn find(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Whether the container exists and is running; never fails
    async fn is_running(&self, name: &str) -> bool;

    /// Stop a running container; `force` kills instead of a graceful stop
    async fn stop(&self, name: &str, force: bool) -> Result<()>;

    /// Remove a container; absent counts as removed
    async fn remove(&self, name: &str, force: bool) -> Result<()>;

    /// Run a command inside the container and collect combined output
    async fn exec_one_shot(
        &self,
        name: &str,
        argv: &[String],
        user: Option<&str>,
    ) -> Result<ExecResult>;

    /// Raw log bytes as framed by the engine
    async fn logs(&self, name: &str, options: &LogOptions) -> Result<LogStream>;

    /// Upload a file or directory into the container under `dest`
    async fn copy_into(&self, name: &str, src: &Path, dest: &str) -> Result<()>;

    /// Check the engine is reachable
    async fn ping(&self) -> Result<()>;
}

/// The compose tool, scoped to the project's service
#[async_trait]
pub trait ComposeDriver: Send + Sync {
    async fn up(&self, detach: bool, build: bool) -> Result<CommandOutput>;

    async fn down(&self, remove_volumes: bool) -> Result<CommandOutput>;

    async fn build(&self, no_cache: bool) -> Result<CommandOutput>;
}

/// Connect to the engine named in configuration
pub async fn create_engine(
    config: &devbox_config::EngineConfig,
) -> Result<Box<dyn ContainerEngine>> {
    let engine = DockerEngine::connect(&config.socket).await?;
    Ok(Box::new(engine))
}

/// Format a helpful connection error message with actionable instructions
pub fn format_connection_error(socket_path: &str, socket_exists: bool, underlying: &str) -> String {
    let mut msg = String::from("Cannot connect to Docker\n\n");

    if !socket_exists {
        msg.push_str(&format!(
            "The Docker API socket was not found at:\n  {}\n\n",
            socket_path
        ));
        msg.push_str("To start Docker, run:\n");
        if cfg!(target_os = "macos") {
            msg.push_str("  open -a Docker\n");
        } else {
            msg.push_str("  sudo systemctl enable --now docker\n");
        }
        msg.push_str("\nIf Docker listens elsewhere, set [engine] socket in .devbox/devbox.toml\n");
    } else {
        msg.push_str(&format!(
            "The socket exists at {} but the daemon is not responding.\n\n",
            socket_path
        ));
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_missing_socket() {
        let msg = format_connection_error("/nope/docker.sock", false, "No such file");
        assert!(msg.contains("was not found at:\n  /nope/docker.sock"));
        assert!(msg.contains("[engine] socket"));
        assert!(!msg.contains("Underlying error"));
    }

    #[test]
    fn test_connection_error_unresponsive_daemon() {
        let msg = format_connection_error("/var/run/docker.sock", true, "connection refused");
        assert!(msg.contains("not responding"));
        assert!(msg.contains("Underlying error: connection refused"));
    }
}
