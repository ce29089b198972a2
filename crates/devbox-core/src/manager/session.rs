//! Read-only queries and interactive sessions

use super::DevboxManager;
use crate::readiness::FrameMode;
use crate::{known_hosts, CoreError, KeyPurpose, Result};
use chrono::{DateTime, Utc};
use devbox_provider::{CommandSpec, ContainerState, LogOptions, LogStream, PortMapping, ProviderError};
use serde::Serialize;
use std::path::PathBuf;

/// tmux session attached to by `connect --tmux`
const TMUX_SESSION: &str = "devbox";

/// Everything `devbox status` reports
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub exists: bool,
    pub state: Option<ContainerState>,
    pub id: Option<String>,
    pub ports: Vec<PortMapping>,
    pub created_at: Option<DateTime<Utc>>,
    pub ssh: SshEndpoint,
    pub key_present: bool,
    pub key_fingerprint: Option<String>,
    pub known_host_entry: bool,
    pub project_dir: PathBuf,
}

impl StatusReport {
    pub fn is_running(&self) -> bool {
        self.state.as_ref().is_some_and(ContainerState::is_running)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: PathBuf,
}

impl SshEndpoint {
    /// `ssh` command line that reaches the container
    pub fn command_line(&self) -> String {
        format!(
            "ssh -i {} -p {} {}@{}",
            self.key_path.display(),
            self.port,
            self.user,
            self.host
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    /// Use mosh instead of ssh
    pub mosh: bool,
    /// Attach to (or create) a tmux session
    pub tmux: bool,
}

impl DevboxManager {
    fn ssh_endpoint(&self) -> SshEndpoint {
        SshEndpoint {
            host: self.config.ssh.host.clone(),
            port: self.config.ssh.port,
            user: self.config.container.user.clone(),
            key_path: self.ssh.key_path(&self.config.ssh.key),
        }
    }

    /// Snapshot of container, key and trust state
    pub async fn status(&self) -> Result<StatusReport> {
        let info = self.engine.find(self.container_name()).await?;
        let keypair = self.ssh.load_keypair(KeyPurpose::Container, &self.config)?;

        Ok(StatusReport {
            name: self.container_name().to_string(),
            exists: info.is_some(),
            state: info.as_ref().map(|i| i.state.clone()),
            id: info.as_ref().map(|i| i.short_id().to_string()),
            ports: info.as_ref().map(|i| i.ports.clone()).unwrap_or_default(),
            created_at: info.as_ref().and_then(|i| i.created_at),
            ssh: self.ssh_endpoint(),
            key_present: keypair.is_some(),
            key_fingerprint: keypair.as_ref().and_then(|k| k.fingerprint()),
            known_host_entry: self
                .ssh
                .has_known_host_entry(&self.config.ssh.host, self.config.ssh.port),
            project_dir: self.paths.root().to_path_buf(),
        })
    }

    /// Log stream of the container and how it is framed
    pub async fn logs(&self, options: &LogOptions) -> Result<(LogStream, FrameMode)> {
        let name = self.container_name();
        let info = self
            .engine
            .find(name)
            .await?
            .ok_or_else(|| ProviderError::ContainerNotFound(name.to_string()))?;

        let stream = self.engine.logs(&info.name, options).await?;
        Ok((stream, FrameMode::for_tty(info.tty)))
    }

    /// Open an interactive shell in the container; returns its exit code
    pub async fn connect(&self, options: ConnectOptions) -> Result<i32> {
        self.require_running().await?;

        let keypair = self
            .ssh
            .load_keypair(KeyPurpose::Container, &self.config)?
            .ok_or_else(|| {
                CoreError::NotSetUp("no SSH key for the container; run `devbox start`".to_string())
            })?;

        let endpoint = self.ssh_endpoint();
        if !self.ssh.has_known_host_entry(&endpoint.host, endpoint.port) {
            tracing::debug!(
                "No known-hosts entry for {}; ssh will ask",
                known_hosts::host_pattern(&endpoint.host, endpoint.port)
            );
        }

        let spec = if options.mosh {
            self.mosh_command(&endpoint, &keypair.private_path, options.tmux)?
        } else {
            ssh_command(&endpoint, &keypair.private_path, options.tmux)
        };

        tracing::debug!("Running {}", spec.display());
        Ok(self.runner.run_interactive(&spec).await?)
    }

    fn mosh_command(
        &self,
        endpoint: &SshEndpoint,
        key: &std::path::Path,
        tmux: bool,
    ) -> Result<CommandSpec> {
        if !self.runner.command_exists("mosh") {
            return Err(ProviderError::LaunchFailed {
                program: "mosh".to_string(),
                reason: "not found on PATH".to_string(),
            }
            .into());
        }

        let key = key.to_string_lossy();
        let port = endpoint.port.to_string();
        let ssh = shell_words::join([
            "ssh",
            "-i",
            key.as_ref(),
            "-p",
            port.as_str(),
            "-o",
            "IdentitiesOnly=yes",
        ]);

        let mut spec = CommandSpec::new("mosh")
            .arg(format!("--ssh={}", ssh))
            .arg(format!("{}@{}", endpoint.user, endpoint.host));
        if tmux {
            spec = spec.args(["--", "tmux", "new", "-A", "-s", TMUX_SESSION]);
        }
        Ok(spec)
    }
}

fn ssh_command(endpoint: &SshEndpoint, key: &std::path::Path, tmux: bool) -> CommandSpec {
    let mut spec = CommandSpec::new("ssh")
        .arg("-i")
        .arg(key.to_string_lossy())
        .arg("-p")
        .arg(endpoint.port.to_string())
        .args(["-o", "IdentitiesOnly=yes"]);
    if tmux {
        spec = spec.arg("-t");
    }
    spec = spec.arg(format!("{}@{}", endpoint.user, endpoint.host));
    if tmux {
        spec = spec.args(["tmux", "new", "-A", "-s", TMUX_SESSION]);
    }
    spec
}
