//! Common types for the container engine

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Lifecycle state of a container
///
/// Exit code and finish time only exist on `Exited`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running {
        started_at: Option<DateTime<Utc>>,
    },
    Exited {
        exit_code: i64,
        finished_at: Option<DateTime<Utc>>,
    },
    Removing,
    Paused,
    Restarting,
    Dead,
}

impl ContainerState {
    /// Build a state from the engine's status string and state fields
    pub fn from_engine(
        status: &str,
        exit_code: Option<i64>,
        started_at: Option<&str>,
        finished_at: Option<&str>,
    ) -> Self {
        match status.to_lowercase().as_str() {
            "running" => Self::Running {
                started_at: started_at.and_then(parse_engine_time),
            },
            "exited" => Self::Exited {
                exit_code: exit_code.unwrap_or(0),
                finished_at: finished_at.and_then(parse_engine_time),
            },
            "removing" => Self::Removing,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "dead" => Self::Dead,
            _ => Self::Created,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running { .. } => "running",
            Self::Exited { .. } => "exited",
            Self::Removing => "removing",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Dead => "dead",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited { exit_code, .. } => write!(f, "exited (code {})", exit_code),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Parse an engine timestamp; the zero time means "never"
pub fn parse_engine_time(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() || raw.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// One published port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: String,
}

impl std::fmt::Display for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.host_port {
            Some(host) => write!(f, "{}->{}/{}", host, self.container_port, self.protocol),
            None => write!(f, "{}/{}", self.container_port, self.protocol),
        }
    }
}

/// Snapshot of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub ports: Vec<PortMapping>,
    pub created_at: Option<DateTime<Utc>>,
    /// Containers with a TTY produce raw, unframed logs
    pub tty: bool,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn short_id(&self) -> &str {
        if self.id.len() > 12 {
            &self.id[..12]
        } else {
            &self.id
        }
    }

    /// Host port published for a container port, if any
    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container_port == container_port)
            .and_then(|p| p.host_port)
    }

    /// Start time of the current run, when running
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            ContainerState::Running { started_at } => started_at,
            _ => None,
        }
    }
}

/// Result of a one-shot exec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i64,
    /// Combined stdout/stderr output
    pub output: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Log request options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub follow: bool,
    /// Number of lines from the end (all when `None`)
    pub tail: Option<u64>,
    pub timestamps: bool,
    /// Unix timestamp
    pub since: Option<i64>,
    /// Unix timestamp
    pub until: Option<i64>,
}

impl LogOptions {
    /// Query string for the engine's `/containers/{id}/logs` endpoint
    pub fn query(&self) -> String {
        let mut params = vec![
            "stdout=1".to_string(),
            "stderr=1".to_string(),
            format!("follow={}", u8::from(self.follow)),
            format!("timestamps={}", u8::from(self.timestamps)),
            format!(
                "tail={}",
                self.tail.map(|t| t.to_string()).unwrap_or_else(|| "all".to_string())
            ),
        ];
        if let Some(since) = self.since {
            params.push(format!("since={}", since));
        }
        if let Some(until) = self.until {
            params.push(format!("until={}", until));
        }
        params.join("&")
    }
}

/// Raw log bytes exactly as the engine sends them (possibly multiplex-framed)
pub type LogStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;
