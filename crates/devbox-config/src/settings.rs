//! Project configuration
//!
//! Located at `<project>/.devbox/devbox.toml`. Every section is optional;
//! missing values fall back to the defaults below.

use crate::{ConfigError, EditorKind, FieldError, ProjectPaths, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Project-wide devbox configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevboxConfig {
    pub container: ContainerConfig,
    pub ssh: SshConfig,
    pub github: GithubConfig,
    pub readiness: ReadinessConfig,
    pub editor: EditorConfig,
    pub git: GitConfig,
    pub engine: EngineConfig,
}

/// The managed container and its compose service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container name (must match `container_name` in the compose file)
    pub name: String,
    /// Compose service that runs the dev container
    pub service: String,
    /// Compose file, relative to the project root
    pub compose_file: PathBuf,
    /// Compose project name (defaults to the container name)
    pub project: Option<String>,
    /// User inside the container
    pub user: String,
    /// Working directory inside the container
    pub workdir: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: "devbox".to_string(),
            service: "dev".to_string(),
            compose_file: PathBuf::from("docker-compose.yml"),
            project: None,
            user: "developer".to_string(),
            workdir: "/workspace".to_string(),
        }
    }
}

impl ContainerConfig {
    pub fn project_name(&self) -> &str {
        self.project.as_deref().unwrap_or(&self.name)
    }
}

/// Key algorithm passed to `ssh-keygen -t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    #[default]
    Ed25519,
    Rsa,
    Ecdsa,
}

impl KeyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::Ecdsa => "ecdsa",
        }
    }
}

/// How the keypair for one purpose is generated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPolicy {
    /// File name inside the keys directory; the public key gets `.pub` appended
    pub file_name: String,
    pub algorithm: KeyAlgorithm,
    /// Key size, ignored for ed25519
    pub bits: Option<u32>,
    pub comment: String,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self::container_access()
    }
}

impl KeyPolicy {
    /// Host-to-container access key
    pub fn container_access() -> Self {
        Self {
            file_name: "devbox_ed25519".to_string(),
            algorithm: KeyAlgorithm::Ed25519,
            bits: None,
            comment: "devbox-container-access".to_string(),
        }
    }

    /// Key the container uses to reach GitHub
    pub fn github() -> Self {
        Self {
            file_name: "github_ed25519".to_string(),
            algorithm: KeyAlgorithm::Ed25519,
            bits: None,
            comment: "devbox-github".to_string(),
        }
    }

    fn validate(&self, prefix: &str, errors: &mut Vec<FieldError>) {
        if self.file_name.is_empty()
            || self.file_name.contains('/')
            || self.file_name.contains('\\')
            || self.file_name.starts_with('.')
        {
            errors.push(FieldError::new(
                format!("{}.file_name", prefix),
                "must be a plain file name",
            ));
        }
        if let Some(bits) = self.bits {
            let ok = match self.algorithm {
                KeyAlgorithm::Ed25519 => true,
                KeyAlgorithm::Rsa => (2048..=16384).contains(&bits),
                KeyAlgorithm::Ecdsa => matches!(bits, 256 | 384 | 521),
            };
            if !ok {
                errors.push(FieldError::new(
                    format!("{}.bits", prefix),
                    format!("{} is not a valid size for {}", bits, self.algorithm.as_str()),
                ));
            }
        }
    }
}

/// SSH endpoint of the container and host trust settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    /// Host port mapped to the container's sshd
    pub port: u16,
    /// Key type requested from `ssh-keyscan`
    pub host_key_type: String,
    /// Known-hosts file (defaults to `~/.ssh/known_hosts`)
    pub known_hosts: Option<String>,
    /// Ask before trusting a freshly scanned host key
    pub confirm_host_key: bool,
    /// Delay before scanning so sshd can finish binding
    pub keyscan_delay_ms: u64,
    pub key: KeyPolicy,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 2222,
            host_key_type: "ed25519".to_string(),
            known_hosts: None,
            confirm_host_key: false,
            keyscan_delay_ms: 2000,
            key: KeyPolicy::container_access(),
        }
    }
}

impl SshConfig {
    /// Resolve the known-hosts path, expanding `~` and env vars
    pub fn known_hosts_path(&self) -> Result<PathBuf> {
        match self.known_hosts {
            Some(ref raw) => {
                let expanded = shellexpand::full(raw)
                    .map_err(|e| ConfigError::Invalid(format!("ssh.known_hosts: {}", e)))?;
                Ok(PathBuf::from(expanded.as_ref()))
            }
            None => {
                let base = directories::BaseDirs::new().ok_or(ConfigError::NoHomeDir)?;
                Ok(base.home_dir().join(".ssh").join("known_hosts"))
            }
        }
    }

    pub fn keyscan_delay(&self) -> Duration {
        Duration::from_millis(self.keyscan_delay_ms)
    }
}

/// GitHub access from inside the container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub enabled: bool,
    pub key: KeyPolicy,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key: KeyPolicy::github(),
        }
    }
}

/// Startup readiness detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Line printed by the container's entrypoint when initialization is done
    pub marker: String,
    pub timeout_secs: u64,
    /// Log lines kept for diagnostics on failure
    pub tail_lines: usize,
    /// Substrings that fail startup as soon as they appear, checked in order
    pub error_patterns: Vec<String>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            marker: "--READY--".to_string(),
            timeout_secs: 90,
            tail_lines: 50,
            error_patterns: vec![
                "FATAL".to_string(),
                "sshd: no hostkeys available".to_string(),
                "Address already in use".to_string(),
            ],
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub kind: EditorKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Container engine connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine API socket
    pub socket: String,
    /// Compose invocation: "auto", "plugin" (`docker compose`) or "standalone" (`docker-compose`)
    pub compose_command: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket: default_engine_socket(),
            compose_command: "auto".to_string(),
        }
    }
}

fn default_engine_socket() -> String {
    engine_socket_from(std::env::var("DOCKER_HOST").ok().as_deref())
}

/// Engine address for a `DOCKER_HOST` value; TCP hosts are kept for an HTTP client
fn engine_socket_from(docker_host: Option<&str>) -> String {
    match docker_host {
        Some(host) if host.starts_with("unix://") => host.trim_start_matches("unix://").to_string(),
        Some(host) if host.starts_with("tcp://") => host.to_string(),
        _ => default_docker_socket(),
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

impl DevboxConfig {
    /// Load and validate the configuration for a project
    ///
    /// A missing file yields the defaults; a present but malformed file is an error.
    pub fn load(paths: &ProjectPaths) -> Result<Self> {
        Self::load_from(&paths.config_file())
    }

    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        tracing::debug!(
            "Loaded config from {:?}: container={} ssh_port={}",
            path,
            config.container.name,
            config.ssh.port
        );

        Ok(config)
    }

    /// Save configuration for a project
    pub fn save(&self, paths: &ProjectPaths) -> Result<()> {
        self.save_to(&paths.config_file())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check every field and report all offending ones at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if !is_valid_container_name(&self.container.name) {
            errors.push(FieldError::new(
                "container.name",
                "must start with a letter or digit and contain only [a-zA-Z0-9_.-]",
            ));
        }
        if self.container.service.trim().is_empty() {
            errors.push(FieldError::new("container.service", "must not be empty"));
        }
        if let Err(reason) = validate_username(&self.container.user) {
            errors.push(FieldError::new("container.user", reason));
        }
        if !self.container.workdir.starts_with('/') {
            errors.push(FieldError::new("container.workdir", "must be an absolute path"));
        }
        if self.ssh.port == 0 {
            errors.push(FieldError::new("ssh.port", "must be between 1 and 65535"));
        }
        if self.ssh.host.trim().is_empty() || self.ssh.host.contains(char::is_whitespace) {
            errors.push(FieldError::new("ssh.host", "must be a host name without spaces"));
        }
        self.ssh.key.validate("ssh.key", &mut errors);
        self.github.key.validate("github.key", &mut errors);
        if self.github.key.file_name == self.ssh.key.file_name {
            errors.push(FieldError::new(
                "github.key.file_name",
                "must differ from ssh.key.file_name",
            ));
        }
        if self.readiness.marker.trim().is_empty() {
            errors.push(FieldError::new("readiness.marker", "must not be empty"));
        }
        if self.readiness.timeout_secs == 0 {
            errors.push(FieldError::new("readiness.timeout_secs", "must be greater than 0"));
        }
        if self.readiness.tail_lines == 0 {
            errors.push(FieldError::new("readiness.tail_lines", "must be greater than 0"));
        }
        if !matches!(
            self.engine.compose_command.as_str(),
            "auto" | "plugin" | "standalone"
        ) {
            errors.push(FieldError::new(
                "engine.compose_command",
                "must be one of auto, plugin, standalone",
            ));
        }
        if let Some(ref email) = self.git.email {
            if !email.is_empty() && !email.contains('@') {
                errors.push(FieldError::new("git.email", "is not an email address"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Docker container names: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`
pub fn is_valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Standard Unix username: lowercase letter or underscore first, then
/// lowercase letters, digits, underscores or hyphens, at most 32 chars
pub fn validate_username(user: &str) -> std::result::Result<(), String> {
    if user.is_empty() || user.len() > 32 {
        return Err(format!("invalid username length: {}", user.len()));
    }

    let mut chars = user.chars();
    if let Some(first) = chars.next() {
        if !first.is_ascii_lowercase() && first != '_' {
            return Err(format!(
                "invalid username '{}': must start with lowercase letter or underscore",
                user
            ));
        }
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err(format!("invalid username '{}': contains invalid characters", user));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_socket_from_docker_host() {
        assert_eq!(
            engine_socket_from(Some("unix:///run/user/1000/docker.sock")),
            "/run/user/1000/docker.sock"
        );
        assert_eq!(engine_socket_from(Some("tcp://10.0.0.5:2375")), "tcp://10.0.0.5:2375");
        assert_eq!(engine_socket_from(Some("ssh://dev@box")), default_docker_socket());
        assert_eq!(engine_socket_from(None), default_docker_socket());
    }

    #[test]
    fn test_default_error_patterns_are_sshd_fatal_only() {
        let patterns = ReadinessConfig::default().error_patterns;
        assert!(patterns.iter().any(|p| p == "sshd: no hostkeys available"));
        assert!(!patterns.iter().any(|p| p == "Permission denied" || p == "ERROR:"));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = DevboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ssh.port, 2222);
        assert_eq!(config.readiness.marker, "--READY--");
        assert_eq!(config.container.project_name(), "devbox");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[container]
name = "acme-dev"
user = "alice"

[ssh]
port = 2200

[editor]
kind = "cursor"
"#;

        let config: DevboxConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.container.name, "acme-dev");
        assert_eq!(config.container.user, "alice");
        assert_eq!(config.container.service, "dev");
        assert_eq!(config.ssh.port, 2200);
        assert_eq!(config.ssh.host, "localhost");
        assert_eq!(config.editor.kind, EditorKind::Cursor);
        assert_eq!(config.ssh.key.file_name, "devbox_ed25519");
    }

    #[test]
    fn test_validation_reports_every_field() {
        let mut config = DevboxConfig::default();
        config.container.name = "-bad".to_string();
        config.container.user = "Root".to_string();
        config.ssh.port = 0;
        config.readiness.timeout_secs = 0;

        let err = config.validate().unwrap_err();
        let fields: Vec<&str> = err.fields().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["container.name", "container.user", "ssh.port", "readiness.timeout_secs"]
        );
        assert!(err.to_string().contains("ssh.port"));
    }

    #[test]
    fn test_key_policy_bits_checked_per_algorithm() {
        let mut config = DevboxConfig::default();
        config.github.key.algorithm = KeyAlgorithm::Rsa;
        config.github.key.bits = Some(1024);
        let err = config.validate().unwrap_err();
        assert_eq!(err.fields()[0].field, "github.key.bits");

        config.github.key.bits = Some(4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_same_key_file_for_both_purposes_rejected() {
        let mut config = DevboxConfig::default();
        config.github.key.file_name = config.ssh.key.file_name.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip_through_project() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(tmp.path());
        let mut config = DevboxConfig::default();
        config.container.name = "saved".to_string();
        config.git.email = Some("dev@example.com".to_string());

        config.save(&paths).unwrap();
        let loaded = DevboxConfig::load(&paths).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_invalid_file_with_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("devbox.toml");
        std::fs::write(&path, "[ssh]\nport = \"not a number\"\n").unwrap();

        let err = DevboxConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParseError { .. }));
        assert!(err.to_string().contains("devbox.toml"));
    }

    #[test]
    fn test_known_hosts_expands_tilde() {
        let mut ssh = SshConfig::default();
        ssh.known_hosts = Some("/tmp/devbox-test/known_hosts".to_string());
        assert_eq!(
            ssh.known_hosts_path().unwrap(),
            PathBuf::from("/tmp/devbox-test/known_hosts")
        );
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("developer").is_ok());
        assert!(validate_username("_svc").is_ok());
        assert!(validate_username("user-1").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("User").is_err());
        assert!(validate_username("1user").is_err());
        assert!(validate_username("user;rm").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_container_name_rules() {
        assert!(is_valid_container_name("devbox"));
        assert!(is_valid_container_name("acme_dev.1-a"));
        assert!(!is_valid_container_name(""));
        assert!(!is_valid_container_name("-x"));
        assert!(!is_valid_container_name("has space"));
    }
}
