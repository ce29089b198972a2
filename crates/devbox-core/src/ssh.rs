//! SSH key material and host trust for the managed container
//!
//! # Security
//!
//! - Private keys are written with 0600 permissions and never logged
//! - An existing private key is never regenerated; it may already be
//!   registered with a remote service such as GitHub
//! - Host keys are scanned from the container after every (re)build, and the
//!   previous incarnation's entry is removed first so ssh does not refuse
//!   the new key as a mismatch

use crate::known_hosts::{self, KnownHostEntry};
use crate::{CoreError, Prompter, Result};
use base64::Engine as _;
use devbox_config::{DevboxConfig, KeyPolicy, ProjectPaths};
use devbox_provider::{CommandSpec, ContainerEngine, ProcessRunner};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const KEYSCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// What a keypair is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Host-to-container SSH access
    Container,
    /// Mounted into the container for GitHub access
    GitHub,
}

impl KeyPurpose {
    pub fn policy(self, config: &DevboxConfig) -> &KeyPolicy {
        match self {
            KeyPurpose::Container => &config.ssh.key,
            KeyPurpose::GitHub => &config.github.key,
        }
    }
}

/// A keypair on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    pub private_path: PathBuf,
    pub public_path: PathBuf,
    /// Single-line OpenSSH public key
    pub public_key: String,
    pub comment: String,
}

impl Keypair {
    /// Public key path: the private path with `.pub` appended (not replacing an extension)
    pub fn public_path_for(private_path: &Path) -> PathBuf {
        let mut public: OsString = private_path.as_os_str().to_owned();
        public.push(".pub");
        PathBuf::from(public)
    }

    /// Load an existing pair; `None` when either half is missing
    pub fn load(private_path: &Path) -> Result<Option<Self>> {
        let public_path = Self::public_path_for(private_path);
        if !private_path.is_file() || !public_path.is_file() {
            return Ok(None);
        }
        let public_key = std::fs::read_to_string(&public_path)?.trim().to_string();
        Ok(Some(Self::from_public(private_path, public_path, public_key)))
    }

    fn from_public(private_path: &Path, public_path: PathBuf, public_key: String) -> Self {
        let comment = public_key
            .split_whitespace()
            .nth(2)
            .unwrap_or_default()
            .to_string();
        Self {
            private_path: private_path.to_path_buf(),
            public_path,
            public_key,
            comment,
        }
    }

    /// `SHA256:...` of the public key
    pub fn fingerprint(&self) -> Option<String> {
        self.public_key
            .split_whitespace()
            .nth(1)
            .and_then(known_hosts::fingerprint_sha256)
    }
}

/// Manages keypairs and the known-hosts entry for the container
pub struct SshTrustManager {
    runner: Arc<dyn ProcessRunner>,
    keys_dir: PathBuf,
    known_hosts: PathBuf,
    host_key_type: String,
    keyscan_delay: Duration,
    confirm_host_key: bool,
}

impl SshTrustManager {
    pub fn new(
        config: &DevboxConfig,
        paths: &ProjectPaths,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self> {
        Ok(Self {
            runner,
            keys_dir: paths.keys_dir(),
            known_hosts: config.ssh.known_hosts_path()?,
            host_key_type: config.ssh.host_key_type.clone(),
            keyscan_delay: config.ssh.keyscan_delay(),
            confirm_host_key: config.ssh.confirm_host_key,
        })
    }

    /// Use a different known-hosts file
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = path.into();
        self
    }

    pub fn with_keyscan_delay(mut self, delay: Duration) -> Self {
        self.keyscan_delay = delay;
        self
    }

    pub fn known_hosts_path(&self) -> &Path {
        &self.known_hosts
    }

    /// Where the key for `policy` lives
    pub fn key_path(&self, policy: &KeyPolicy) -> PathBuf {
        self.keys_dir.join(&policy.file_name)
    }

    /// Load the keypair for `purpose` without generating anything
    pub fn load_keypair(&self, purpose: KeyPurpose, config: &DevboxConfig) -> Result<Option<Keypair>> {
        Keypair::load(&self.key_path(purpose.policy(config)))
    }

    /// Make sure the keypair for `purpose` exists
    pub async fn ensure_keypair(&self, purpose: KeyPurpose, config: &DevboxConfig) -> Result<Keypair> {
        let policy = purpose.policy(config);
        self.generate_keypair(&self.key_path(policy), policy).await
    }

    /// Generate a keypair at `path` unless one already exists
    ///
    /// An existing private key is returned untouched. If only its `.pub` half
    /// is missing, the public key is derived from it again.
    pub async fn generate_keypair(&self, path: &Path, policy: &KeyPolicy) -> Result<Keypair> {
        let public_path = Keypair::public_path_for(path);

        if path.exists() {
            if let Some(existing) = Keypair::load(path)? {
                tracing::debug!("SSH key already exists at {:?}", path);
                return Ok(existing);
            }

            tracing::info!("Restoring missing public key {:?}", public_path);
            let output = self
                .runner
                .run(
                    &CommandSpec::new("ssh-keygen")
                        .arg("-y")
                        .arg("-f")
                        .arg(path.to_string_lossy()),
                )
                .await?;
            if !output.success {
                return Err(CoreError::SshKeygenError(format!(
                    "could not derive public key from {}: {}",
                    path.display(),
                    output.error_text()
                )));
            }
            let public_key = output.stdout.trim().to_string();
            validate_ssh_public_key(&public_key)?;
            std::fs::write(&public_path, format!("{}\n", public_key))?;
            set_mode(&public_path, 0o644)?;
            return Ok(Keypair::from_public(path, public_path, public_key));
        }

        tracing::info!("Generating {} keypair at {:?}", policy.algorithm.as_str(), path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                set_mode(parent, 0o700)?;
            }
        }

        let mut spec = CommandSpec::new("ssh-keygen")
            .arg("-q")
            .arg("-t")
            .arg(policy.algorithm.as_str());
        if let Some(bits) = policy.bits {
            spec = spec.arg("-b").arg(bits.to_string());
        }
        let spec = spec
            .arg("-N")
            .arg("")
            .arg("-C")
            .arg(policy.comment.as_str())
            .arg("-f")
            .arg(path.to_string_lossy());

        let output = self.runner.run(&spec).await?;
        if !output.success {
            return Err(CoreError::SshKeygenError(format!(
                "ssh-keygen failed: {}",
                output.error_text()
            )));
        }

        set_mode(path, 0o600)?;
        set_mode(&public_path, 0o644)?;

        let keypair = Keypair::load(path)?.ok_or_else(|| {
            CoreError::SshKeygenError(format!("ssh-keygen did not create {}", public_path.display()))
        })?;
        validate_ssh_public_key(&keypair.public_key)?;

        tracing::info!("Generated SSH keypair {:?}", keypair.public_path);
        Ok(keypair)
    }

    /// Whether a plain entry for the container exists
    pub fn has_known_host_entry(&self, host: &str, port: u16) -> bool {
        let pattern = known_hosts::host_pattern(host, port);
        known_hosts::find_entries(&self.known_hosts, &pattern)
            .map(|e| !e.is_empty())
            .unwrap_or(false)
    }

    /// Remove every entry for `host:port`; absence is not an error
    pub async fn remove_known_host_entry(&self, host: &str, port: u16) -> usize {
        let pattern = known_hosts::host_pattern(host, port);

        let mut removed = match known_hosts::remove_plain_entries(&self.known_hosts, &pattern) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Could not update {:?}: {}", self.known_hosts, e);
                0
            }
        };

        if known_hosts::has_hashed_entries(&self.known_hosts) {
            let spec = CommandSpec::new("ssh-keygen")
                .arg("-R")
                .arg(pattern.as_str())
                .arg("-f")
                .arg(self.known_hosts.to_string_lossy());
            match self.runner.run(&spec).await {
                Ok(output) if output.success => {
                    removed += output
                        .stdout
                        .lines()
                        .filter(|l| l.contains("found: line"))
                        .count();
                }
                Ok(output) => {
                    tracing::debug!("ssh-keygen -R {}: {}", pattern, output.error_text());
                }
                Err(e) => tracing::debug!("ssh-keygen -R {} failed: {}", pattern, e),
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} known-hosts entr{} for {}", removed, if removed == 1 { "y" } else { "ies" }, pattern);
        } else {
            tracing::debug!("No known-hosts entry for {}", pattern);
        }
        removed
    }

    /// Scan the container's host key and trust it
    ///
    /// Returns `false` when the scan finds nothing (sshd not listening yet) or
    /// the user declines; the first manual connect can still accept the key.
    pub async fn add_known_host_entry(&self, host: &str, port: u16, prompter: &dyn Prompter) -> bool {
        let pattern = known_hosts::host_pattern(host, port);

        if !self.keyscan_delay.is_zero() {
            tracing::debug!("Waiting {:?} for sshd to bind", self.keyscan_delay);
            tokio::time::sleep(self.keyscan_delay).await;
        }

        let mut spec = CommandSpec::new("ssh-keyscan")
            .arg("-p")
            .arg(port.to_string());
        if !self.host_key_type.is_empty() {
            spec = spec.arg("-t").arg(self.host_key_type.as_str());
        }
        let spec = spec.args(["-T", "5"]).arg(host).timeout(KEYSCAN_TIMEOUT);

        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Could not scan host key for {}: {}", pattern, e);
                return false;
            }
        };

        let entries = known_hosts::parse_scan_output(&output.stdout, &pattern);
        if entries.is_empty() {
            tracing::warn!("No host key found for {} ({})", pattern, output.error_text());
            return false;
        }

        if self.confirm_host_key {
            let fingerprints = entries
                .iter()
                .map(|e| {
                    format!(
                        "{} {}",
                        e.key_type,
                        e.fingerprint().unwrap_or_else(|| "(unknown)".to_string())
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            let question = format!("Trust host key {} for {}?", fingerprints, pattern);
            match prompter.confirm(&question, true) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("Host key for {} not trusted", pattern);
                    return false;
                }
                Err(e) => {
                    tracing::warn!("Could not confirm host key: {}", e);
                    return false;
                }
            }
        }

        self.replace_entries(&pattern, host, port, &entries).await
    }

    async fn replace_entries(
        &self,
        pattern: &str,
        host: &str,
        port: u16,
        entries: &[KnownHostEntry],
    ) -> bool {
        self.remove_known_host_entry(host, port).await;
        match known_hosts::append_entries(&self.known_hosts, entries) {
            Ok(()) => {
                tracing::info!("Added {} to {:?}", pattern, self.known_hosts);
                true
            }
            Err(e) => {
                tracing::warn!("Could not write {:?}: {}", self.known_hosts, e);
                false
            }
        }
    }

    /// Drop the entry of the container about to be replaced
    ///
    /// Must run before the old container is removed, so the new one can never
    /// be scanned while the stale key is still trusted.
    pub async fn rotate_for_rebuild(&self, host: &str, port: u16) -> usize {
        self.remove_known_host_entry(host, port).await
    }

    /// Append the public key to `~user/.ssh/authorized_keys` in the container
    pub async fn install_authorized_key(
        &self,
        engine: &dyn ContainerEngine,
        container: &str,
        user: &str,
        keypair: &Keypair,
    ) -> Result<()> {
        // The name is interpolated into a shell script
        devbox_config::validate_username(user).map_err(CoreError::SshSetupError)?;
        validate_ssh_public_key(&keypair.public_key)?;

        let pub_key_b64 =
            base64::engine::general_purpose::STANDARD.encode(keypair.public_key.trim().as_bytes());

        let script = format!(
            r#"
set -e
HOME_DIR=$(getent passwd {user} | cut -d: -f6)
if [ -z "$HOME_DIR" ]; then
    if [ "{user}" = "root" ]; then HOME_DIR=/root; else HOME_DIR=/home/{user}; fi
fi
mkdir -p "$HOME_DIR/.ssh"
chmod 700 "$HOME_DIR/.ssh"
touch "$HOME_DIR/.ssh/authorized_keys"
chmod 600 "$HOME_DIR/.ssh/authorized_keys"
KEY=$(echo '{pub_key_b64}' | base64 -d)
if ! grep -qxF "$KEY" "$HOME_DIR/.ssh/authorized_keys" 2>/dev/null; then
    echo "$KEY" >> "$HOME_DIR/.ssh/authorized_keys"
fi
chown -R {user}: "$HOME_DIR/.ssh" 2>/dev/null || true
"#,
            user = user,
            pub_key_b64 = pub_key_b64,
        );

        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), script];
        let result = engine.exec_one_shot(container, &argv, Some("root")).await?;
        if !result.success() {
            return Err(CoreError::SshSetupError(format!(
                "installing authorized key exited with {}: {}",
                result.exit_code,
                result.output.trim()
            )));
        }

        tracing::debug!("Authorized key installed for {} in {}", user, container);
        Ok(())
    }
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

/// Validate that a string looks like a valid SSH public key
pub fn validate_ssh_public_key(key: &str) -> Result<()> {
    let key = key.trim();

    let valid_prefixes = [
        "ssh-ed25519",
        "ssh-rsa",
        "ecdsa-sha2-nistp256",
        "ecdsa-sha2-nistp384",
        "ecdsa-sha2-nistp521",
        "sk-ssh-ed25519@openssh.com",
        "sk-ecdsa-sha2-nistp256@openssh.com",
    ];

    let mut parts = key.split_whitespace();
    let key_type = parts.next().unwrap_or_default();
    if !valid_prefixes.contains(&key_type) {
        return Err(CoreError::SshSetupError(
            "Invalid SSH public key format: must start with a valid key type".into(),
        ));
    }

    let Some(data) = parts.next() else {
        return Err(CoreError::SshSetupError(
            "Invalid SSH public key format: missing key data".into(),
        ));
    };

    if base64::engine::general_purpose::STANDARD.decode(data).is_err() {
        return Err(CoreError::SshSetupError(
            "Invalid SSH public key format: key data is not valid base64".into(),
        ));
    }

    if key.contains(['\n', '\'']) {
        return Err(CoreError::SshSetupError(
            "Invalid SSH public key format: unexpected characters".into(),
        ));
    }

    Ok(())
}
