//! Generated environment file consumed by the compose driver
//!
//! The file is derived from [`DevboxConfig`] and rewritten whenever setup
//! changes the configuration. Secret entries are not part of the config; they
//! survive regeneration by being carried over from the previous file.

use crate::{ConfigError, DevboxConfig, ProjectPaths, Result};
use std::collections::BTreeMap;
use std::path::Path;

const HEADER: &str = "# Generated by `devbox setup`. Do not edit; changes are overwritten.";

/// Keys that are never derived from configuration and must be preserved
pub const SECRET_KEYS: &[&str] = &["GITHUB_TOKEN"];

/// Ordered key/value content of the env file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: BTreeMap<String, String>,
}

impl EnvFile {
    /// Derive the env file from configuration
    pub fn from_config(config: &DevboxConfig, paths: &ProjectPaths) -> Self {
        let mut entries = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            entries.insert(k.to_string(), v);
        };

        set("COMPOSE_PROJECT_NAME", config.container.project_name().to_string());
        set("DEVBOX_CONTAINER_NAME", config.container.name.clone());
        set("DEVBOX_SERVICE", config.container.service.clone());
        set("DEVBOX_USER", config.container.user.clone());
        set("DEVBOX_WORKDIR", config.container.workdir.clone());
        set("DEVBOX_SSH_PORT", config.ssh.port.to_string());
        set("DEVBOX_READY_MARKER", config.readiness.marker.clone());
        set("DEVBOX_KEYS_DIR", paths.keys_dir().to_string_lossy().to_string());
        set("DEVBOX_SSH_KEY_FILE", config.ssh.key.file_name.clone());
        if config.github.enabled {
            set("DEVBOX_GITHUB_KEY_FILE", config.github.key.file_name.clone());
        }
        if let Some(ref name) = config.git.name {
            set("GIT_USER_NAME", name.clone());
        }
        if let Some(ref email) = config.git.email {
            set("GIT_USER_EMAIL", email.clone());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if let Ok(meta) = std::fs::metadata(paths.root()) {
                set("HOST_UID", meta.uid().to_string());
                set("HOST_GID", meta.gid().to_string());
            }
        }

        Self { entries }
    }

    /// Parse an existing env file; comments and blank lines are ignored
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), unquote(v.trim())))
            .collect();
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Carry secret entries over from a previous file unless already set
    pub fn merge_secrets(&mut self, previous: &EnvFile) {
        for key in SECRET_KEYS {
            if self.entries.contains_key(*key) {
                continue;
            }
            if let Some(value) = previous.get(key) {
                self.entries.insert(key.to_string(), value.to_string());
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote(value));
            out.push('\n');
        }
        out
    }

    /// Write the file, preserving secrets already present on disk
    pub fn write(mut self, path: &Path) -> Result<()> {
        if let Ok(existing) = std::fs::read_to_string(path) {
            self.merge_secrets(&EnvFile::parse(&existing));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path, self.render()).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        // May hold a token
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(
                |e| ConfigError::WriteError {
                    path: path.to_path_buf(),
                    source: e,
                },
            )?;
        }

        tracing::debug!("Wrote env file {:?}", path);
        Ok(())
    }
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '$')) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    } else {
        value.to_string()
    }
}
