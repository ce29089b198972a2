//! Reading and rewriting the SSH known-hosts file
//!
//! Only plain (unhashed) entries are edited here. Hashed entries cannot be
//! matched without the per-line salt, so removing those is left to
//! `ssh-keygen -R`.

use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

/// Host pattern as written by ssh: `host` on port 22, `[host]:port` otherwise
pub fn host_pattern(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// One `hosts keytype key` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHostEntry {
    pub hosts: String,
    pub key_type: String,
    pub key: String,
}

impl KnownHostEntry {
    /// Parse a line; comments, markers (`@revoked`) and malformed lines yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            return None;
        }
        let mut fields = line.split_whitespace();
        let hosts = fields.next()?;
        let key_type = fields.next()?;
        let key = fields.next()?;
        Some(Self {
            hosts: hosts.to_string(),
            key_type: key_type.to_string(),
            key: key.to_string(),
        })
    }

    pub fn is_hashed(&self) -> bool {
        self.hosts.starts_with("|1|")
    }

    /// Whether the comma-separated host list names `pattern`
    pub fn matches(&self, pattern: &str) -> bool {
        !self.is_hashed() && self.hosts.split(',').any(|h| h == pattern)
    }

    /// `SHA256:...` as printed by `ssh-keygen -l`
    pub fn fingerprint(&self) -> Option<String> {
        fingerprint_sha256(&self.key)
    }

    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.hosts, self.key_type, self.key)
    }
}

/// OpenSSH-style SHA256 fingerprint of base64 key material
pub fn fingerprint_sha256(key_b64: &str) -> Option<String> {
    let blob = base64::engine::general_purpose::STANDARD
        .decode(key_b64)
        .ok()?;
    let digest = Sha256::digest(&blob);
    Some(format!(
        "SHA256:{}",
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest)
    ))
}

/// Entries from `ssh-keyscan` output that belong to `pattern`
pub fn parse_scan_output(output: &str, pattern: &str) -> Vec<KnownHostEntry> {
    let mut entries: Vec<KnownHostEntry> = Vec::new();
    for entry in output.lines().filter_map(KnownHostEntry::parse) {
        if entry.matches(pattern) && !entries.contains(&entry) {
            entries.push(entry);
        }
    }
    entries
}

/// Plain entries for `pattern` currently in the file
pub fn find_entries(path: &Path, pattern: &str) -> std::io::Result<Vec<KnownHostEntry>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(content
        .lines()
        .filter_map(KnownHostEntry::parse)
        .filter(|e| e.matches(pattern))
        .collect())
}

/// Whether the file has any hashed entries at all
pub fn has_hashed_entries(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|c| {
            c.lines()
                .filter_map(KnownHostEntry::parse)
                .any(|e| e.is_hashed())
        })
        .unwrap_or(false)
}

/// Drop plain entries for `pattern`, rewriting the file atomically
///
/// Returns how many lines were removed; a missing file removes nothing.
pub fn remove_plain_entries(path: &Path, pattern: &str) -> std::io::Result<usize> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut kept = String::with_capacity(content.len());
    let mut removed = 0;
    for line in content.lines() {
        if KnownHostEntry::parse(line).is_some_and(|e| e.matches(pattern)) {
            removed += 1;
        } else {
            kept.push_str(line);
            kept.push('\n');
        }
    }

    if removed == 0 {
        return Ok(0);
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(kept.as_bytes())?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = std::fs::metadata(path) {
        std::fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(removed)
}

/// Append entries, creating the file (and `~/.ssh`) when needed
pub fn append_entries(path: &Path, entries: &[KnownHostEntry]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }
    }

    // Keep the new entry on its own line even if the file lacks a final newline
    let needs_newline = std::fs::read(path)
        .map(|c| !c.is_empty() && !c.ends_with(b"\n"))
        .unwrap_or(false);

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if needs_newline {
        file.write_all(b"\n")?;
    }
    for entry in entries {
        writeln!(file, "{}", entry.to_line())?;
    }
    Ok(())
}
