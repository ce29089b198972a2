//! Supported editors and where each keeps its configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Editors whose configuration devbox can sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorKind {
    #[default]
    #[serde(alias = "code")]
    Vscode,
    Cursor,
}

/// Static description of one editor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditorProfile {
    pub kind: EditorKind,
    pub display_name: &'static str,
    /// Directory name under the OS config dir (`~/.config/<app_dir>/User` on Linux)
    pub app_dir: &'static str,
    /// Command-line launcher on the host
    pub launcher: &'static str,
    /// Remote server directory inside the container's home
    pub server_dir: &'static str,
}

const PROFILES: &[EditorProfile] = &[
    EditorProfile {
        kind: EditorKind::Vscode,
        display_name: "VS Code",
        app_dir: "Code",
        launcher: "code",
        server_dir: ".vscode-server",
    },
    EditorProfile {
        kind: EditorKind::Cursor,
        display_name: "Cursor",
        app_dir: "Cursor",
        launcher: "cursor",
        server_dir: ".cursor-server",
    },
];

impl EditorKind {
    pub const ALL: [EditorKind; 2] = [EditorKind::Vscode, EditorKind::Cursor];

    pub fn profile(self) -> &'static EditorProfile {
        PROFILES
            .iter()
            .find(|p| p.kind == self)
            .unwrap_or(&PROFILES[0])
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EditorKind::Vscode => "vscode",
            EditorKind::Cursor => "cursor",
        }
    }

    /// The editor's `User` directory on this host
    ///
    /// Linux: `~/.config/<app>/User`, macOS: `~/Library/Application Support/<app>/User`,
    /// Windows: `%APPDATA%\<app>\User`.
    pub fn host_user_dir(self) -> Option<PathBuf> {
        let base = directories::BaseDirs::new()?;
        Some(base.config_dir().join(self.profile().app_dir).join("User"))
    }
}

impl std::fmt::Display for EditorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EditorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vscode" | "code" | "vs-code" => Ok(Self::Vscode),
            "cursor" => Ok(Self::Cursor),
            _ => Err(format!("Unknown editor: {} (expected vscode or cursor)", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_profile() {
        for kind in EditorKind::ALL {
            assert_eq!(kind.profile().kind, kind);
        }
    }

    #[test]
    fn test_parse_editor_kind() {
        assert_eq!("code".parse::<EditorKind>().unwrap(), EditorKind::Vscode);
        assert_eq!("Cursor".parse::<EditorKind>().unwrap(), EditorKind::Cursor);
        assert!("emacs".parse::<EditorKind>().is_err());
    }

    #[test]
    fn test_host_user_dir_ends_with_user() {
        if let Some(dir) = EditorKind::Cursor.host_user_dir() {
            assert!(dir.ends_with("Cursor/User"));
        }
    }
}
