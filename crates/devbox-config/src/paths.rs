//! On-disk layout of a devbox project
//!
//! ```text
//! <root>/
//!   .devbox/
//!     devbox.toml      project configuration
//!     .env             generated compose environment (never hand-edited)
//!     keys/            container and GitHub keypairs
//!     editor/<kind>/   exported editor configuration
//! ```

use crate::EditorKind;
use std::path::{Path, PathBuf};

/// Name of the per-project state directory
pub const STATE_DIR: &str = ".devbox";

/// Resolved paths for one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    /// Use `root` as the project root without searching
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` to the nearest directory containing `.devbox/`.
    ///
    /// Falls back to `start` itself so that `setup` can create a new project.
    pub fn discover(start: &Path) -> Self {
        let found = start
            .ancestors()
            .find(|dir| dir.join(STATE_DIR).is_dir())
            .map(Path::to_path_buf);

        match found {
            Some(root) => {
                tracing::debug!("Found devbox project at {:?}", root);
                Self { root }
            }
            None => {
                tracing::debug!("No .devbox directory above {:?}, using it as root", start);
                Self {
                    root: start.to_path_buf(),
                }
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir().join("devbox.toml")
    }

    pub fn env_file(&self) -> PathBuf {
        self.state_dir().join(".env")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.state_dir().join("keys")
    }

    pub fn editor_dir(&self) -> PathBuf {
        self.state_dir().join("editor")
    }

    /// Export directory for one editor
    pub fn editor_export_dir(&self, kind: EditorKind) -> PathBuf {
        self.editor_dir().join(kind.as_str())
    }

    /// Resolve a possibly-relative path against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Whether `setup` has been run for this project
    pub fn is_initialized(&self) -> bool {
        self.config_file().is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_state_dir() {
        let paths = ProjectPaths::new("/work/app");
        assert_eq!(paths.config_file(), PathBuf::from("/work/app/.devbox/devbox.toml"));
        assert_eq!(paths.env_file(), PathBuf::from("/work/app/.devbox/.env"));
        assert_eq!(paths.keys_dir(), PathBuf::from("/work/app/.devbox/keys"));
        assert_eq!(
            paths.editor_export_dir(EditorKind::Cursor),
            PathBuf::from("/work/app/.devbox/editor/cursor")
        );
    }

    #[test]
    fn test_discover_walks_up() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(STATE_DIR)).unwrap();
        let nested = tmp.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        let paths = ProjectPaths::discover(&nested);
        assert_eq!(paths.root(), tmp.path());
    }

    #[test]
    fn test_discover_falls_back_to_start() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::discover(tmp.path());
        assert_eq!(paths.root(), tmp.path());
        assert!(!paths.is_initialized());
    }

    #[test]
    fn test_resolve_relative() {
        let paths = ProjectPaths::new("/work/app");
        assert_eq!(
            paths.resolve(Path::new("docker-compose.yml")),
            PathBuf::from("/work/app/docker-compose.yml")
        );
        assert_eq!(paths.resolve(Path::new("/etc/compose.yml")), PathBuf::from("/etc/compose.yml"));
    }
}
