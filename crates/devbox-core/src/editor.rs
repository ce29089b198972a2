//! Editor settings export and import
//!
//! The export directory (`.devbox/editor/<kind>/`) mirrors the editor's
//! `User` directory for the files devbox syncs, plus `extensions.txt` with one
//! extension id per line.

use crate::{CoreError, Result};
use devbox_config::{EditorKind, EditorProfile, ProjectPaths};
use devbox_provider::{CommandSpec, ProcessRunner};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Files copied as-is between the `User` directory and the export
pub const SYNCED_FILES: &[&str] = &["settings.json", "keybindings.json"];
pub const SNIPPETS_DIR: &str = "snippets";
pub const EXTENSIONS_FILE: &str = "extensions.txt";

/// What an export or import moved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Relative names of the files and directories copied
    pub copied: Vec<String>,
    /// Extension ids listed (export) or already present (import)
    pub extensions: usize,
    /// Extensions installed during an import
    pub installed: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct EditorSync {
    kind: EditorKind,
    host_dir: PathBuf,
    export_dir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl EditorSync {
    pub fn new(kind: EditorKind, paths: &ProjectPaths, runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        let host_dir = kind.host_user_dir().ok_or_else(|| {
            CoreError::EditorSync("could not determine the user configuration directory".into())
        })?;
        Ok(Self {
            kind,
            host_dir,
            export_dir: paths.editor_export_dir(kind),
            runner,
        })
    }

    /// Use a different `User` directory
    pub fn with_host_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.host_dir = dir.into();
        self
    }

    pub fn kind(&self) -> EditorKind {
        self.kind
    }

    pub fn profile(&self) -> &'static EditorProfile {
        self.kind.profile()
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Copy the host configuration into the project export
    pub async fn export(&self) -> Result<SyncSummary> {
        if !self.host_dir.is_dir() {
            return Err(CoreError::EditorSync(format!(
                "{} configuration not found at {}",
                self.profile().display_name,
                self.host_dir.display()
            )));
        }
        tracing::info!(
            "Exporting {} settings from {:?}",
            self.profile().display_name,
            self.host_dir
        );

        std::fs::create_dir_all(&self.export_dir)?;
        let mut summary = copy_tree(&self.host_dir, &self.export_dir)?;

        match self.list_extensions().await {
            Ok(extensions) => {
                let mut content = extensions.join("\n");
                content.push('\n');
                std::fs::write(self.export_dir.join(EXTENSIONS_FILE), content)?;
                summary.extensions = extensions.len();
                summary.copied.push(EXTENSIONS_FILE.to_string());
            }
            Err(e) => {
                let warning = format!("Extensions not exported: {}", e);
                tracing::warn!("{}", warning);
                summary.warnings.push(warning);
            }
        }

        Ok(summary)
    }

    /// Copy the project export back to the host and install missing extensions
    pub async fn import(&self) -> Result<SyncSummary> {
        if !self.export_dir.is_dir() {
            return Err(CoreError::EditorSync(format!(
                "nothing to import; {} does not exist (run `devbox sync` first)",
                self.export_dir.display()
            )));
        }
        tracing::info!(
            "Importing {} settings into {:?}",
            self.profile().display_name,
            self.host_dir
        );

        std::fs::create_dir_all(&self.host_dir)?;
        let mut summary = copy_tree(&self.export_dir, &self.host_dir)?;

        let wanted = match std::fs::read_to_string(self.export_dir.join(EXTENSIONS_FILE)) {
            Ok(content) => parse_extensions(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summary),
            Err(e) => return Err(e.into()),
        };

        let installed: HashSet<String> = match self.list_extensions().await {
            Ok(list) => list.into_iter().map(|e| e.to_lowercase()).collect(),
            Err(e) => {
                summary.warnings.push(format!("Extensions not installed: {}", e));
                return Ok(summary);
            }
        };

        for extension in wanted {
            if installed.contains(&extension.to_lowercase()) {
                summary.extensions += 1;
                continue;
            }
            let spec = CommandSpec::new(self.profile().launcher)
                .arg("--install-extension")
                .arg(extension.as_str());
            match self.runner.run(&spec).await {
                Ok(output) if output.success => summary.installed.push(extension),
                Ok(output) => summary.warnings.push(format!(
                    "Could not install {}: {}",
                    extension,
                    output.error_text()
                )),
                Err(e) => summary
                    .warnings
                    .push(format!("Could not install {}: {}", extension, e)),
            }
        }

        Ok(summary)
    }

    async fn list_extensions(&self) -> Result<Vec<String>> {
        let launcher = self.profile().launcher;
        if !self.runner.command_exists(launcher) {
            return Err(CoreError::EditorSync(format!(
                "`{}` is not on PATH",
                launcher
            )));
        }
        let output = self
            .runner
            .run(&CommandSpec::new(launcher).arg("--list-extensions"))
            .await?;
        if !output.success {
            return Err(CoreError::EditorSync(output.error_text()));
        }
        Ok(parse_extensions(&output.stdout))
    }
}

fn parse_extensions(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Copy the synced files and the snippets directory from `from` to `to`
fn copy_tree(from: &Path, to: &Path) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();

    for name in SYNCED_FILES {
        let src = from.join(name);
        if src.is_file() {
            std::fs::copy(&src, to.join(name))?;
            summary.copied.push(name.to_string());
        }
    }

    let snippets = from.join(SNIPPETS_DIR);
    if snippets.is_dir() {
        let dest = to.join(SNIPPETS_DIR);
        if dest.exists() {
            std::fs::remove_dir_all(&dest)?;
        }
        copy_dir(&snippets, &dest)?;
        summary.copied.push(format!("{}/", SNIPPETS_DIR));
    }

    Ok(summary)
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let path = entry.path();
        let dest = to.join(entry.file_name());
        if path.is_dir() {
            copy_dir(&path, &dest)?;
        } else if path.is_file() {
            std::fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}
