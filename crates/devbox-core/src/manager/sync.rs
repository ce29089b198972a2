//! Pushing editor settings into the running container

use super::DevboxManager;
use crate::editor::{EditorSync, SyncSummary};
use crate::{CoreError, Result};
use devbox_config::EditorKind;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Copy the project export back to the host instead
    pub import: bool,
    /// Editor to sync instead of the configured one
    pub editor: Option<EditorKind>,
}

impl DevboxManager {
    /// Editor a sync with `options` works on
    pub fn sync_kind(&self, options: &SyncOptions) -> EditorKind {
        options.editor.unwrap_or(self.config.editor.kind)
    }

    fn editor_sync(&self, options: &SyncOptions) -> Result<EditorSync> {
        EditorSync::new(self.sync_kind(options), &self.paths, Arc::clone(&self.runner))
    }

    /// Export host settings and push them into the container, or import them back
    pub async fn sync_editor(&self, options: SyncOptions) -> Result<SyncSummary> {
        self.sync_editor_with(self.editor_sync(&options)?, options).await
    }

    pub async fn sync_editor_with(&self, sync: EditorSync, options: SyncOptions) -> Result<SyncSummary> {
        if options.import {
            self.send_progress("Importing editor settings...");
            return sync.import().await;
        }

        let info = self.require_running().await?;
        self.send_progress("Exporting editor settings...");
        let summary = sync.export().await?;

        self.send_progress("Copying editor settings into the container...");
        let user = self.config.container.user.as_str();
        let home = self.container_home(&info.name, user).await?;
        let profile = sync.profile();
        let machine_dir = format!("{}/{}/data/Machine", home, profile.server_dir);
        let export_dest = format!("{}/.devbox/editor/{}", home, sync.kind().as_str());

        self.exec_checked(
            &info.name,
            &["mkdir", "-p", machine_dir.as_str(), export_dest.as_str()],
            Some(user),
        )
        .await?;

        let settings = sync.export_dir().join("settings.json");
        if settings.is_file() {
            self.engine.copy_into(&info.name, &settings, &machine_dir).await?;
        }
        self.engine
            .copy_into(&info.name, sync.export_dir(), &export_dest)
            .await?;

        // Uploads land owned by root
        let owner = format!("{}:", user);
        let server_root = format!("{}/{}", home, profile.server_dir);
        let devbox_root = format!("{}/.devbox", home);
        self.exec_checked(
            &info.name,
            &["chown", "-R", owner.as_str(), server_root.as_str(), devbox_root.as_str()],
            Some("root"),
        )
        .await?;

        tracing::info!("Editor settings copied into '{}'", info.name);
        Ok(summary)
    }

    async fn container_home(&self, container: &str, user: &str) -> Result<String> {
        let argv = vec!["sh".to_string(), "-c".to_string(), "printf %s \"$HOME\"".to_string()];
        let result = self.engine.exec_one_shot(container, &argv, Some(user)).await?;
        let home = result.output.trim();
        if !result.success() || !home.starts_with('/') {
            return Err(CoreError::EditorSync(format!(
                "could not determine home directory of '{}' in the container",
                user
            )));
        }
        Ok(home.to_string())
    }

    async fn exec_checked(&self, container: &str, argv: &[&str], user: Option<&str>) -> Result<()> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let result = self.engine.exec_one_shot(container, &argv, user).await?;
        if !result.success() {
            return Err(CoreError::EditorSync(format!(
                "`{}` exited with {}: {}",
                argv.join(" "),
                result.exit_code,
                result.output.trim()
            )));
        }
        Ok(())
    }
}
