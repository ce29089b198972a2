//! Removing what devbox created

use super::DevboxManager;
use crate::{known_hosts, Result};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupOptions {
    /// Also delete volumes, keys, the env file and editor exports
    pub all: bool,
    /// Only report what would be done
    pub dry_run: bool,
    /// Skip confirmation
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    StopContainer(String),
    ComposeDown { remove_volumes: bool },
    RemoveKnownHost(String),
    DeleteKeys(PathBuf),
    DeleteEnvFile(PathBuf),
    DeleteEditorExport(PathBuf),
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupAction::StopContainer(name) => write!(f, "Stop container '{}'", name),
            CleanupAction::ComposeDown { remove_volumes: true } => {
                write!(f, "Remove compose containers, networks and volumes")
            }
            CleanupAction::ComposeDown { remove_volumes: false } => {
                write!(f, "Remove compose containers and networks")
            }
            CleanupAction::RemoveKnownHost(pattern) => {
                write!(f, "Remove known-hosts entry for {}", pattern)
            }
            CleanupAction::DeleteKeys(path) => write!(f, "Delete SSH keys in {}", path.display()),
            CleanupAction::DeleteEnvFile(path) => write!(f, "Delete {}", path.display()),
            CleanupAction::DeleteEditorExport(path) => {
                write!(f, "Delete editor export {}", path.display())
            }
        }
    }
}

/// Result of one action; failures do not stop the others
#[derive(Debug, Clone)]
pub struct CleanupResult {
    pub action: CleanupAction,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub planned: Vec<CleanupAction>,
    pub results: Vec<CleanupResult>,
    pub dry_run: bool,
    pub cancelled: bool,
}

impl CleanupReport {
    pub fn failures(&self) -> impl Iterator<Item = &CleanupResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

impl DevboxManager {
    /// Actions a cleanup with `options` would take, in order
    pub async fn plan_cleanup(&self, options: &CleanupOptions) -> Vec<CleanupAction> {
        let mut plan = Vec::new();
        let name = self.container_name();

        if self.engine.is_running(name).await {
            plan.push(CleanupAction::StopContainer(name.to_string()));
        }
        if self
            .paths
            .resolve(&self.config.container.compose_file)
            .is_file()
        {
            plan.push(CleanupAction::ComposeDown {
                remove_volumes: options.all,
            });
        }
        // Hashed entries cannot be detected up front, so always try
        plan.push(CleanupAction::RemoveKnownHost(known_hosts::host_pattern(
            &self.config.ssh.host,
            self.config.ssh.port,
        )));

        if options.all {
            let keys = self.paths.keys_dir();
            if keys.exists() {
                plan.push(CleanupAction::DeleteKeys(keys));
            }
            let env_file = self.paths.env_file();
            if env_file.exists() {
                plan.push(CleanupAction::DeleteEnvFile(env_file));
            }
            let editor = self.paths.editor_dir();
            if editor.exists() {
                plan.push(CleanupAction::DeleteEditorExport(editor));
            }
        }

        plan
    }

    /// Plan, confirm and run a cleanup
    pub async fn cleanup(&self, options: CleanupOptions) -> Result<CleanupReport> {
        let planned = self.plan_cleanup(&options).await;
        let mut report = CleanupReport {
            planned: planned.clone(),
            dry_run: options.dry_run,
            ..Default::default()
        };

        if options.dry_run || planned.is_empty() {
            return Ok(report);
        }

        if !options.force {
            let question = format!("Run {} cleanup action(s)?", planned.len());
            if !self.prompter.confirm(&question, false)? {
                report.cancelled = true;
                return Ok(report);
            }
        }

        for action in planned {
            self.send_progress(&action.to_string());
            let error = self.run_cleanup_action(&action).await.err();
            if let Some(ref e) = error {
                tracing::warn!("{} failed: {}", action, e);
            }
            report.results.push(CleanupResult { action, error });
        }

        Ok(report)
    }

    async fn run_cleanup_action(&self, action: &CleanupAction) -> std::result::Result<(), String> {
        match action {
            CleanupAction::StopContainer(name) => {
                self.engine.stop(name, false).await.map_err(|e| e.to_string())
            }
            CleanupAction::ComposeDown { remove_volumes } => {
                let output = self
                    .compose
                    .down(*remove_volumes)
                    .await
                    .map_err(|e| e.to_string())?;
                if output.success {
                    Ok(())
                } else {
                    Err(output.error_text())
                }
            }
            CleanupAction::RemoveKnownHost(_) => {
                self.ssh
                    .remove_known_host_entry(&self.config.ssh.host, self.config.ssh.port)
                    .await;
                Ok(())
            }
            CleanupAction::DeleteKeys(path) | CleanupAction::DeleteEditorExport(path) => {
                std::fs::remove_dir_all(path).map_err(|e| e.to_string())
            }
            CleanupAction::DeleteEnvFile(path) => {
                std::fs::remove_file(path).map_err(|e| e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::StartOptions;

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let project = TestProject::new();
        let manager = project.manager(ScriptedPrompter::new());
        manager.start(StartOptions::default()).await.unwrap();
        let calls_before = project.engine.mutations().len();

        let report = manager
            .cleanup(CleanupOptions { all: true, dry_run: true, force: false })
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(
            report.planned[..3],
            [
                CleanupAction::StopContainer("devbox".into()),
                CleanupAction::ComposeDown { remove_volumes: true },
                CleanupAction::RemoveKnownHost("[localhost]:2222".into()),
            ]
        );
        assert!(report.planned.contains(&CleanupAction::DeleteKeys(project.paths.keys_dir())));
        assert!(report.results.is_empty());
        assert_eq!(project.engine.mutations().len(), calls_before);
        assert!(project.paths.keys_dir().exists());
    }

    #[tokio::test]
    async fn test_declined_cleanup() {
        let project = TestProject::new();
        let manager = project.manager(ScriptedPrompter::new().confirm_with(false));

        let report = manager.cleanup(CleanupOptions::default()).await.unwrap();
        assert!(report.cancelled);
        assert!(project.compose.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_full_cleanup_is_best_effort() {
        let project = TestProject::new();
        let manager = project.manager(ScriptedPrompter::new());
        manager.start(StartOptions::default()).await.unwrap();
        *project.compose.down_output.lock().unwrap() = failed_output(1, "network in use");

        let report = manager
            .cleanup(CleanupOptions { all: true, dry_run: false, force: true })
            .await
            .unwrap();

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error.as_deref(), Some("network in use"));
        assert!(!project.paths.keys_dir().exists());
        assert!(!project.paths.env_file().exists());
        assert!(!project.engine.current().unwrap().is_running());
        assert!(!manager.ssh().has_known_host_entry("localhost", 2222));
    }
}
