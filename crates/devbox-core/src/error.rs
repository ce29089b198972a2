//! Error types for devbox-core

use crate::manager::Step;
use crate::readiness::FailureReason;
use devbox_config::ConfigError;
use devbox_provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// Carries the build's stderr
    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Failed to start container: {0}")]
    StartFailed(String),

    #[error("Container did not become ready: {reason}")]
    NotReady {
        reason: FailureReason,
        tail: Vec<String>,
    },

    #[error("Container is not running after start (state: {0})")]
    Unhealthy(String),

    #[error("Container '{0}' is not running")]
    NotRunning(String),

    #[error("SSH key generation failed: {0}")]
    SshKeygenError(String),

    #[error("SSH setup failed: {0}")]
    SshSetupError(String),

    #[error("Project is not set up: {0}")]
    NotSetUp(String),

    #[error("Editor sync failed: {0}")]
    EditorSync(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A lifecycle step failed; nothing after it ran
    #[error("{step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    pub fn at(step: Step, source: impl Into<CoreError>) -> Self {
        CoreError::Step {
            step,
            source: Box::new(source.into()),
        }
    }

    /// The underlying error with any step wrapper removed
    pub fn root(&self) -> &CoreError {
        match self {
            CoreError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Step at which a lifecycle run stopped, if any
    pub fn failed_step(&self) -> Option<Step> {
        match self {
            CoreError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Recent container output attached to a readiness failure
    pub fn log_tail(&self) -> &[String] {
        match self.root() {
            CoreError::NotReady { tail, .. } => tail,
            _ => &[],
        }
    }

    /// Ordered steps the user can take to recover
    pub fn remediation(&self) -> Vec<String> {
        let steps: &[&str] = match self.root() {
            CoreError::Provider(ProviderError::EngineUnreachable(_)) => &[
                "Start Docker (Docker Desktop, or `sudo systemctl start docker`)",
                "Check the [engine] socket setting in .devbox/devbox.toml",
            ],
            CoreError::Provider(ProviderError::LaunchFailed { program, .. }) => {
                return vec![format!("Install `{}` and make sure it is on PATH", program)];
            }
            CoreError::Provider(ProviderError::ContainerNotFound(_)) => {
                &["Create the container with `devbox start`"]
            }
            CoreError::Provider(_) => &["Re-run with --verbose for details"],
            CoreError::Config(ConfigError::Validation(_)) => {
                &["Fix the listed fields in .devbox/devbox.toml, or re-run `devbox setup`"]
            }
            CoreError::Config(_) => &["Check .devbox/devbox.toml, or re-run `devbox setup`"],
            CoreError::BuildFailed(_) => &[
                "Read the build output above",
                "Retry without cached layers: `devbox rebuild --no-cache`",
            ],
            CoreError::StartFailed(_) => &[
                "Check that the SSH port is not already in use",
                "Inspect the compose file for errors",
                "Try `devbox rebuild`",
            ],
            CoreError::NotReady { .. } => &[
                "Review the container output above",
                "See more with `devbox logs --tail 200`",
                "Try `devbox rebuild`",
            ],
            CoreError::Unhealthy(_) => &[
                "Find out why it exited: `devbox logs`",
                "Try `devbox rebuild`",
            ],
            CoreError::NotRunning(_) => &["Start it with `devbox start`"],
            CoreError::SshKeygenError(_) => &[
                "Make sure ssh-keygen is installed",
                "Check permissions on .devbox/keys",
            ],
            CoreError::SshSetupError(_) => &[
                "Ensure the container is running",
                "Check permissions on the key file",
            ],
            CoreError::NotSetUp(_) => &["Run `devbox setup` first"],
            CoreError::EditorSync(_) => &["Check that the editor is installed and has been opened once"],
            CoreError::Prompt(_) => &["Run in an interactive terminal, or pass --force"],
            CoreError::Io(_) | CoreError::Json(_) | CoreError::Step { .. } => &[],
        };
        steps.iter().map(|s| s.to_string()).collect()
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_wrapper_display_and_root() {
        let err = CoreError::at(Step::Building, CoreError::BuildFailed("no space left".into()));
        assert_eq!(err.to_string(), "Building failed: Build failed: no space left");
        assert!(matches!(err.root(), CoreError::BuildFailed(_)));
        assert_eq!(err.failed_step(), Some(Step::Building));
        assert_eq!(err.remediation().len(), 2);
    }

    #[test]
    fn test_engine_unreachable_remediation() {
        let err: CoreError = ProviderError::EngineUnreachable("socket missing".into()).into();
        assert!(err.remediation()[0].contains("Start Docker"));
    }

    #[test]
    fn test_log_tail_through_step() {
        let err = CoreError::at(
            Step::WaitingReady,
            CoreError::NotReady {
                reason: FailureReason::StreamClosed,
                tail: vec!["a".into(), "b".into()],
            },
        );
        assert_eq!(err.log_tail(), ["a".to_string(), "b".to_string()]);
    }
}
