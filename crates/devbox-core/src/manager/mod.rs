//! Devbox manager - coordinates every operation on the managed container

mod cleanup;
mod lifecycle;
mod session;
mod sync;

pub use cleanup::*;
pub use lifecycle::*;
pub use session::*;
pub use sync::*;

use crate::{CoreError, Prompter, Result, SshTrustManager};
use devbox_config::{DevboxConfig, EnvFile, ProjectPaths};
use devbox_provider::{ComposeDriver, ContainerEngine, ContainerInfo, ProcessRunner};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Main devbox manager
///
/// Every collaborator is passed in; nothing is looked up globally.
pub struct DevboxManager {
    config: DevboxConfig,
    paths: ProjectPaths,
    engine: Box<dyn ContainerEngine>,
    compose: Box<dyn ComposeDriver>,
    runner: Arc<dyn ProcessRunner>,
    prompter: Box<dyn Prompter>,
    ssh: SshTrustManager,
    /// Human-readable progress lines
    progress: Option<mpsc::UnboundedSender<String>>,
}

impl DevboxManager {
    pub fn new(
        config: DevboxConfig,
        paths: ProjectPaths,
        engine: Box<dyn ContainerEngine>,
        compose: Box<dyn ComposeDriver>,
        runner: Arc<dyn ProcessRunner>,
        prompter: Box<dyn Prompter>,
    ) -> Result<Self> {
        let ssh = SshTrustManager::new(&config, &paths, runner.clone())?;
        Ok(Self {
            config,
            paths,
            engine,
            compose,
            runner,
            prompter,
            ssh,
            progress: None,
        })
    }

    /// Report progress lines to `tx` as steps run
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<String>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn config(&self) -> &DevboxConfig {
        &self.config
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn ssh(&self) -> &SshTrustManager {
        &self.ssh
    }

    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    pub fn runner(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }

    pub fn prompter(&self) -> &dyn Prompter {
        self.prompter.as_ref()
    }

    pub fn container_name(&self) -> &str {
        &self.config.container.name
    }

    fn send_progress(&self, msg: &str) {
        send_progress(self.progress.as_ref(), msg);
    }

    /// Fail unless the project has what compose needs
    ///
    /// A missing env file is regenerated from configuration.
    fn preflight(&self) -> Result<()> {
        let compose_file = self.paths.resolve(&self.config.container.compose_file);
        if !compose_file.is_file() {
            return Err(CoreError::NotSetUp(format!(
                "compose file {} not found",
                compose_file.display()
            )));
        }

        let env_file = self.paths.env_file();
        if !env_file.exists() {
            tracing::info!("Regenerating {:?}", env_file);
            EnvFile::from_config(&self.config, &self.paths).write(&env_file)?;
        }
        Ok(())
    }

    /// The container, which must exist and be running
    async fn require_running(&self) -> Result<ContainerInfo> {
        match self.engine.find(self.container_name()).await? {
            Some(info) if info.is_running() => Ok(info),
            _ => Err(CoreError::NotRunning(self.container_name().to_string())),
        }
    }
}

pub(crate) fn send_progress(progress: Option<&mpsc::UnboundedSender<String>>, msg: &str) {
    if let Some(tx) = progress {
        let _ = tx.send(msg.to_string());
    }
}

/// Steps of a lifecycle run, in the order they can occur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Step {
    CheckRunning,
    ConfirmStop,
    Stopping,
    TrustCleanup,
    Removing,
    Building,
    Starting,
    WaitingReady,
    TrustReestablish,
    HealthCheck,
    Done,
}

impl Step {
    /// Progress line shown when the step begins
    pub fn description(self) -> &'static str {
        match self {
            Step::CheckRunning => "Checking container state...",
            Step::ConfirmStop => "Waiting for confirmation...",
            Step::Stopping => "Stopping container...",
            Step::TrustCleanup => "Removing stale host key...",
            Step::Removing => "Removing container...",
            Step::Building => "Building image...",
            Step::Starting => "Starting container...",
            Step::WaitingReady => "Waiting for container to become ready...",
            Step::TrustReestablish => "Setting up SSH trust...",
            Step::HealthCheck => "Checking container health...",
            Step::Done => "Done",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a lifecycle run ended (failures are errors instead)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum Outcome {
    #[default]
    Done,
    /// `start` found the container already running
    AlreadyRunning,
    /// `stop` found nothing to stop
    NotRunning,
    /// The user declined; nothing was changed
    Cancelled,
}

/// What a lifecycle run did
#[derive(Debug, Clone, Default)]
pub struct LifecycleReport {
    /// Steps entered, in order
    pub steps: Vec<Step>,
    pub outcome: Outcome,
    /// Whether the host key was scanned and recorded
    pub trust_established: bool,
    /// Non-fatal problems
    pub warnings: Vec<String>,
    /// Container as last seen
    pub info: Option<ContainerInfo>,
}

impl LifecycleReport {
    pub fn entered(&self, step: Step) -> bool {
        self.steps.contains(&step)
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    fn finish(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }
}
