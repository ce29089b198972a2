//! Compose driver backed by the `docker compose` CLI

use crate::{CommandOutput, CommandSpec, ComposeDriver, ProcessRunner, Result};
use async_trait::async_trait;
use devbox_config::{DevboxConfig, ProjectPaths};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// How compose is invoked on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    /// `docker compose`
    Plugin,
    /// Legacy `docker-compose`
    Standalone,
}

impl ComposeFlavor {
    fn program(self) -> &'static str {
        match self {
            ComposeFlavor::Plugin => "docker",
            ComposeFlavor::Standalone => "docker-compose",
        }
    }

    fn prefix(self) -> &'static [&'static str] {
        match self {
            ComposeFlavor::Plugin => &["compose"],
            ComposeFlavor::Standalone => &[],
        }
    }
}

/// Shells out to compose for the project's single service
pub struct ComposeCli {
    runner: Arc<dyn ProcessRunner>,
    /// "auto", "plugin" or "standalone"
    mode: String,
    flavor: OnceCell<ComposeFlavor>,
    project_dir: PathBuf,
    compose_file: PathBuf,
    project: String,
    env_file: PathBuf,
    service: String,
}

impl ComposeCli {
    pub fn new(config: &DevboxConfig, paths: &ProjectPaths, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            mode: config.engine.compose_command.clone(),
            flavor: OnceCell::new(),
            project_dir: paths.root().to_path_buf(),
            compose_file: paths.resolve(&config.container.compose_file),
            project: config.container.project_name().to_string(),
            env_file: paths.env_file(),
            service: config.container.service.clone(),
        }
    }

    /// Resolve the compose flavor once per process
    pub async fn flavor(&self) -> ComposeFlavor {
        *self
            .flavor
            .get_or_init(|| async {
                match self.mode.as_str() {
                    "plugin" => ComposeFlavor::Plugin,
                    "standalone" => ComposeFlavor::Standalone,
                    _ => self.detect().await,
                }
            })
            .await
    }

    async fn detect(&self) -> ComposeFlavor {
        let probe = CommandSpec::new("docker").args(["compose", "version"]);
        match self.runner.run(&probe).await {
            Ok(output) if output.success => ComposeFlavor::Plugin,
            _ if self.runner.command_exists("docker-compose") => {
                tracing::debug!("Using standalone docker-compose");
                ComposeFlavor::Standalone
            }
            // Let the real invocation report what is missing
            _ => ComposeFlavor::Plugin,
        }
    }

    async fn command(&self, args: &[&str]) -> CommandSpec {
        let flavor = self.flavor().await;
        let mut spec = CommandSpec::new(flavor.program())
            .args(flavor.prefix().iter().copied())
            .arg("-f")
            .arg(self.compose_file.to_string_lossy())
            .arg("-p")
            .arg(self.project.as_str());

        if self.env_file.is_file() {
            spec = spec
                .arg("--env-file")
                .arg(self.env_file.to_string_lossy());
        }

        spec.args(args.iter().copied()).cwd(&self.project_dir)
    }
}

#[async_trait]
impl ComposeDriver for ComposeCli {
    async fn up(&self, detach: bool, build: bool) -> Result<CommandOutput> {
        let mut args = vec!["up"];
        if detach {
            args.push("-d");
        }
        if build {
            args.push("--build");
        }
        args.push(&self.service);

        let spec = self.command(&args).await.echo(build || !detach);
        self.runner.run(&spec).await
    }

    async fn down(&self, remove_volumes: bool) -> Result<CommandOutput> {
        let mut args = vec!["down"];
        if remove_volumes {
            args.push("-v");
        }
        args.push("--remove-orphans");

        let spec = self.command(&args).await;
        self.runner.run(&spec).await
    }

    async fn build(&self, no_cache: bool) -> Result<CommandOutput> {
        let mut args = vec!["build"];
        if no_cache {
            args.push("--no-cache");
        }
        args.push(&self.service);

        let spec = self.command(&args).await.echo(true);
        self.runner.run(&spec).await
    }
}
