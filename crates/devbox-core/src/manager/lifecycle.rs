//! Start, stop and rebuild
//!
//! Each run walks the [`Step`] sequence, recording every step it enters. The
//! first fatal failure ends the run with [`CoreError::Step`]; nothing after
//! that step is attempted.

use super::{DevboxManager, LifecycleReport, Outcome, Step};
use crate::readiness::{wait_for_ready, FrameMode, ReadinessSignal, ReadinessSpec};
use crate::{CoreError, KeyPurpose, Result};
use devbox_provider::{ContainerInfo, LogOptions};

#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Build the image before starting
    pub build: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildOptions {
    pub no_cache: bool,
    /// Skip the stop confirmation
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StopOptions {
    /// Skip confirmation and kill instead of stopping gracefully
    pub force: bool,
}

impl DevboxManager {
    fn enter(&self, report: &mut LifecycleReport, step: Step) {
        tracing::debug!("Entering step {}", step);
        report.steps.push(step);
        if step != Step::Done {
            self.send_progress(step.description());
        }
    }

    /// Start the container, building first when asked
    pub async fn start(&self, options: StartOptions) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();
        let name = self.container_name().to_string();

        self.enter(&mut report, Step::CheckRunning);
        self.preflight()
            .map_err(|e| CoreError::at(Step::CheckRunning, e))?;
        let existing = self
            .engine
            .find(&name)
            .await
            .map_err(|e| CoreError::at(Step::CheckRunning, e))?;

        if let Some(info) = existing.filter(ContainerInfo::is_running) {
            tracing::info!("Container '{}' is already running", name);
            report.info = Some(info);
            self.enter(&mut report, Step::Done);
            return Ok(report.finish(Outcome::AlreadyRunning));
        }

        self.bring_up(&mut report, options.build, false).await?;
        Ok(report.finish(Outcome::Done))
    }

    /// Tear the container down and build it again from scratch
    pub async fn rebuild(&self, options: RebuildOptions) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();
        let name = self.container_name().to_string();

        self.enter(&mut report, Step::CheckRunning);
        self.preflight()
            .map_err(|e| CoreError::at(Step::CheckRunning, e))?;
        let existing = self
            .engine
            .find(&name)
            .await
            .map_err(|e| CoreError::at(Step::CheckRunning, e))?;
        let running = existing.as_ref().is_some_and(ContainerInfo::is_running);

        if running && !options.force {
            self.enter(&mut report, Step::ConfirmStop);
            let question = format!(
                "Container '{}' is running. Stop it and rebuild?",
                name
            );
            let confirmed = self
                .prompter
                .confirm(&question, false)
                .map_err(|e| CoreError::at(Step::ConfirmStop, e))?;
            if !confirmed {
                tracing::info!("Rebuild cancelled");
                report.info = existing;
                return Ok(report.finish(Outcome::Cancelled));
            }
        }

        if running {
            self.enter(&mut report, Step::Stopping);
            self.engine
                .stop(&name, false)
                .await
                .map_err(|e| CoreError::at(Step::Stopping, e))?;
        }

        // Before removal, so the replacement is never checked against the old key
        self.enter(&mut report, Step::TrustCleanup);
        self.ssh
            .rotate_for_rebuild(&self.config.ssh.host, self.config.ssh.port)
            .await;

        self.enter(&mut report, Step::Removing);
        if existing.is_some() {
            self.engine
                .remove(&name, true)
                .await
                .map_err(|e| CoreError::at(Step::Removing, e))?;
        }

        self.bring_up(&mut report, true, options.no_cache).await?;
        Ok(report.finish(Outcome::Done))
    }

    /// Stop the container, asking first unless forced
    pub async fn stop(&self, options: StopOptions) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();
        let name = self.container_name().to_string();

        self.enter(&mut report, Step::CheckRunning);
        let existing = self
            .engine
            .find(&name)
            .await
            .map_err(|e| CoreError::at(Step::CheckRunning, e))?;

        let Some(info) = existing.filter(ContainerInfo::is_running) else {
            tracing::info!("Container '{}' is not running", name);
            return Ok(report.finish(Outcome::NotRunning));
        };
        report.info = Some(info);

        if !options.force {
            self.enter(&mut report, Step::ConfirmStop);
            let confirmed = self
                .prompter
                .confirm(&format!("Stop container '{}'?", name), true)
                .map_err(|e| CoreError::at(Step::ConfirmStop, e))?;
            if !confirmed {
                tracing::info!("Stop cancelled");
                return Ok(report.finish(Outcome::Cancelled));
            }
        }

        self.enter(&mut report, Step::Stopping);
        self.engine
            .stop(&name, options.force)
            .await
            .map_err(|e| CoreError::at(Step::Stopping, e))?;

        report.info = self.engine.find(&name).await.ok().flatten();
        self.enter(&mut report, Step::Done);
        Ok(report.finish(Outcome::Done))
    }

    /// Building → Starting → WaitingReady → TrustReestablish → HealthCheck → Done
    async fn bring_up(
        &self,
        report: &mut LifecycleReport,
        build: bool,
        no_cache: bool,
    ) -> Result<()> {
        let name = self.container_name().to_string();
        let (host, port) = (self.config.ssh.host.as_str(), self.config.ssh.port);

        if build {
            self.enter(report, Step::Building);
            let output = self
                .compose
                .build(no_cache)
                .await
                .map_err(|e| CoreError::at(Step::Building, e))?;
            if !output.success {
                return Err(CoreError::at(
                    Step::Building,
                    CoreError::BuildFailed(output.error_text()),
                ));
            }
        }

        self.enter(report, Step::Starting);
        let keypair = self
            .ssh
            .ensure_keypair(KeyPurpose::Container, &self.config)
            .await
            .map_err(|e| CoreError::at(Step::Starting, e))?;
        if self.config.github.enabled {
            self.ssh
                .ensure_keypair(KeyPurpose::GitHub, &self.config)
                .await
                .map_err(|e| CoreError::at(Step::Starting, e))?;
        }

        let output = self
            .compose
            .up(true, false)
            .await
            .map_err(|e| CoreError::at(Step::Starting, e))?;
        if !output.success {
            return Err(CoreError::at(
                Step::Starting,
                CoreError::StartFailed(output.error_text()),
            ));
        }

        let info = self
            .engine
            .find(&name)
            .await
            .map_err(|e| CoreError::at(Step::Starting, e))?
            .ok_or_else(|| {
                CoreError::at(
                    Step::Starting,
                    CoreError::StartFailed(format!("compose did not create container '{}'", name)),
                )
            })?;

        self.enter(report, Step::WaitingReady);
        self.wait_until_ready(&info)
            .await
            .map_err(|e| CoreError::at(Step::WaitingReady, e))?;

        self.enter(report, Step::TrustReestablish);
        if let Err(e) = self
            .ssh
            .install_authorized_key(self.engine.as_ref(), &name, &self.config.container.user, &keypair)
            .await
        {
            report.warn(format!("Could not install SSH key in container: {}", e));
        }
        report.trust_established = self
            .ssh
            .add_known_host_entry(host, port, self.prompter.as_ref())
            .await;
        if !report.trust_established {
            report.warn(format!(
                "Host key for {} was not recorded; ssh will ask on first connect",
                crate::known_hosts::host_pattern(host, port)
            ));
        }

        self.enter(report, Step::HealthCheck);
        let current = self
            .engine
            .find(&name)
            .await
            .map_err(|e| CoreError::at(Step::HealthCheck, e))?;
        let current = match current {
            Some(info) if info.is_running() => info,
            Some(info) => {
                return Err(CoreError::at(
                    Step::HealthCheck,
                    CoreError::Unhealthy(info.state.to_string()),
                ))
            }
            None => {
                return Err(CoreError::at(
                    Step::HealthCheck,
                    CoreError::Unhealthy("removed".to_string()),
                ))
            }
        };

        let probe = vec!["true".to_string()];
        match self.engine.exec_one_shot(&name, &probe, None).await {
            Ok(result) if result.success() => {}
            Ok(result) => report.warn(format!(
                "Liveness probe exited with {}",
                result.exit_code
            )),
            Err(e) => report.warn(format!("Liveness probe failed: {}", e)),
        }

        report.info = Some(current);
        self.enter(report, Step::Done);
        Ok(())
    }

    /// Follow the new container's logs until the readiness marker
    async fn wait_until_ready(&self, info: &ContainerInfo) -> Result<()> {
        let spec = ReadinessSpec::from_config(&self.config.readiness);
        // Only this run's output; an earlier marker must not count
        let options = LogOptions {
            follow: true,
            since: info.started_at().map(|t| t.timestamp()),
            ..Default::default()
        };

        let stream = self.engine.logs(&info.name, &options).await?;
        match wait_for_ready(stream, FrameMode::for_tty(info.tty), &spec).await {
            ReadinessSignal::Ready => {
                tracing::info!("Container '{}' is ready", info.name);
                Ok(())
            }
            ReadinessSignal::Failed { reason, tail } => Err(CoreError::NotReady { reason, tail }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::known_hosts;
    use crate::readiness::FailureReason;
    use crate::test_support::*;
    use devbox_provider::ContainerState;

    #[tokio::test]
    async fn test_start_with_build_from_absent() {
        let project = TestProject::new();
        let manager = project.manager(ScriptedPrompter::new());

        let report = manager.start(StartOptions { build: true }).await.unwrap();

        assert_eq!(report.outcome, Outcome::Done);
        assert_eq!(
            report.steps,
            vec![
                Step::CheckRunning,
                Step::Building,
                Step::Starting,
                Step::WaitingReady,
                Step::TrustReestablish,
                Step::HealthCheck,
                Step::Done,
            ]
        );
        assert!(report.trust_established);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(
            project.compose.get_calls(),
            vec![
                ComposeCall::Build { no_cache: false },
                ComposeCall::Up { detach: true, build: false },
            ]
        );
        let entries = known_hosts::find_entries(&project.known_hosts(), "[localhost]:2222").unwrap();
        assert_eq!(entries.len(), 1);
        assert!(project.engine.current().unwrap().is_running());
        assert!(project.paths.env_file().is_file());
    }

    #[tokio::test]
    async fn test_start_requests_logs_since_start() {
        let project = TestProject::new();
        let manager = project.manager(ScriptedPrompter::new());
        manager.start(StartOptions::default()).await.unwrap();

        let started = project.engine.current().unwrap().started_at().unwrap();
        let logs = project
            .engine
            .get_calls()
            .into_iter()
            .find_map(|c| match c {
                EngineCall::Logs { options, .. } => Some(options),
                _ => None,
            })
            .unwrap();
        assert!(logs.follow);
        assert_eq!(logs.since, Some(started.timestamp()));
    }

    #[tokio::test]
    async fn test_start_already_running() {
        let project = TestProject::new();
        project.engine.container.lock().unwrap().replace(running_container("devbox"));
        let manager = project.manager(ScriptedPrompter::new());

        let report = manager.start(StartOptions { build: true }).await.unwrap();
        assert_eq!(report.outcome, Outcome::AlreadyRunning);
        assert!(project.compose.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_without_compose_file_is_not_set_up() {
        let project = TestProject::new();
        std::fs::remove_file(project.root().join("docker-compose.yml")).unwrap();
        let manager = project.manager(ScriptedPrompter::new());

        let err = manager.start(StartOptions::default()).await.unwrap_err();
        assert_eq!(err.failed_step(), Some(Step::CheckRunning));
        assert!(matches!(err.root(), CoreError::NotSetUp(_)));
    }

    #[tokio::test]
    async fn test_start_up_failure_stops_at_starting() {
        let project = TestProject::new();
        project.compose.fail_up(1, "port is already allocated");
        let manager = project.manager(ScriptedPrompter::new());

        let err = manager.start(StartOptions::default()).await.unwrap_err();
        assert_eq!(err.failed_step(), Some(Step::Starting));
        assert!(err.to_string().contains("port is already allocated"));
        assert!(!project
            .engine
            .get_calls()
            .iter()
            .any(|c| matches!(c, EngineCall::Logs { .. })));
    }

    #[tokio::test]
    async fn test_readiness_error_carries_tail() {
        let project = TestProject::new();
        *project.engine.log_chunks.lock().unwrap() = vec![framed_lines(&[
            "Starting sshd",
            "FATAL: could not bind port 22",
        ])];
        let manager = project.manager(ScriptedPrompter::new());

        let err = manager.start(StartOptions::default()).await.unwrap_err();
        assert_eq!(err.failed_step(), Some(Step::WaitingReady));
        match err.root() {
            CoreError::NotReady { reason, tail } => {
                assert!(matches!(reason, FailureReason::ErrorLine(_)));
                assert_eq!(tail.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.log_tail().len(), 2);
        assert!(known_hosts::find_entries(&project.known_hosts(), "[localhost]:2222")
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_trust_failure_is_a_warning() {
        let project = TestProject::new();
        project.runner.set_keyscan_output(None);
        let manager = project.manager(ScriptedPrompter::new());

        let report = manager.start(StartOptions::default()).await.unwrap();
        assert_eq!(report.outcome, Outcome::Done);
        assert!(!report.trust_established);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.entered(Step::HealthCheck));
    }

    #[tokio::test]
    async fn test_exited_after_start_fails_health_check() {
        let project = TestProject::new();
        project.engine.set_state_after_up(ContainerState::Exited {
            exit_code: 1,
            finished_at: None,
        });
        // The marker was printed before the container died
        let manager = project.manager(ScriptedPrompter::new());

        let err = manager.start(StartOptions::default()).await.unwrap_err();
        assert_eq!(err.failed_step(), Some(Step::HealthCheck));
        assert!(matches!(err.root(), CoreError::Unhealthy(_)));
    }

    #[tokio::test]
    async fn test_liveness_probe_failure_is_a_warning() {
        let project = TestProject::new();
        // authorized_keys install succeeds, the probe does not
        project.engine.push_exec_result(0, "");
        project.engine.push_exec_result(1, "");
        let manager = project.manager(ScriptedPrompter::new());

        let report = manager.start(StartOptions::default()).await.unwrap();
        assert_eq!(report.outcome, Outcome::Done);
        assert!(report.warnings.iter().any(|w| w.contains("Liveness probe")));
    }

    #[tokio::test]
    async fn test_stop_declined_changes_nothing() {
        let project = TestProject::new();
        project.engine.container.lock().unwrap().replace(running_container("devbox"));
        let prompter = ScriptedPrompter::new().confirm_with(false);
        let manager = project.manager(prompter.clone());

        let report = manager.stop(StopOptions::default()).await.unwrap();
        assert_eq!(report.outcome, Outcome::Cancelled);
        assert!(project.engine.mutations().is_empty());
        assert_eq!(prompter.asked().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_force_kills_without_asking() {
        let project = TestProject::new();
        project.engine.container.lock().unwrap().replace(running_container("devbox"));
        let prompter = ScriptedPrompter::new();
        let manager = project.manager(prompter.clone());

        let report = manager.stop(StopOptions { force: true }).await.unwrap();
        assert_eq!(report.outcome, Outcome::Done);
        assert!(prompter.asked().is_empty());
        assert_eq!(
            project.engine.mutations(),
            vec![EngineCall::Stop { name: "devbox".into(), force: true }]
        );
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let project = TestProject::new();
        let manager = project.manager(ScriptedPrompter::new());

        let report = manager.stop(StopOptions::default()).await.unwrap();
        assert_eq!(report.outcome, Outcome::NotRunning);
        assert!(project.engine.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_build_failure_halts_before_starting() {
        let project = TestProject::new();
        project.engine.container.lock().unwrap().replace(running_container("devbox"));
        std::fs::write(
            project.known_hosts(),
            format!("[localhost]:2222 ssh-ed25519 {}\n", MOCK_KEY_B64),
        )
        .unwrap();
        project.compose.fail_build(17, "failed to solve: exit code 100");
        let manager = project.manager(ScriptedPrompter::new().confirm_with(true));

        let err = manager
            .rebuild(RebuildOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(Step::Building));
        assert!(err.to_string().contains("failed to solve: exit code 100"));
        assert_eq!(
            project.compose.get_calls(),
            vec![ComposeCall::Build { no_cache: false }]
        );
        let mutations = project.engine.mutations();
        assert_eq!(
            mutations,
            vec![
                EngineCall::Stop { name: "devbox".into(), force: false },
                EngineCall::Remove { name: "devbox".into(), force: true },
            ]
        );
        assert!(project.engine.current().is_none());
        assert!(known_hosts::find_entries(&project.known_hosts(), "[localhost]:2222")
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_declined_changes_nothing() {
        let project = TestProject::new();
        project.engine.container.lock().unwrap().replace(running_container("devbox"));
        let manager = project.manager(ScriptedPrompter::new().confirm_with(false));

        let report = manager.rebuild(RebuildOptions::default()).await.unwrap();
        assert_eq!(report.outcome, Outcome::Cancelled);
        assert!(project.engine.mutations().is_empty());
        assert!(project.compose.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_full_sequence() {
        let project = TestProject::new();
        project.engine.container.lock().unwrap().replace(running_container("devbox"));
        std::fs::write(project.known_hosts(), "[localhost]:2222 ssh-ed25519 AAAAOLD\n").unwrap();
        let manager = project.manager(ScriptedPrompter::new());

        let report = manager
            .rebuild(RebuildOptions { no_cache: true, force: true })
            .await
            .unwrap();

        assert_eq!(
            report.steps,
            vec![
                Step::CheckRunning,
                Step::Stopping,
                Step::TrustCleanup,
                Step::Removing,
                Step::Building,
                Step::Starting,
                Step::WaitingReady,
                Step::TrustReestablish,
                Step::HealthCheck,
                Step::Done,
            ]
        );
        assert_eq!(project.compose.get_calls()[0], ComposeCall::Build { no_cache: true });
        let entries = known_hosts::find_entries(&project.known_hosts(), "[localhost]:2222").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, MOCK_KEY_B64);
    }

    #[tokio::test]
    async fn test_rebuild_when_absent_skips_stop_and_remove() {
        let project = TestProject::new();
        let manager = project.manager(ScriptedPrompter::new());

        let report = manager.rebuild(RebuildOptions::default()).await.unwrap();
        assert!(!report.entered(Step::ConfirmStop));
        assert!(!report.entered(Step::Stopping));
        assert!(report.entered(Step::TrustCleanup));
        assert!(!project
            .engine
            .mutations()
            .iter()
            .any(|c| matches!(c, EngineCall::Remove { .. } | EngineCall::Stop { .. })));
    }

    #[tokio::test]
    async fn test_engine_unreachable_fails_first_step() {
        let project = TestProject::new();
        project.engine.set_unreachable("socket missing");
        let manager = project.manager(ScriptedPrompter::new());

        let err = manager.start(StartOptions::default()).await.unwrap_err();
        assert_eq!(err.failed_step(), Some(Step::CheckRunning));
        assert!(err.remediation()[0].contains("Start Docker"));
    }

    #[tokio::test]
    async fn test_progress_lines_are_sent() {
        let project = TestProject::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let manager = project.manager(ScriptedPrompter::new()).with_progress(tx);

        manager.start(StartOptions::default()).await.unwrap();
        drop(manager);

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(lines.first().map(String::as_str), Some("Checking container state..."));
        assert!(lines.iter().any(|l| l == "Waiting for container to become ready..."));
    }
}
