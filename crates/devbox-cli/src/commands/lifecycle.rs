//! Lifecycle commands: start, stop, rebuild, connect

use anyhow::Result;
use devbox_core::{
    ConnectOptions, DevboxManager, LifecycleReport, Outcome, RebuildOptions, StartOptions,
    StopOptions,
};

use super::{logs, print_warnings, LogsArgs, TimeArg};

/// Start the container; unless `detach`, follow its output afterwards
///
/// Compose always runs detached so the readiness and trust steps can run;
/// following the log stream is what keeps the command attached. Ctrl-C
/// stops following and leaves the container running.
pub async fn start(manager: &DevboxManager, build: bool, detach: bool) -> Result<LifecycleReport> {
    let report = manager.start(StartOptions { build }).await?;
    print_warnings(&report);

    match report.outcome {
        Outcome::AlreadyRunning => {
            println!("Container '{}' is already running", manager.container_name());
        }
        _ => println!("Container '{}' is ready", manager.container_name()),
    }
    print_connect_hint(manager, &report);

    if !detach {
        println!("Following container output; Ctrl-C detaches");
        logs(manager, &attach_args(&report)).await?;
    }
    Ok(report)
}

/// Log request that picks up where start left off
fn attach_args(report: &LifecycleReport) -> LogsArgs {
    let started = report
        .info
        .as_ref()
        .and_then(|info| info.started_at())
        .filter(|_| report.outcome != Outcome::AlreadyRunning);

    match started {
        Some(at) => LogsArgs {
            follow: true,
            since: Some(TimeArg::Absolute(at.timestamp())),
            ..Default::default()
        },
        None => LogsArgs {
            follow: true,
            tail: Some(0),
            ..Default::default()
        },
    }
}

/// Stop the container
pub async fn stop(manager: &DevboxManager, force: bool) -> Result<LifecycleReport> {
    let report = manager.stop(StopOptions { force }).await?;
    print_warnings(&report);

    match report.outcome {
        Outcome::NotRunning => println!("Container '{}' is not running", manager.container_name()),
        Outcome::Cancelled => println!("Cancelled"),
        _ => println!("Stopped '{}'", manager.container_name()),
    }
    Ok(report)
}

/// Destroy and rebuild the container
pub async fn rebuild(manager: &DevboxManager, no_cache: bool, force: bool) -> Result<LifecycleReport> {
    let report = manager.rebuild(RebuildOptions { no_cache, force }).await?;
    print_warnings(&report);

    if report.outcome == Outcome::Cancelled {
        println!("Rebuild cancelled; container left as it was");
        return Ok(report);
    }

    println!("Rebuilt '{}'", manager.container_name());
    print_connect_hint(manager, &report);
    Ok(report)
}

/// Open a shell in the container and return the session's exit code
pub async fn connect(manager: &DevboxManager, mosh: bool, tmux: bool) -> Result<i32> {
    let code = manager.connect(ConnectOptions { mosh, tmux }).await?;
    if code != 0 {
        tracing::debug!("Session exited with code {}", code);
    }
    Ok(code)
}

fn print_connect_hint(manager: &DevboxManager, report: &LifecycleReport) {
    if !report.trust_established && report.outcome != Outcome::AlreadyRunning {
        println!("Host key was not recorded; ssh will ask to confirm it on first connect");
    }
    println!("Connect with: devbox connect");
}
