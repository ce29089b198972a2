//! Management commands: status, logs, cleanup, setup, sync

use super::TimeArg;
use anyhow::{Context, Result};
use devbox_config::{DevboxConfig, EditorKind, ProjectPaths};
use devbox_core::readiness::{forward_logs, StreamKind};
use devbox_core::setup::{run_setup, SetupOutcome};
use devbox_core::{CleanupOptions, CleanupReport, DevboxManager, Prompter, StatusReport, SyncOptions};
use devbox_provider::{LogOptions, ProcessRunner};
use std::io::Write;
use std::sync::Arc;

/// Show container, key and trust state
pub async fn status(manager: &DevboxManager, json: bool, verbose: bool) -> Result<StatusReport> {
    let report = manager.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report);
    }

    println!("Container: {}", report.name);
    match &report.state {
        Some(state) => println!("State:     {}", state),
        None => println!("State:     not created"),
    }
    if let Some(id) = &report.id {
        println!("ID:        {}", id);
    }
    if !report.ports.is_empty() {
        let ports: Vec<String> = report.ports.iter().map(|p| p.to_string()).collect();
        println!("Ports:     {}", ports.join(", "));
    }
    if let Some(created) = report.created_at {
        println!("Created:   {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    println!();
    println!("SSH:       {}", report.ssh.command_line());
    println!(
        "Key:       {}",
        if report.key_present { "present" } else { "missing (created by `devbox start`)" }
    );
    println!(
        "Host key:  {}",
        if report.known_host_entry { "trusted" } else { "not recorded" }
    );

    if verbose {
        if let Some(fp) = &report.key_fingerprint {
            println!("Key fingerprint: {}", fp);
        }
        println!("Key file:        {}", report.ssh.key_path.display());
        println!("Known hosts:     {}", manager.ssh().known_hosts_path().display());
        println!("Project:         {}", report.project_dir.display());
    }

    Ok(report)
}

/// Arguments of `devbox logs`
#[derive(Debug, Clone, Default)]
pub struct LogsArgs {
    pub follow: bool,
    pub tail: Option<u64>,
    pub timestamps: bool,
    pub since: Option<TimeArg>,
    pub until: Option<TimeArg>,
}

impl LogsArgs {
    pub fn to_options(&self) -> LogOptions {
        let now = chrono::Utc::now();
        LogOptions {
            follow: self.follow,
            tail: self.tail,
            timestamps: self.timestamps,
            since: self.since.map(|t| t.resolve(now)),
            until: self.until.map(|t| t.resolve(now)),
        }
    }
}

/// Stream container logs until they end or Ctrl-C
pub async fn logs(manager: &DevboxManager, args: &LogsArgs) -> Result<()> {
    let (stream, mode) = manager.logs(&args.to_options()).await?;

    let forward = forward_logs(stream, mode, |kind, payload| match kind {
        StreamKind::Stderr => {
            let mut err = std::io::stderr().lock();
            err.write_all(payload)?;
            err.flush()
        }
        _ => {
            let mut out = std::io::stdout().lock();
            out.write_all(payload)?;
            out.flush()
        }
    });

    tokio::select! {
        result = forward => result.context("Failed to read container logs")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::debug!("Interrupted");
        }
    }
    Ok(())
}

/// Remove what devbox created, after showing the plan
pub async fn cleanup(manager: &DevboxManager, options: CleanupOptions) -> Result<CleanupReport> {
    let report = manager.cleanup(options).await?;

    if report.planned.is_empty() {
        println!("Nothing to clean up");
        return Ok(report);
    }

    if report.dry_run {
        println!("Would:");
        for action in &report.planned {
            println!("  - {}", action);
        }
        return Ok(report);
    }

    if report.cancelled {
        println!("Cancelled");
        return Ok(report);
    }

    for result in &report.results {
        match &result.error {
            None => println!("  ✓ {}", result.action),
            Some(e) => println!("  ✗ {}: {}", result.action, e),
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        eprintln!("Warning: {} cleanup action(s) failed", failed);
    }
    Ok(report)
}

/// Interactive project setup
pub async fn setup(
    config: DevboxConfig,
    paths: &ProjectPaths,
    prompter: &dyn Prompter,
    runner: Arc<dyn ProcessRunner>,
) -> Result<SetupOutcome> {
    let outcome = run_setup(config, paths, prompter, runner).await?;

    println!();
    println!("Saved {}", paths.config_file().display());
    println!("Container key: {}", outcome.container_key.public_path.display());
    if outcome.token_saved {
        println!("GitHub token saved to {}", paths.env_file().display());
    }

    if let Some(key) = &outcome.github_key {
        println!();
        println!("Add this public key to GitHub (Settings > SSH and GPG keys > New SSH key):");
        println!();
        println!("{}", key.public_key.trim_end());
        println!();
    }

    println!("Next: devbox start --build");
    Ok(outcome)
}

/// Push editor settings into the container, or import them on the host
pub async fn sync(manager: &DevboxManager, editor: Option<EditorKind>, import: bool) -> Result<()> {
    let options = SyncOptions { import, editor };
    let editor = manager.sync_kind(&options).profile().display_name;
    let summary = manager.sync_editor(options).await?;

    for warning in &summary.warnings {
        eprintln!("Warning: {}", warning);
    }

    if import {
        println!(
            "Imported {} settings ({} file(s), {} extension(s) installed)",
            editor,
            summary.copied.len(),
            summary.installed.len()
        );
    } else {
        println!(
            "Synced {} settings into '{}' ({} file(s), {} extension(s) listed)",
            editor,
            manager.container_name(),
            summary.copied.len(),
            summary.extensions
        );
    }
    Ok(())
}
