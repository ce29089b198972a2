//! External process execution
//!
//! Everything devbox shells out to (`docker compose`, `ssh-keygen`,
//! `ssh-keyscan`, `ssh`, editor launchers) goes through a [`ProcessRunner`],
//! so orchestration code can be driven by a scripted runner in tests.

use crate::{ProviderError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Description of one external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// Tee captured lines to our stderr while capturing
    pub echo: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Shell-like rendering for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part)
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }

    fn launch_error(&self, e: std::io::Error) -> ProviderError {
        let reason = if e.kind() == std::io::ErrorKind::NotFound {
            "not found on PATH".to_string()
        } else {
            e.to_string()
        };
        ProviderError::LaunchFailed {
            program: self.program.clone(),
            reason,
        }
    }
}

/// Captured result of a finished process; non-zero exits are not errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Trimmed stderr, falling back to stdout when stderr is empty
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs external programs
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run with captured output
    ///
    /// Fails only when the program cannot be launched or the timeout elapses.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run attached to the user's terminal and return the exit code
    async fn run_interactive(&self, spec: &CommandSpec) -> Result<i32>;

    /// Whether `program` resolves through PATH
    fn command_exists(&self, program: &str) -> bool;
}

/// [`ProcessRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    async fn run_to_end(spec: &CommandSpec) -> Result<CommandOutput> {
        let mut cmd = spec.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| spec.launch_error(e))?;

        // Both pipes are drained concurrently so a full stderr pipe can't stall the child
        let stdout = child.stdout.take().map(|s| tokio::spawn(read_stream(s, spec.echo)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_stream(s, spec.echo)));

        let status = child.wait().await?;
        let stdout = join_reader(stdout).await?;
        let stderr = join_reader(stderr).await?;

        Ok(CommandOutput {
            success: status.success(),
            stdout,
            stderr,
            exit_code: exit_code(status),
        })
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!("Running: {}", spec.display());

        let output = match spec.timeout {
            // Dropping the future drops the child, which kills it
            Some(limit) => tokio::time::timeout(limit, Self::run_to_end(spec))
                .await
                .map_err(|_| ProviderError::Timeout(limit))??,
            None => Self::run_to_end(spec).await?,
        };

        if !output.success {
            tracing::debug!(
                "{} exited with {}: {}",
                spec.program,
                output.exit_code,
                output.error_text()
            );
        }
        Ok(output)
    }

    async fn run_interactive(&self, spec: &CommandSpec) -> Result<i32> {
        tracing::debug!("Running interactively: {}", spec.display());

        let mut cmd = spec.command();
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| spec.launch_error(e))?;

        // The child shares our process group and receives Ctrl-C itself; keep
        // waiting so it can restore the terminal before we exit.
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::debug!("Interrupt received, waiting for {} to exit", spec.program);
                }
            }
        };

        Ok(exit_code(status))
    }

    fn command_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

async fn read_stream<R>(stream: R, echo: bool) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut out = String::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        if echo {
            eprint!("{}", text);
        }
        out.push_str(&text);
    }

    Ok(out)
}

async fn join_reader(
    task: Option<tokio::task::JoinHandle<std::io::Result<String>>>,
) -> Result<String> {
    match task {
        Some(handle) => handle
            .await
            .map_err(|e| ProviderError::RuntimeError(e.to_string()))?
            .map_err(ProviderError::from),
        None => Ok(String::new()),
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
