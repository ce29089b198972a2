//! Docker engine handle using bollard
//!
//! Container queries and mutations go through bollard. Logs are the one
//! exception: bollard hands back already de-multiplexed output, so logs are
//! fetched with a raw HTTP/1.1 request over the engine socket and returned
//! exactly as framed by the engine. That raw path needs a unix socket; an
//! engine reached over TCP reports raw logs as unsupported.

use crate::{
    format_connection_error, ContainerEngine, ContainerInfo, ContainerState, ExecResult,
    LogOptions, LogStream, PortMapping, ProviderError, Result,
};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, KillContainerOptions, RemoveContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::ContainerInspectResponse;
use bollard::Docker;
use futures::StreamExt;
use std::io::Write;
use std::path::Path;

/// Seconds a graceful stop waits before the engine kills the container
const STOP_GRACE_SECS: i64 = 10;

/// Docker engine handle
pub struct DockerEngine {
    client: Docker,
    socket: String,
}

/// Where the engine listens
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    /// Local socket or named pipe path
    Socket(String),
    /// `http://` or `https://` address
    Http(String),
}

impl Endpoint {
    /// Classify a configured socket value; `tcp://` is plain HTTP
    fn parse(socket: &str) -> Self {
        if let Some(rest) = socket.strip_prefix("tcp://") {
            Endpoint::Http(format!("http://{}", rest))
        } else if socket.starts_with("http://") || socket.starts_with("https://") {
            Endpoint::Http(socket.to_string())
        } else {
            Endpoint::Socket(socket.trim_start_matches("unix://").to_string())
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Endpoint::Socket(path) | Endpoint::Http(path) => path,
        }
    }
}

impl DockerEngine {
    /// Connect to the engine at `socket` and verify it answers
    pub async fn connect(socket: &str) -> Result<Self> {
        let endpoint = Endpoint::parse(socket);
        let path = endpoint.as_str();
        let client = match &endpoint {
            Endpoint::Http(addr) => Docker::connect_with_http(addr, 120, bollard::API_DEFAULT_VERSION),
            Endpoint::Socket(path) => {
                Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| unreachable_at(path, &e.to_string()))?;

        client
            .ping()
            .await
            .map_err(|e| unreachable_at(path, &e.to_string()))?;

        tracing::debug!("Connected to container engine at {}", path);
        Ok(Self {
            client,
            socket: path.to_string(),
        })
    }

    /// Get the underlying Docker client
    pub fn client(&self) -> &Docker {
        &self.client
    }

    pub fn socket(&self) -> &str {
        &self.socket
    }
}

fn unreachable_at(socket: &str, underlying: &str) -> ProviderError {
    let socket_exists = Path::new(socket).exists();
    ProviderError::EngineUnreachable(format_connection_error(socket, socket_exists, underlying))
}

/// Turn "already in that state" answers into success
fn tolerate(result: std::result::Result<(), bollard::errors::Error>, codes: &[u16]) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError { status_code, message })
            if codes.contains(&status_code) =>
        {
            tracing::debug!("Ignoring engine response {}: {}", status_code, message);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn container_info(info: ContainerInspectResponse) -> ContainerInfo {
    let state = info.state.as_ref();
    let status = state
        .and_then(|s| s.status)
        .map(|s| format!("{:?}", s).to_lowercase())
        .unwrap_or_default();

    let state = ContainerState::from_engine(
        &status,
        state.and_then(|s| s.exit_code),
        state.and_then(|s| s.started_at.as_deref()),
        state.and_then(|s| s.finished_at.as_deref()),
    );

    let mut ports = Vec::new();
    if let Some(port_map) = info.network_settings.as_ref().and_then(|n| n.ports.as_ref()) {
        for (container_port, bindings) in port_map {
            let (port, protocol) = container_port
                .split_once('/')
                .unwrap_or((container_port.as_str(), "tcp"));
            let Ok(port) = port.parse::<u16>() else {
                continue;
            };

            match bindings {
                Some(bindings) if !bindings.is_empty() => {
                    for binding in bindings {
                        ports.push(PortMapping {
                            container_port: port,
                            host_port: binding.host_port.as_ref().and_then(|p| p.parse().ok()),
                            protocol: protocol.to_string(),
                        });
                    }
                }
                _ => ports.push(PortMapping {
                    container_port: port,
                    host_port: None,
                    protocol: protocol.to_string(),
                }),
            }
        }
    }
    ports.sort_by_key(|p| (p.container_port, p.host_port));
    ports.dedup();

    ContainerInfo {
        id: info.id.unwrap_or_default(),
        name: info
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        state,
        ports,
        created_at: info.created.as_deref().and_then(crate::parse_engine_time),
        tty: info.config.and_then(|c| c.tty).unwrap_or(false),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn find(&self, name: &str) -> Result<Option<ContainerInfo>> {
        match self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(Some(container_info(info))),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_running(&self, name: &str) -> bool {
        match self.find(name).await {
            Ok(info) => info.map(|c| c.is_running()).unwrap_or(false),
            Err(e) => {
                tracing::debug!("Could not query container {}: {}", name, e);
                false
            }
        }
    }

    async fn stop(&self, name: &str, force: bool) -> Result<()> {
        match self.find(name).await? {
            Some(info) if info.is_running() => {}
            Some(_) => {
                tracing::debug!("Container {} is not running, nothing to stop", name);
                return Ok(());
            }
            None => {
                tracing::debug!("Container {} does not exist, nothing to stop", name);
                return Ok(());
            }
        }

        if force {
            tracing::info!("Killing container {}", name);
            let result = self
                .client
                .kill_container(name, Some(KillContainerOptions { signal: "SIGKILL" }))
                .await;
            // 409: it stopped on its own in between
            tolerate(result, &[404, 409])
        } else {
            tracing::info!("Stopping container {}", name);
            let result = self
                .client
                .stop_container(name, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
                .await;
            tolerate(result, &[304, 404])
        }
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: false,
            ..Default::default()
        };
        let result = self.client.remove_container(name, Some(options)).await;
        // 409: removal already in progress
        tolerate(result, &[404, 409])
    }

    async fn exec_one_shot(
        &self,
        name: &str,
        argv: &[String],
        user: Option<&str>,
    ) -> Result<ExecResult> {
        let options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            user: user.map(str::to_string),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(name, options)
            .await
            .map_err(|e| match ProviderError::from(e) {
                ProviderError::RuntimeError(msg) => ProviderError::ExecError(msg),
                other => other,
            })?;

        let start_options = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let mut output = String::new();
        if let StartExecResults::Attached { output: mut stream, .. } = self
            .client
            .start_exec(&exec.id, Some(start_options))
            .await?
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bollard::container::LogOutput::StdOut { message })
                    | Ok(bollard::container::LogOutput::StdErr { message })
                    | Ok(bollard::container::LogOutput::Console { message }) => {
                        output.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(ProviderError::ExecError(e.to_string())),
                }
            }
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        Ok(ExecResult {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output,
        })
    }

    async fn logs(&self, name: &str, options: &LogOptions) -> Result<LogStream> {
        match Endpoint::parse(&self.socket) {
            Endpoint::Socket(path) => raw_logs(&path, name, options).await,
            Endpoint::Http(addr) => Err(ProviderError::Unsupported(format!(
                "raw log streaming requires a unix socket engine connection, not {}",
                addr
            ))),
        }
    }

    async fn copy_into(&self, name: &str, src: &Path, dest: &str) -> Result<()> {
        let tar_data = create_tar_from_path(src)?;

        let options = UploadToContainerOptions {
            path: dest,
            ..Default::default()
        };

        self.client
            .upload_to_container(name, Some(options), tar_data.into())
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| unreachable_at(&self.socket, &e.to_string()))?;
        Ok(())
    }
}

/// Aborts the HTTP connection task once the log stream is dropped
struct ConnectionGuard(tokio::task::JoinHandle<()>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(unix)]
async fn raw_logs(socket: &str, name: &str, options: &LogOptions) -> Result<LogStream> {
    use bytes::Bytes;
    use http_body_util::{BodyExt, Empty};
    use hyper::{Method, Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(socket)
        .await
        .map_err(|e| unreachable_at(socket, &e.to_string()))?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| unreachable_at(socket, &e.to_string()))?;

    let guard = ConnectionGuard(tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("Log stream connection closed: {}", e);
        }
    }));

    let request = Request::builder()
        .method(Method::GET)
        .uri(format!(
            "http://localhost/containers/{}/logs?{}",
            name,
            options.query()
        ))
        .header("Host", "localhost")
        .body(Empty::<Bytes>::new())
        .map_err(|e| ProviderError::RuntimeError(e.to_string()))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| unreachable_at(socket, &e.to_string()))?;

    match response.status() {
        StatusCode::NOT_FOUND => return Err(ProviderError::ContainerNotFound(name.to_string())),
        status if !status.is_success() => {
            let body = response
                .into_body()
                .collect()
                .await
                .map(|b| String::from_utf8_lossy(&b.to_bytes()).trim().to_string())
                .unwrap_or_default();
            return Err(ProviderError::RuntimeError(format!(
                "log request failed with {}: {}",
                status, body
            )));
        }
        _ => {}
    }

    let body = response.into_body();
    let stream = futures::stream::unfold(Some((body, guard)), |state| async move {
        let (mut body, guard) = state?;
        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            return Some((Ok(data), Some((body, guard))));
                        }
                    }
                }
                Some(Err(e)) => {
                    return Some((
                        Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
                        None,
                    ));
                }
                None => return None,
            }
        }
    });

    Ok(Box::pin(stream))
}

#[cfg(not(unix))]
async fn raw_logs(_socket: &str, _name: &str, _options: &LogOptions) -> Result<LogStream> {
    Err(ProviderError::Unsupported(
        "raw log streaming requires a unix socket engine connection".to_string(),
    ))
}

/// Recursively add directory contents to tar
fn add_dir_to_tar<W: Write>(
    builder: &mut tar::Builder<W>,
    base: &Path,
    prefix: &Path,
) -> Result<()> {
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        let name = prefix.join(entry.file_name());

        if path.is_dir() {
            builder.append_dir(&name, &path)?;
            add_dir_to_tar(builder, &path, &name)?;
        } else if path.is_file() {
            builder.append_path_with_name(&path, &name)?;
        }
    }

    Ok(())
}

/// Tar a file or directory so it lands under the upload destination
fn create_tar_from_path(path: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    if path.is_file() {
        let name = path.file_name().ok_or_else(|| {
            ProviderError::RuntimeError(format!("{} has no file name", path.display()))
        })?;
        builder.append_path_with_name(path, name)?;
    } else if path.is_dir() {
        add_dir_to_tar(&mut builder, path, Path::new(""))?;
    } else {
        return Err(ProviderError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }

    Ok(builder.into_inner()?)
}
