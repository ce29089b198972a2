//! Error types for the engine, compose and process layers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// The engine daemon itself is not reachable; blocks every later step
    #[error("Container engine is not running or not reachable: {0}")]
    EngineUnreachable(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// The external program could not be started at all
    #[error("Failed to launch '{program}': {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("Exec failed: {0}")]
    ExecError(String),

    #[error("Container engine error: {0}")]
    RuntimeError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn is_engine_unreachable(&self) -> bool {
        matches!(self, ProviderError::EngineUnreachable(_))
    }
}

impl From<bollard::errors::Error> for ProviderError {
    fn from(e: bollard::errors::Error) -> Self {
        use bollard::errors::Error as E;
        match e {
            E::DockerResponseServerError {
                status_code: 404,
                message,
            } => ProviderError::ContainerNotFound(message),
            E::DockerResponseServerError {
                status_code,
                message,
            } => ProviderError::RuntimeError(format!("{} (status {})", message, status_code)),
            E::JsonDataError { .. } | E::JsonSerdeError { .. } => {
                ProviderError::RuntimeError(e.to_string())
            }
            // Transport-level failures mean the daemon itself is unavailable
            other => ProviderError::EngineUnreachable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
