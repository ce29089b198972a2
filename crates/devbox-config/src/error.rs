//! Error types for configuration loading and validation

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single offending field found during validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path of the field, e.g. `ssh.port`
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config at {path}: {source}")]
    TomlParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to determine home directory")]
    NoHomeDir,

    #[error("Failed to write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Fields that failed validation, if this is a validation error
    pub fn fields(&self) -> &[FieldError] {
        match self {
            ConfigError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
