//! Error types for netbuffer-ctl.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Problems with the service descriptor. Raised before any backend call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read descriptor {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed descriptor {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failures reported by the orchestration backend.
///
/// Messages carry the runtime's own diagnostic output untouched.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("build failed: {0}")]
    Build(String),

    #[error("start failed: {0}")]
    Start(String),

    #[error("stop failed: {0}")]
    Stop(String),

    #[error("no container found for service {0}")]
    NotFound(String),

    #[error("restart failed: {0}")]
    Restart(String),

    #[error("service {0} is not running")]
    NotRunning(String),

    #[error("prune failed: {0}")]
    Prune(String),

    #[error("status query failed: {0}")]
    Status(String),

    #[error("failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },
}

impl BackendError {
    /// Whether the failure aborts the invocation rather than being reported
    /// as a non-fatal outcome.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BackendError::Stop(_)
                | BackendError::NotFound(_)
                | BackendError::Prune(_)
                | BackendError::Status(_)
        )
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackendError::Stop(_) => 3,
            BackendError::NotFound(_) => 4,
            BackendError::NotRunning(_) => 5,
            _ => 1,
        }
    }
}

/// Top-level error for a single invocation.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot write compose project files in {path}: {source}")]
    Recipe { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            // EX_CONFIG
            Error::Config(_) => 78,
            Error::Recipe { .. } => 1,
            Error::Backend(e) => e.exit_code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
