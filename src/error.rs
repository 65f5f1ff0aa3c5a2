use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::translate::DialectId;

/// Failures reported by a translation backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected the input (invalid SQL, unsupported construct).
    /// Rendered inline as an `-- ERROR` block rather than propagated.
    #[error("{0}")]
    Sql(String),

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("worker I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("worker did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("worker is not running")]
    NotRunning,
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Protocol(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditorError {
    #[error("unknown dialect `{0}`")]
    UnknownDialect(DialectId),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("debounce delay must be between 300 and 600 ms, got {0} ms")]
    Debounce(u64),
}
