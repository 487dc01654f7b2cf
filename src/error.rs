use std::time::Duration;

use thiserror::Error;

use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("{service} temporarily unavailable: {message}")]
    Transient { service: String, message: String },

    #[error("{service} reported a failure: {message}")]
    Service { service: String, message: String },

    #[error("Invalid input: {0}")]
    LocalInput(String),

    #[error("{tool} failed: {message}")]
    Process { tool: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Home directory not found")]
    NoHomeDir,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{service} still failing after {attempts} attempts")]
    RetriesExhausted { service: String, attempts: u32 },

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task already running: {0}")]
    TaskAlreadyRunning(TaskId),

    #[error("Another task is running: {0}")]
    QueueBusy(TaskId),

    #[error("No task is currently running")]
    NoRunningTask,

    #[error("{phase} phase failed for {failed} of {total} units: {first}")]
    PhaseFailed {
        phase: String,
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },
}

impl Error {
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transient {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn process(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Process {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Network and remote-service errors that are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Transient { .. })
    }

    /// Failures attributable to the remote provider rather than local state.
    /// These count towards provider failover.
    pub fn is_remote(&self) -> bool {
        self.is_transient()
            || matches!(
                self,
                Error::Service { .. } | Error::Base64(_) | Error::Json(_)
            )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
