use thiserror::Error;
use tokio::task::JoinError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// gdb answered `^error,msg="..."`. Surfaced to the client as the DAP
    /// error response; never fatal for the session.
    #[error("{0}")]
    Mi(String),

    /// The MI stream produced something we could not interpret (bad record,
    /// unexpected result class). The command fails, the session continues.
    #[error("MI protocol error: {0}")]
    MiProtocol(String),

    /// gdb could not be launched or came up without stdio. Fatal.
    #[error("Failed to spawn gdb: {0}")]
    Spawn(String),

    /// A command was submitted after gdb exited.
    #[error("gdb is no longer running")]
    Disconnected,

    /// DAP-side misuse: missing frameId, malformed custom payload, a request
    /// that is invalid in the current run state.
    #[error("{0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse int error: {0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("Parse Json error: {0}")]
    ParseJsonError(#[from] serde_json::error::Error),

    #[error("Anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] JoinError),
}

/// Application result type
pub type AppResult<T> = Result<T, AppError>;
