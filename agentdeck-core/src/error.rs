//! Error types for agentdeck-core

use thiserror::Error;

/// Main error type for the agentdeck-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Session not found in the repository
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    /// Agent executable is not installed or not on PATH
    #[error("agent executable not found: {0}")]
    ExecutableNotFound(String),

    /// Subprocess could not be spawned
    #[error("failed to spawn agent process: {0}")]
    Spawn(std::io::Error),

    /// Fork subprocess exited with a nonzero status
    #[error("fork process exited with status {code:?}")]
    Fork { code: Option<i32> },

    /// Filesystem watcher error
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Controller supervisor is no longer running
    #[error("process controller is shut down")]
    ControllerClosed,
}

/// Result type alias for agentdeck-core
pub type Result<T> = std::result::Result<T, Error>;
