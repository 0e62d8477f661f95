use thiserror::Error;

/// Errors surfaced by the execution subsystem.
///
/// Worker-side failures never cross the process boundary as raw errors; the
/// worker converts them into failure responses, and the supervisor folds those
/// into [`ExecError::WorkerExecution`] so callers have one thing to catch.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The resolved configuration is missing or structurally invalid.
    /// Raised before any model resource is allocated; a caller bug, never
    /// retried automatically.
    #[error("invalid model configuration: {reason}")]
    Configuration { reason: String },

    /// The decision algorithm or hydration step failed inside the worker.
    /// Carries the worker-reported message and trace.
    #[error("worker execution failed: {message}")]
    WorkerExecution { message: String },

    /// The worker process exited or was killed while a request was
    /// outstanding.
    #[error("worker process died before responding")]
    WorkerDied,

    /// The channel to the worker is gone (writer task ended, stdin closed).
    #[error("worker link closed: {reason}")]
    LinkClosed { reason: String },

    /// The worker child process could not be spawned or wired up.
    #[error("failed to start worker process: {reason}")]
    Spawn { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExecError>;
