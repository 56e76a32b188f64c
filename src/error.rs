//! Typed error vocabulary for the boundary between the job pipeline and the
//! coordinator/origin clients. Internal helpers still propagate `anyhow::Error`;
//! these variants exist because callers branch on *which* kind occurred.

use thiserror::Error;

/// Errors the [`crate::coordinator::CoordinatorClient`] surfaces to callers.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("coordinator unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("coordinator rejected worker key (status {status})")]
    Auth { status: u16 },

    #[error("coordinator reports job gone (410)")]
    Gone,

    #[error("coordinator returned unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Errors that can terminate a job pipeline run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("origin error: {0}")]
    Origin(String),

    #[error("encoder exited with non-zero status: {0}")]
    Encode(String),

    #[error("job cancelled by coordinator")]
    CancelledLocally,

    #[error("worker shutting down")]
    ShutdownPoison,
}

impl From<CoordinatorError> for JobError {
    fn from(err: CoordinatorError) -> Self {
        JobError::Origin(err.to_string())
    }
}

/// Errors raised while loading [`crate::config::WorkerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("WORKER_KEY is required but was not set")]
    MissingWorkerKey,

    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}
