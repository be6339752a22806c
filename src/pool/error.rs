//! Worker pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned to callers of `WorkerPool::run`.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker {worker} timed out after {after:?}")]
    Timeout { worker: usize, after: Duration },

    #[error("worker {worker} failed: {source}")]
    WorkerFailed { worker: usize, source: anyhow::Error },

    #[error("worker {worker} unavailable: {reason}")]
    WorkerUnavailable { worker: usize, reason: String },

    #[error("worker pool is shut down")]
    ShutDown,
}

pub type PoolResult<T> = Result<T, PoolError>;
