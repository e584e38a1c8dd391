//! Error taxonomy for the workload engine
//!
//! Storage errors are split into transient failures (logged, counted, the
//! batch continues) and structural failures (the worker aborts and the run
//! fails fast).

use thiserror::Error;

use crate::config::WorkloadClass;

/// Errors surfaced by a storage client
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("temporary failure: {0}")]
    TemporaryFailure(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported backend: {0}")]
    Unsupported(String),
}

impl StoreError {
    /// Transient errors are counted as failed operations; everything else
    /// aborts the worker.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_)
                | StoreError::Timeout(_)
                | StoreError::TemporaryFailure(_)
                | StoreError::NotFound(_)
        )
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A worker's unrecoverable exit
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Could not connect to the target before the first batch
    #[error("startup failed: {0}")]
    Startup(#[source] StoreError),

    /// A non-transient error during the run
    #[error("fatal operation error: {0}")]
    Fatal(#[source] StoreError),

    /// The worker task panicked or was aborted
    #[error("worker task terminated abnormally: {0}")]
    Aborted(String),
}

/// Fail-fast outcome of a run: names the failing class and shard
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{class}-{sid} failed: {source}")]
    WorkerFailed {
        class: WorkloadClass,
        sid: usize,
        #[source]
        source: WorkerError,
    },
}
