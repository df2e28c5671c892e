//! Error types for the sort pipeline

use splatsort_core::SortError;
use std::collections::TryReserveError;
use thiserror::Error;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors from the buffer pool
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool allocation of {capacity} elements failed: {source}")]
    Allocation {
        capacity: usize,
        source: TryReserveError,
    },
}

/// Errors that can abort a sort job.
///
/// All of these are recoverable: the job is dropped, the previously
/// published order stays valid, and the next resort request retries.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("output buffer acquisition failed: {0}")]
    Pool(#[from] PoolError),

    #[error("sort engine failed: {0}")]
    Sort(#[from] SortError),
}
