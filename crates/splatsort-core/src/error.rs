//! Error types for the sort engine

use std::collections::TryReserveError;
use thiserror::Error;

/// Result type for sort operations
pub type SortResult<T> = Result<T, SortError>;

/// Errors that can occur while running a sort
#[derive(Error, Debug)]
pub enum SortError {
    /// A scratch or output buffer could not grow to the required capacity.
    /// Recoverable: the caller aborts the current sort and keeps whatever
    /// result it last published.
    #[error("buffer allocation failed for {capacity} elements: {source}")]
    Allocation {
        capacity: usize,
        source: TryReserveError,
    },

    #[error("bin budget {got} is below the minimum of {min}")]
    BinBudgetTooSmall { got: usize, min: usize },
}

impl SortError {
    pub(crate) fn allocation(capacity: usize, source: TryReserveError) -> Self {
        Self::Allocation { capacity, source }
    }
}
