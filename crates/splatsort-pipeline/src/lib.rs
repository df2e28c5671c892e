//! Asynchronous sort scheduling, buffering and handoff

pub mod config;
pub mod error;
pub mod handoff;
pub mod pool;
pub mod scheduler;
pub mod store;

pub use config::{BoundsMode, InteractionTuning, SortConfig, SortStrategy};
pub use error::{PipelineError, PipelineResult, PoolError};
pub use handoff::{ActiveIndices, IndexHandoff};
pub use pool::BufferPool;
pub use scheduler::{SortObserver, SortScheduler, SortStats};
pub use store::ElementStore;
