use thiserror::Error;
use varclust_store::{AllocationError, JsonlError, RecoveryError, VariantStoreError};

use crate::config::ConfigError;

/// Failure inside one chunk. Nothing from the chunk is persisted.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] VariantStoreError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("rs{accession} has no clustered variant in {assembly}")]
    ClusteredNotFound { accession: u64, assembly: String },
}

impl EngineError {
    /// The accession counter was busy; the chunk can be tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Allocation(AllocationError::Contention { .. } | AllocationError::Lock(_))
        )
    }
}

/// Failure of a whole clustering job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error("store unavailable for chunk {chunk} after {attempts} attempt(s): {message}")]
    StoreUnavailable {
        chunk: usize,
        attempts: u32,
        message: String,
    },

    #[error("failed to read input at line {line}: {message}")]
    Input { line: usize, message: String },
}
