//! # varclust-store
//!
//! Memory layer for submitted and clustered variant state.
//!
//! This crate provides:
//! - `SubmittedVariant` / `ClusteredVariant` records and the append-only
//!   `VariantOperation` log
//! - JSONL read/write with atomic snapshot replacement
//! - `VariantStore` (canonical in-memory state) and lock-scoped mutation
//! - accession block allocation and recovery of abandoned blocks
//!
//! Clustering decisions live in `varclust-engine`.
//!
//! ## Data model
//!
//! ```text
//! JSONL (on disk: SS, RS, operations)
//!     ↕  load_dir / save_dir
//! VariantStore (deterministic in-memory projection)
//!
//! accession_counters.json + accession_blocks.jsonl
//!     ↕  reserve / commit / release
//! BlockLedger
//! ```

pub mod allocator;
pub mod atomic_store;
pub mod jsonl;
pub mod lock;
pub mod memory;
pub mod operation;
pub mod recovery;
pub mod variant;

pub use allocator::{
    AccessionAllocator, AccessionBlock, AllocationError, BLOCKS_FILE, BLOCKS_LOCK_FILE,
    BlockLedger, COUNTERS_FILE, CompactedBlocks, DEFAULT_CLOSED_BLOCK_HISTORY,
    DEFAULT_INITIAL_ACCESSION, InMemoryBlockAllocator, JsonlBlockAllocator,
    committed_ranges_disjoint,
};
pub use atomic_store::{
    AtomicStoreMutationError, STORE_LOCK_FILE, mutate_store_dir, store_lock_path,
};
pub use jsonl::JsonlError;
pub use lock::{FileLockGuard, LockError, RetryPolicy};
pub use memory::{
    CLUSTERED_FILE, OPERATIONS_FILE, SUBMITTED_FILE, VariantStore, VariantStoreError,
};
pub use operation::{EventType, InactiveObject, OPERATION_ID_PREFIX, VariantOperation};
pub use recovery::{
    AccessionLookup, DEFAULT_RECOVERY_CUTOFF_DAYS, MAX_RECOVERY_CUTOFF_DAYS, RecoveryAgent, RecoveryError, RecoveryReport,
    RecoveryState, VariantStoreDir,
};
pub use variant::{
    AccessionCategory, ClusteredVariant, SubmittedFlags, SubmittedVariant, SubmittedVariantInput,
};
