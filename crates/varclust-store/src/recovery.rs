//! Recovery of accession blocks abandoned by crashed workers.
//!
//! A block reserved but never committed or released is either partially
//! used (something persisted an accession from it) or untouched. The first
//! kind is committed retroactively, the second released. The counter is
//! never rolled back, so a released range is simply lost.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::allocator::{AccessionAllocator, AllocationError};
use crate::lock::{FileLockGuard, LockError, RetryPolicy};
use crate::variant::AccessionCategory;
use crate::{VariantStore, VariantStoreError};

pub const DEFAULT_RECOVERY_CUTOFF_DAYS: i64 = 7;
/// Longest cutoff a job configuration may ask for (a century).
pub const MAX_RECOVERY_CUTOFF_DAYS: i64 = 36_500;

/// Answers whether any accession of a range has been persisted.
pub trait AccessionLookup: Send + Sync {
    fn has_accessions_in(
        &self,
        category: AccessionCategory,
        range: Range<u64>,
    ) -> Result<bool, VariantStoreError>;
}

impl AccessionLookup for VariantStore {
    fn has_accessions_in(
        &self,
        category: AccessionCategory,
        range: Range<u64>,
    ) -> Result<bool, VariantStoreError> {
        Ok(VariantStore::has_accessions_in(self, category, range))
    }
}

/// Lookup that reloads a store directory on every query.
#[derive(Debug, Clone)]
pub struct VariantStoreDir(pub PathBuf);

impl AccessionLookup for VariantStoreDir {
    fn has_accessions_in(
        &self,
        category: AccessionCategory,
        range: Range<u64>,
    ) -> Result<bool, VariantStoreError> {
        let store = VariantStore::load_dir(&self.0)?;
        Ok(store.has_accessions_in(category, range))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Scanning,
    Reconciling,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub category: AccessionCategory,
    pub scanned: usize,
    pub committed: usize,
    pub released: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Store(#[from] VariantStoreError),

    #[error("{0} recovery already running in this process")]
    AlreadyRunning(AccessionCategory),

    #[error(transparent)]
    Lock(#[from] LockError),
}

pub struct RecoveryAgent {
    allocator: Arc<dyn AccessionAllocator>,
    lookup: Arc<dyn AccessionLookup>,
    cutoff: Duration,
    lock_dir: Option<PathBuf>,
    lock_retry: RetryPolicy,
    running: Mutex<BTreeSet<AccessionCategory>>,
}

impl RecoveryAgent {
    pub fn new(allocator: Arc<dyn AccessionAllocator>, lookup: Arc<dyn AccessionLookup>) -> Self {
        Self {
            allocator,
            lookup,
            cutoff: Duration::days(DEFAULT_RECOVERY_CUTOFF_DAYS),
            lock_dir: None,
            lock_retry: RetryPolicy::default(),
            running: Mutex::new(BTreeSet::new()),
        }
    }

    /// Age a block must exceed before it is considered abandoned.
    pub fn with_cutoff(mut self, cutoff: Duration) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Serialize runs across processes with `recovery-<category>.lock` in `dir`.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        self.lock_dir = Some(dir.into());
        self.lock_retry = retry;
        self
    }

    pub fn run(&self, category: AccessionCategory) -> Result<RecoveryReport, RecoveryError> {
        self.run_at(category, Utc::now())
    }

    pub fn run_all(&self) -> Result<Vec<RecoveryReport>, RecoveryError> {
        AccessionCategory::ALL
            .iter()
            .map(|category| self.run(*category))
            .collect()
    }

    /// Recover `category` as if the current time were `now`.
    pub fn run_at(
        &self,
        category: AccessionCategory,
        now: DateTime<Utc>,
    ) -> Result<RecoveryReport, RecoveryError> {
        let _running = RunningGuard::enter(&self.running, category)?;
        let _lock = match &self.lock_dir {
            Some(dir) => Some(FileLockGuard::acquire_with_retry(
                &dir.join(format!("recovery-{}.lock", category.file_token())),
                &self.lock_retry,
            )?),
            None => None,
        };

        let mut state = RecoveryState::Scanning;
        let mut report = RecoveryReport {
            category,
            scanned: 0,
            committed: 0,
            released: 0,
        };
        let mut abandoned = Vec::new();

        loop {
            state = match state {
                RecoveryState::Scanning => {
                    // A cutoff reaching before the representable past
                    // matches no block.
                    let horizon = now
                        .checked_sub_signed(self.cutoff)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC);
                    abandoned = self.allocator.open_blocks_before(category, horizon)?;
                    report.scanned = abandoned.len();
                    RecoveryState::Reconciling
                }
                RecoveryState::Reconciling => {
                    for block in &abandoned {
                        if self.lookup.has_accessions_in(category, block.range())? {
                            self.allocator.commit(block)?;
                            report.committed += 1;
                            tracing::info!(
                                category = %category,
                                start = block.start,
                                end = block.end,
                                "committed partially used block"
                            );
                        } else {
                            self.allocator.release(block)?;
                            report.released += 1;
                            tracing::info!(
                                category = %category,
                                start = block.start,
                                end = block.end,
                                "released unused block"
                            );
                        }
                    }
                    RecoveryState::Done
                }
                RecoveryState::Done => break,
            };
        }

        tracing::info!(
            category = %category,
            scanned = report.scanned,
            committed = report.committed,
            released = report.released,
            "recovery finished"
        );
        Ok(report)
    }
}

struct RunningGuard<'a> {
    running: &'a Mutex<BTreeSet<AccessionCategory>>,
    category: AccessionCategory,
}

impl<'a> RunningGuard<'a> {
    fn enter(
        running: &'a Mutex<BTreeSet<AccessionCategory>>,
        category: AccessionCategory,
    ) -> Result<Self, RecoveryError> {
        let mut set = running.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(category) {
            return Err(RecoveryError::AlreadyRunning(category));
        }
        Ok(Self { running, category })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.running.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.category);
    }
}
