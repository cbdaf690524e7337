//! Accession block allocation.
//!
//! Each category (RS, SS) has one counter: the next never-reserved value.
//! `reserve` compares the counter against the ledger and advances it by the
//! block size in one lock-scoped step, so ranges handed to concurrent
//! workers never overlap. The counter only moves forward; a released range
//! is abandoned, never reissued.
//!
//! Closed blocks are only history. Beyond a per-category window they are
//! folded into totals on the counter document, which keeps the block ledger
//! (rewritten on every mutation) proportional to the open blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::jsonl::{
    JsonlError, read_json_from_path, read_records_from_path, write_json_to_path,
    write_records_to_path,
};
use crate::lock::{FileLockGuard, LockError, RetryPolicy};
use crate::variant::AccessionCategory;

pub const COUNTERS_FILE: &str = "accession_counters.json";
pub const BLOCKS_FILE: &str = "accession_blocks.jsonl";
pub const BLOCKS_LOCK_FILE: &str = "accession_blocks.lock";

/// First accession handed out when a category has no counter yet.
pub const DEFAULT_INITIAL_ACCESSION: u64 = 1;

/// Closed blocks per category kept in the block ledger before compaction.
pub const DEFAULT_CLOSED_BLOCK_HISTORY: usize = 64;

/// A reserved range `[start, end)` of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessionBlock {
    pub id: String,
    pub category: AccessionCategory,
    pub start: u64,
    pub end: u64,
    pub instance_id: String,
    pub reserved_at: DateTime<Utc>,
    #[serde(default)]
    pub committed: bool,
    #[serde(default)]
    pub released: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl AccessionBlock {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    pub fn contains(&self, accession: u64) -> bool {
        self.range().contains(&accession)
    }

    /// Neither committed nor released.
    pub fn is_open(&self) -> bool {
        !self.committed && !self.released
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("block size must be at least 1")]
    InvalidSize,

    #[error("{category} accession counter overflow at {next}")]
    Overflow { category: AccessionCategory, next: u64 },

    #[error("unknown accession block {0}")]
    UnknownBlock(String),

    #[error("accession block {0} was released and cannot be committed")]
    BlockReleased(String),

    #[error("accession block {0} was committed and cannot be released")]
    BlockCommitted(String),

    #[error("{category} counter {counter} is behind reserved block ending at {block_end}")]
    CounterBehind {
        category: AccessionCategory,
        counter: u64,
        block_end: u64,
    },

    #[error("accession counter contended after {attempts} attempts: {lock_path}")]
    Contention { attempts: u32, lock_path: String },

    #[error("accession ledger lock failed: {0}")]
    Lock(LockError),

    #[error(transparent)]
    Jsonl(#[from] JsonlError),
}

/// Closed blocks of one category that were folded out of the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactedBlocks {
    pub committed: u64,
    pub released: u64,
    /// Highest end among the folded blocks.
    pub through: u64,
}

impl CompactedBlocks {
    fn absorb(&mut self, block: &AccessionBlock) {
        if block.committed {
            self.committed += 1;
        } else {
            self.released += 1;
        }
        self.through = self.through.max(block.end);
    }
}

/// Contents of `accession_counters.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CounterDocument {
    #[serde(default)]
    next: BTreeMap<AccessionCategory, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    compacted: BTreeMap<AccessionCategory, CompactedBlocks>,
}

/// Counter values and blocks for every category: the allocator's state.
#[derive(Debug, Clone, Default)]
pub struct BlockLedger {
    counters: BTreeMap<AccessionCategory, u64>,
    compacted: BTreeMap<AccessionCategory, CompactedBlocks>,
    blocks: Vec<AccessionBlock>,
    initial: BTreeMap<AccessionCategory, u64>,
}

impl BlockLedger {
    pub fn new(initial: BTreeMap<AccessionCategory, u64>) -> Self {
        Self {
            initial,
            ..Self::default()
        }
    }

    fn from_parts(
        counters: CounterDocument,
        blocks: Vec<AccessionBlock>,
        initial: BTreeMap<AccessionCategory, u64>,
    ) -> Self {
        Self {
            counters: counters.next,
            compacted: counters.compacted,
            blocks,
            initial,
        }
    }

    fn counter_document(&self) -> CounterDocument {
        CounterDocument {
            next: self.counters.clone(),
            compacted: self.compacted.clone(),
        }
    }

    /// Next value `reserve` would hand out.
    pub fn next_accession(&self, category: AccessionCategory) -> u64 {
        self.counters.get(&category).copied().unwrap_or_else(|| {
            self.initial
                .get(&category)
                .copied()
                .unwrap_or(DEFAULT_INITIAL_ACCESSION)
        })
    }

    pub fn blocks(&self) -> &[AccessionBlock] {
        &self.blocks
    }

    /// Totals of closed blocks no longer listed in the ledger.
    pub fn compacted(&self, category: AccessionCategory) -> CompactedBlocks {
        self.compacted.get(&category).copied().unwrap_or_default()
    }

    /// Fold all but the newest `keep` closed blocks of each category into
    /// the compacted totals. Open blocks are never touched. Returns the
    /// number of blocks folded.
    pub fn compact(&mut self, keep: usize) -> usize {
        let mut closed: BTreeMap<AccessionCategory, usize> = BTreeMap::new();
        for block in self.blocks.iter().filter(|b| !b.is_open()) {
            *closed.entry(block.category).or_default() += 1;
        }
        let mut excess: BTreeMap<AccessionCategory, usize> = closed
            .into_iter()
            .filter(|(_, count)| *count > keep)
            .map(|(category, count)| (category, count - keep))
            .collect();
        if excess.is_empty() {
            return 0;
        }

        let mut folded = 0;
        let compacted = &mut self.compacted;
        self.blocks.retain(|block| {
            if block.is_open() {
                return true;
            }
            match excess.get_mut(&block.category) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    compacted.entry(block.category).or_default().absorb(block);
                    folded += 1;
                    false
                }
                _ => true,
            }
        });
        folded
    }

    pub fn reserve(
        &mut self,
        category: AccessionCategory,
        size: u64,
        instance_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessionBlock, AllocationError> {
        if size == 0 {
            return Err(AllocationError::InvalidSize);
        }
        let next = self.next_accession(category);
        // Compare before increment: the counter must never trail a block.
        if let Some(block_end) = self
            .blocks
            .iter()
            .filter(|b| b.category == category)
            .map(|b| b.end)
            .chain(self.compacted.get(&category).map(|c| c.through))
            .max()
            && block_end > next
        {
            return Err(AllocationError::CounterBehind {
                category,
                counter: next,
                block_end,
            });
        }
        let end = next
            .checked_add(size)
            .ok_or(AllocationError::Overflow { category, next })?;
        self.counters.insert(category, end);

        let block = AccessionBlock {
            id: uuid::Uuid::new_v4().to_string(),
            category,
            start: next,
            end,
            instance_id: instance_id.to_string(),
            reserved_at: now,
            committed: false,
            released: false,
            closed_at: None,
        };
        self.blocks.push(block.clone());
        Ok(block)
    }

    /// Mark a block permanently claimed. Committing twice is a no-op.
    pub fn commit(
        &mut self,
        block_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(AccessionBlock, bool), AllocationError> {
        let block = self.block_mut(block_id)?;
        if block.released {
            return Err(AllocationError::BlockReleased(block_id.to_string()));
        }
        if block.committed {
            return Ok((block.clone(), false));
        }
        block.committed = true;
        block.closed_at = Some(now);
        Ok((block.clone(), true))
    }

    /// Void a block that issued nothing. Releasing twice is a no-op.
    pub fn release(
        &mut self,
        block_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(AccessionBlock, bool), AllocationError> {
        let block = self.block_mut(block_id)?;
        if block.committed {
            return Err(AllocationError::BlockCommitted(block_id.to_string()));
        }
        if block.released {
            return Ok((block.clone(), false));
        }
        block.released = true;
        block.closed_at = Some(now);
        Ok((block.clone(), true))
    }

    /// Open blocks of `category` reserved strictly before `cutoff`.
    pub fn open_blocks_before(
        &self,
        category: AccessionCategory,
        cutoff: DateTime<Utc>,
    ) -> Vec<AccessionBlock> {
        self.blocks
            .iter()
            .filter(|b| b.category == category && b.is_open() && b.reserved_at < cutoff)
            .cloned()
            .collect()
    }

    fn block_mut(&mut self, block_id: &str) -> Result<&mut AccessionBlock, AllocationError> {
        self.blocks
            .iter_mut()
            .find(|b| b.id == block_id)
            .ok_or_else(|| AllocationError::UnknownBlock(block_id.to_string()))
    }
}

/// Contiguous-block accession allocation, shared by all workers.
pub trait AccessionAllocator: Send + Sync {
    /// Application instance this allocator reserves on behalf of.
    fn instance_id(&self) -> &str;

    /// Reserve `size` fresh accessions of `category`.
    fn reserve(
        &self,
        category: AccessionCategory,
        size: u64,
    ) -> Result<AccessionBlock, AllocationError>;

    /// Mark `block` permanently claimed.
    fn commit(&self, block: &AccessionBlock) -> Result<(), AllocationError>;

    /// Void `block`; its range is never reissued.
    fn release(&self, block: &AccessionBlock) -> Result<(), AllocationError>;

    /// Open blocks reserved before `cutoff`.
    fn open_blocks_before(
        &self,
        category: AccessionCategory,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AccessionBlock>, AllocationError>;

    /// Every block of `category`, in reservation order.
    fn blocks(&self, category: AccessionCategory) -> Result<Vec<AccessionBlock>, AllocationError>;
}

/// Single-process allocator over a mutex-guarded ledger.
#[derive(Debug)]
pub struct InMemoryBlockAllocator {
    ledger: Mutex<BlockLedger>,
    instance_id: String,
}

impl InMemoryBlockAllocator {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self::with_initial(instance_id, BTreeMap::new())
    }

    pub fn with_initial(
        instance_id: impl Into<String>,
        initial: BTreeMap<AccessionCategory, u64>,
    ) -> Self {
        Self {
            ledger: Mutex::new(BlockLedger::new(initial)),
            instance_id: instance_id.into(),
        }
    }

    fn with_ledger<T>(&self, f: impl FnOnce(&mut BlockLedger) -> T) -> T {
        let mut ledger = self
            .ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut ledger)
    }
}

impl AccessionAllocator for InMemoryBlockAllocator {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn reserve(
        &self,
        category: AccessionCategory,
        size: u64,
    ) -> Result<AccessionBlock, AllocationError> {
        self.with_ledger(|ledger| ledger.reserve(category, size, &self.instance_id, Utc::now()))
    }

    fn commit(&self, block: &AccessionBlock) -> Result<(), AllocationError> {
        self.with_ledger(|ledger| ledger.commit(&block.id, Utc::now()).map(|_| ()))
    }

    fn release(&self, block: &AccessionBlock) -> Result<(), AllocationError> {
        self.with_ledger(|ledger| ledger.release(&block.id, Utc::now()).map(|_| ()))
    }

    fn open_blocks_before(
        &self,
        category: AccessionCategory,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AccessionBlock>, AllocationError> {
        Ok(self.with_ledger(|ledger| ledger.open_blocks_before(category, cutoff)))
    }

    fn blocks(&self, category: AccessionCategory) -> Result<Vec<AccessionBlock>, AllocationError> {
        Ok(self.with_ledger(|ledger| {
            ledger
                .blocks()
                .iter()
                .filter(|b| b.category == category)
                .cloned()
                .collect()
        }))
    }
}

/// Multi-process allocator over a ledger directory.
///
/// Layout: `accession_counters.json` (the counter document) and
/// `accession_blocks.jsonl`, both mutated only while holding
/// `accession_blocks.lock`. Every saving mutation compacts the ledger down
/// to `closed_history` closed blocks per category.
#[derive(Debug, Clone)]
pub struct JsonlBlockAllocator {
    dir: PathBuf,
    instance_id: String,
    initial: BTreeMap<AccessionCategory, u64>,
    retry: RetryPolicy,
    closed_history: usize,
}

impl JsonlBlockAllocator {
    pub fn new(dir: impl Into<PathBuf>, instance_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            instance_id: instance_id.into(),
            initial: BTreeMap::new(),
            retry: RetryPolicy::default(),
            closed_history: DEFAULT_CLOSED_BLOCK_HISTORY,
        }
    }

    pub fn with_closed_history(mut self, keep: usize) -> Self {
        self.closed_history = keep;
        self
    }

    pub fn with_initial(mut self, category: AccessionCategory, first: u64) -> Self {
        self.initial.insert(category, first);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the ledger without taking the lock (read-only snapshot).
    pub fn snapshot(&self) -> Result<BlockLedger, AllocationError> {
        self.load()
    }

    fn load(&self) -> Result<BlockLedger, AllocationError> {
        let counters = read_json_from_path(self.dir.join(COUNTERS_FILE))?.unwrap_or_default();
        let blocks = read_records_from_path(self.dir.join(BLOCKS_FILE))?;
        Ok(BlockLedger::from_parts(
            counters,
            blocks,
            self.initial.clone(),
        ))
    }

    /// Counter first: a crash before the block line is written loses the
    /// range but can never hand it out twice. The same crash after a
    /// compaction counts the folded blocks twice in the totals.
    fn save(&self, ledger: &BlockLedger) -> Result<(), AllocationError> {
        write_json_to_path(self.dir.join(COUNTERS_FILE), &ledger.counter_document())?;
        write_records_to_path(self.dir.join(BLOCKS_FILE), &ledger.blocks)?;
        Ok(())
    }

    fn mutate<T>(
        &self,
        mutator: impl FnOnce(&mut BlockLedger) -> Result<(T, bool), AllocationError>,
    ) -> Result<T, AllocationError> {
        let lock_path = self.dir.join(BLOCKS_LOCK_FILE);
        let _guard =
            FileLockGuard::acquire_with_retry(&lock_path, &self.retry).map_err(|err| match err {
                LockError::Busy { lock_path } => AllocationError::Contention {
                    attempts: self.retry.max_attempts.max(1),
                    lock_path,
                },
                other => AllocationError::Lock(other),
            })?;
        let mut ledger = self.load()?;
        let (value, changed) = mutator(&mut ledger)?;
        if changed {
            let folded = ledger.compact(self.closed_history);
            if folded > 0 {
                tracing::debug!(
                    folded,
                    dir = %self.dir.display(),
                    "compacted accession block ledger"
                );
            }
            self.save(&ledger)?;
        }
        Ok(value)
    }
}

impl AccessionAllocator for JsonlBlockAllocator {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn reserve(
        &self,
        category: AccessionCategory,
        size: u64,
    ) -> Result<AccessionBlock, AllocationError> {
        let block = self.mutate(|ledger| {
            let block = ledger.reserve(category, size, &self.instance_id, Utc::now())?;
            Ok((block, true))
        })?;
        tracing::debug!(
            category = %category,
            start = block.start,
            end = block.end,
            instance = %self.instance_id,
            "reserved accession block"
        );
        Ok(block)
    }

    fn commit(&self, block: &AccessionBlock) -> Result<(), AllocationError> {
        self.mutate(|ledger| {
            let (_, changed) = ledger.commit(&block.id, Utc::now())?;
            Ok(((), changed))
        })
    }

    fn release(&self, block: &AccessionBlock) -> Result<(), AllocationError> {
        self.mutate(|ledger| {
            let (_, changed) = ledger.release(&block.id, Utc::now())?;
            Ok(((), changed))
        })
    }

    fn open_blocks_before(
        &self,
        category: AccessionCategory,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AccessionBlock>, AllocationError> {
        Ok(self.load()?.open_blocks_before(category, cutoff))
    }

    fn blocks(&self, category: AccessionCategory) -> Result<Vec<AccessionBlock>, AllocationError> {
        Ok(self
            .load()?
            .blocks()
            .iter()
            .filter(|b| b.category == category)
            .cloned()
            .collect())
    }
}

/// Whether committed ranges of one category are pairwise disjoint.
pub fn committed_ranges_disjoint(blocks: &[AccessionBlock]) -> bool {
    let mut committed: Vec<Range<u64>> = blocks
        .iter()
        .filter(|b| b.committed)
        .map(AccessionBlock::range)
        .collect();
    committed.sort_by_key(|r| r.start);
    committed.windows(2).all(|pair| pair[0].end <= pair[1].start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn temp_ledger_dir(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "varclust-blocks-{prefix}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    #[test]
    fn reservations_are_contiguous_and_ascending() {
        let allocator = InMemoryBlockAllocator::new("worker-a");
        let first = allocator
            .reserve(AccessionCategory::Clustered, 10)
            .expect("reserve");
        let second = allocator
            .reserve(AccessionCategory::Clustered, 5)
            .expect("reserve");
        assert_eq!(first.range(), 1..11);
        assert_eq!(second.range(), 11..16);

        let ss = allocator
            .reserve(AccessionCategory::Submitted, 3)
            .expect("reserve");
        assert_eq!(ss.range(), 1..4, "categories have independent counters");
    }

    #[test]
    fn zero_size_is_rejected() {
        let allocator = InMemoryBlockAllocator::new("worker-a");
        assert!(matches!(
            allocator.reserve(AccessionCategory::Clustered, 0),
            Err(AllocationError::InvalidSize)
        ));
    }

    #[test]
    fn commit_and_release_are_exclusive() {
        let mut ledger = BlockLedger::default();
        let now = Utc::now();
        let a = ledger
            .reserve(AccessionCategory::Clustered, 2, "w", now)
            .expect("reserve");
        let b = ledger
            .reserve(AccessionCategory::Clustered, 2, "w", now)
            .expect("reserve");

        assert!(ledger.commit(&a.id, now).expect("commit").1);
        assert!(!ledger.commit(&a.id, now).expect("recommit").1);
        assert!(matches!(
            ledger.release(&a.id, now),
            Err(AllocationError::BlockCommitted(_))
        ));

        assert!(ledger.release(&b.id, now).expect("release").1);
        assert!(matches!(
            ledger.commit(&b.id, now),
            Err(AllocationError::BlockReleased(_))
        ));
        let later = now + chrono::Duration::days(1);
        assert!(
            ledger
                .open_blocks_before(AccessionCategory::Clustered, later)
                .is_empty()
        );
    }

    #[test]
    fn counter_behind_a_block_refuses_to_reserve() {
        let now = Utc::now();
        let mut ledger = BlockLedger::default();
        let block = ledger
            .reserve(AccessionCategory::Clustered, 10, "w", now)
            .expect("reserve");
        let mut rolled_back = CounterDocument::default();
        rolled_back.next.insert(AccessionCategory::Clustered, 5);
        let mut ledger = BlockLedger::from_parts(rolled_back, vec![block], BTreeMap::new());
        assert!(matches!(
            ledger.reserve(AccessionCategory::Clustered, 1, "w", now),
            Err(AllocationError::CounterBehind { block_end: 11, .. })
        ));
    }

    #[test]
    fn compaction_folds_old_closed_blocks_and_keeps_open_ones() {
        let now = Utc::now();
        let mut ledger = BlockLedger::default();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let block = ledger
                .reserve(AccessionCategory::Clustered, 10, "w", now)
                .expect("reserve");
            ids.push(block.id);
        }
        let ss = ledger
            .reserve(AccessionCategory::Submitted, 10, "w", now)
            .expect("reserve");
        ledger.commit(&ss.id, now).expect("commit");
        ledger.commit(&ids[0], now).expect("commit");
        ledger.release(&ids[1], now).expect("release");
        ledger.commit(&ids[3], now).expect("commit");

        assert_eq!(ledger.compact(1), 2);
        let remaining: Vec<&str> = ledger.blocks().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(
            remaining,
            vec![ids[2].as_str(), ids[3].as_str(), ids[4].as_str(), ss.id.as_str()]
        );
        assert_eq!(
            ledger.compacted(AccessionCategory::Clustered),
            CompactedBlocks {
                committed: 1,
                released: 1,
                through: 21,
            }
        );
        assert_eq!(ledger.compacted(AccessionCategory::Submitted), CompactedBlocks::default());
        assert_eq!(ledger.compact(1), 0, "compaction is stable");
    }

    #[test]
    fn compacted_ranges_still_guard_the_counter() {
        let now = Utc::now();
        let mut ledger = BlockLedger::default();
        let block = ledger
            .reserve(AccessionCategory::Clustered, 10, "w", now)
            .expect("reserve");
        ledger.commit(&block.id, now).expect("commit");
        ledger.compact(0);
        assert!(ledger.blocks().is_empty());

        let mut rolled_back = ledger.counter_document();
        rolled_back.next.insert(AccessionCategory::Clustered, 5);
        let mut ledger = BlockLedger::from_parts(rolled_back, Vec::new(), BTreeMap::new());
        assert!(matches!(
            ledger.reserve(AccessionCategory::Clustered, 1, "w", now),
            Err(AllocationError::CounterBehind { block_end: 11, .. })
        ));
    }

    #[test]
    fn jsonl_ledger_stays_bounded() {
        let dir = temp_ledger_dir("bounded");
        let allocator = JsonlBlockAllocator::new(&dir, "worker-a").with_closed_history(2);
        for _ in 0..6 {
            let block = allocator
                .reserve(AccessionCategory::Submitted, 3)
                .expect("reserve");
            allocator.commit(&block).expect("commit");
        }
        let open = allocator
            .reserve(AccessionCategory::Submitted, 3)
            .expect("reserve");

        let ledger = allocator.snapshot().expect("snapshot");
        let listed: Vec<u64> = ledger.blocks().iter().map(|b| b.start).collect();
        assert_eq!(listed, vec![13, 16, 19]);
        assert!(ledger.blocks().last().is_some_and(|b| b.id == open.id && b.is_open()));
        let compacted = ledger.compacted(AccessionCategory::Submitted);
        assert_eq!(compacted.committed, 4);
        assert_eq!(compacted.through, 13);
        assert_eq!(ledger.next_accession(AccessionCategory::Submitted), 22);

        let lines = fs::read_to_string(dir.join(BLOCKS_FILE)).expect("ledger file");
        assert_eq!(lines.lines().count(), 3);
        let counters: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.join(COUNTERS_FILE)).expect("counter document"),
        )
        .expect("counter json");
        assert_eq!(counters["next"]["SS"], 22);
        assert_eq!(counters["compacted"]["SS"]["committed"], 4);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn jsonl_allocator_persists_counter_and_initial_value() {
        let dir = temp_ledger_dir("persist");
        let allocator = JsonlBlockAllocator::new(&dir, "worker-a")
            .with_initial(AccessionCategory::Clustered, 100);
        let block = allocator
            .reserve(AccessionCategory::Clustered, 10)
            .expect("reserve");
        assert_eq!(block.range(), 100..110);
        allocator.commit(&block).expect("commit");

        let reopened = JsonlBlockAllocator::new(&dir, "worker-b")
            .with_initial(AccessionCategory::Clustered, 100);
        let next = reopened
            .reserve(AccessionCategory::Clustered, 10)
            .expect("reserve");
        assert_eq!(next.range(), 110..120);
        let blocks = reopened
            .blocks(AccessionCategory::Clustered)
            .expect("blocks");
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].committed);
        assert_eq!(blocks[1].instance_id, "worker-b");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn concurrent_workers_never_overlap() {
        let dir = temp_ledger_dir("concurrent");
        let workers = 8;
        let per_worker = 5;
        let barrier = Arc::new(Barrier::new(workers));
        let retry = RetryPolicy {
            max_attempts: 2_000,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            stale_lock_after: None,
        };

        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let dir = dir.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let allocator =
                        JsonlBlockAllocator::new(dir, format!("worker-{i}")).with_retry(retry);
                    barrier.wait();
                    let mut ranges = Vec::new();
                    for _ in 0..per_worker {
                        let block = allocator
                            .reserve(AccessionCategory::Clustered, 7)
                            .expect("reserve under contention");
                        allocator.commit(&block).expect("commit under contention");
                        ranges.push(block.range());
                    }
                    ranges
                })
            })
            .collect();

        let mut all: Vec<Range<u64>> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("worker thread"))
            .collect();
        assert_eq!(all.len(), workers * per_worker);
        all.sort_by_key(|r| r.start);
        assert!(all.windows(2).all(|pair| pair[0].end <= pair[1].start));

        let blocks = JsonlBlockAllocator::new(&dir, "auditor")
            .blocks(AccessionCategory::Clustered)
            .expect("blocks");
        assert!(committed_ranges_disjoint(&blocks));
        assert!(blocks.iter().all(|b| b.committed));
        let _ = fs::remove_dir_all(dir);
    }
}
