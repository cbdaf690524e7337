//! Ascending accession issue from reserved blocks.

use std::sync::Arc;
use varclust_store::{AccessionAllocator, AccessionBlock, AccessionCategory, AllocationError};

/// Hands out accessions of one category in ascending order, reserving a new
/// block whenever the current one runs out.
///
/// Blocks stay open until the chunk's store commit settles: `finish` commits
/// the blocks something was drawn from and releases the rest, `abandon`
/// releases everything.
pub struct AccessionCursor {
    allocator: Arc<dyn AccessionAllocator>,
    category: AccessionCategory,
    block_size: u64,
    blocks: Vec<AccessionBlock>,
    next: u64,
}

impl AccessionCursor {
    pub fn new(
        allocator: Arc<dyn AccessionAllocator>,
        category: AccessionCategory,
        block_size: u64,
    ) -> Self {
        Self {
            allocator,
            category,
            block_size,
            blocks: Vec::new(),
            next: 0,
        }
    }

    pub fn category(&self) -> AccessionCategory {
        self.category
    }

    pub fn next_accession(&mut self) -> Result<u64, AllocationError> {
        let exhausted = self.blocks.last().is_none_or(|block| self.next >= block.end);
        if exhausted {
            let block = self.allocator.reserve(self.category, self.block_size)?;
            self.next = block.start;
            self.blocks.push(block);
        }
        let accession = self.next;
        self.next += 1;
        Ok(accession)
    }

    /// Accessions handed out so far.
    pub fn issued(&self) -> u64 {
        let Some(last) = self.blocks.last() else {
            return 0;
        };
        let full: u64 = self.blocks[..self.blocks.len() - 1]
            .iter()
            .map(AccessionBlock::len)
            .sum();
        full + (self.next - last.start)
    }

    /// Commit used blocks and release untouched ones.
    pub fn finish(self) -> Result<(), AllocationError> {
        for block in &self.blocks {
            if self.was_used(block) {
                self.allocator.commit(block)?;
            } else {
                self.allocator.release(block)?;
            }
        }
        Ok(())
    }

    /// Release every block; nothing drawn from them was persisted.
    pub fn abandon(self) -> Result<(), AllocationError> {
        for block in &self.blocks {
            self.allocator.release(block)?;
        }
        Ok(())
    }

    /// Leave every block open for recovery to reconcile.
    pub fn leave_open(self) {
        if let Some(last) = self.blocks.last() {
            tracing::warn!(
                category = %self.category,
                blocks = self.blocks.len(),
                last_end = last.end,
                "leaving accession blocks open after failed store commit"
            );
        }
    }

    fn was_used(&self, block: &AccessionBlock) -> bool {
        match self.blocks.last() {
            Some(last) if last.id == block.id => self.next > block.start,
            _ => true,
        }
    }
}

/// The RS and SS cursors of one chunk attempt.
pub struct ChunkCursors {
    pub clustered: AccessionCursor,
    pub submitted: AccessionCursor,
}

impl ChunkCursors {
    pub fn new(
        allocator: Arc<dyn AccessionAllocator>,
        rs_block_size: u64,
        ss_block_size: u64,
    ) -> Self {
        Self {
            clustered: AccessionCursor::new(
                Arc::clone(&allocator),
                AccessionCategory::Clustered,
                rs_block_size,
            ),
            submitted: AccessionCursor::new(allocator, AccessionCategory::Submitted, ss_block_size),
        }
    }

    pub fn finish(self) -> Result<(), AllocationError> {
        self.clustered.finish()?;
        self.submitted.finish()
    }

    pub fn abandon(self) -> Result<(), AllocationError> {
        self.clustered.abandon()?;
        self.submitted.abandon()
    }

    pub fn leave_open(self) {
        self.clustered.leave_open();
        self.submitted.leave_open();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varclust_store::InMemoryBlockAllocator;

    #[test]
    fn issues_ascending_across_blocks() {
        let allocator = Arc::new(InMemoryBlockAllocator::new("w"));
        let mut cursor = AccessionCursor::new(allocator.clone(), AccessionCategory::Clustered, 2);
        let issued: Vec<u64> = (0..5)
            .map(|_| cursor.next_accession().expect("accession"))
            .collect();
        assert_eq!(issued, vec![1, 2, 3, 4, 5]);
        assert_eq!(cursor.issued(), 5);
        cursor.finish().expect("finish");

        let blocks = allocator
            .blocks(AccessionCategory::Clustered)
            .expect("blocks");
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.committed));
    }

    #[test]
    fn unused_cursor_reserves_nothing() {
        let allocator = Arc::new(InMemoryBlockAllocator::new("w"));
        let cursor = AccessionCursor::new(allocator.clone(), AccessionCategory::Submitted, 10);
        assert_eq!(cursor.issued(), 0);
        cursor.finish().expect("finish");
        assert!(
            allocator
                .blocks(AccessionCategory::Submitted)
                .expect("blocks")
                .is_empty()
        );
    }

    #[test]
    fn abandon_releases_and_range_is_not_reissued() {
        let allocator = Arc::new(InMemoryBlockAllocator::new("w"));
        let mut cursor = AccessionCursor::new(allocator.clone(), AccessionCategory::Clustered, 10);
        assert_eq!(cursor.next_accession().expect("accession"), 1);
        cursor.abandon().expect("abandon");

        let mut retry = AccessionCursor::new(allocator.clone(), AccessionCategory::Clustered, 10);
        assert_eq!(retry.next_accession().expect("accession"), 11);
        let blocks = allocator
            .blocks(AccessionCategory::Clustered)
            .expect("blocks");
        assert!(blocks[0].released);
    }
}
