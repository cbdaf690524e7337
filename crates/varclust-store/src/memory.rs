//! Canonical in-memory projection of the variant document store.
//!
//! This is the memory boundary for `varclust-store`:
//! - load/store the JSONL directory
//! - point lookups by hash and by accession
//! - the operation log with id-deduplicating append
//!
//! All mutation goes through methods so the secondary indices (RS members,
//! RS documents per accession, merge chain) stay consistent. Merges and
//! deprecations are recorded per assembly: an accession retired in one
//! assembly stays live in the others.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Range;
use std::path::Path;
use varclust_kernel::ContentHash;

use crate::jsonl::{
    JsonlError, append_records_to_path, read_records_from_path, write_records_to_path,
};
use crate::operation::{EventType, VariantOperation};
use crate::variant::{AccessionCategory, ClusteredVariant, SubmittedVariant};

pub const SUBMITTED_FILE: &str = "submitted_variants.jsonl";
pub const CLUSTERED_FILE: &str = "clustered_variants.jsonl";
pub const OPERATIONS_FILE: &str = "operations.jsonl";

/// Errors raised while loading, mutating or querying the variant store.
#[derive(Debug, thiserror::Error)]
pub enum VariantStoreError {
    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error("submitted variant not found: {0}")]
    SubmittedNotFound(ContentHash),

    #[error("submitted variant {0} already exists; identity hashes are never rewritten")]
    SubmittedExists(ContentHash),

    #[error("clustered variant hash {hash} already held by rs{holder}, cannot store rs{accession}")]
    ClusteredHashTaken {
        hash: ContentHash,
        holder: u64,
        accession: u64,
    },

    #[error("rs{accession} already has a document in {assembly} at {existing}")]
    ClusteredAccessionTaken {
        accession: u64,
        assembly: String,
        existing: ContentHash,
    },
}

/// Canonical in-memory state for SS, RS and operations.
#[derive(Debug, Clone, Default)]
pub struct VariantStore {
    submitted: BTreeMap<ContentHash, SubmittedVariant>,
    clustered: BTreeMap<ContentHash, ClusteredVariant>,
    operations: Vec<VariantOperation>,
    operation_ids: HashSet<String>,
    persisted_operations: usize,
    members: BTreeMap<u64, BTreeSet<ContentHash>>,
    clustered_by_accession: BTreeMap<u64, BTreeSet<ContentHash>>,
    merged_into: BTreeMap<(String, u64), u64>,
    deprecated: BTreeSet<(String, u64)>,
}

impl VariantStore {
    /// Build a store from fully-materialized records.
    ///
    /// Duplicate hashes resolve last-write-wins; duplicate operation ids keep
    /// the first occurrence.
    pub fn from_records(
        submitted: Vec<SubmittedVariant>,
        clustered: Vec<ClusteredVariant>,
        operations: Vec<VariantOperation>,
    ) -> Self {
        let mut store = Self::default();
        for ss in submitted {
            if let Some(previous) = store.submitted.remove(&ss.hash) {
                store.unindex_member(&previous);
            }
            store.index_member(&ss);
            store.submitted.insert(ss.hash.clone(), ss);
        }
        for rs in clustered {
            if let Some(previous) = store.clustered.remove(&rs.hash) {
                store.unindex_clustered(&previous);
            }
            store.index_clustered(&rs);
            store.clustered.insert(rs.hash.clone(), rs);
        }
        for op in operations {
            store.append_operation(op);
        }
        store.persisted_operations = store.operations.len();
        store
    }

    /// Load store state from a directory of JSONL files.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, VariantStoreError> {
        let dir = dir.as_ref();
        let submitted = read_records_from_path(dir.join(SUBMITTED_FILE))?;
        let clustered = read_records_from_path(dir.join(CLUSTERED_FILE))?;
        let operations = read_records_from_path(dir.join(OPERATIONS_FILE))?;
        Ok(Self::from_records(submitted, clustered, operations))
    }

    /// Persist store state to a directory.
    ///
    /// New operations are appended first, then the SS and RS snapshots are
    /// replaced. A crash in between leaves operations whose effects are
    /// missing; replaying the same input regenerates them with the same ids.
    pub fn save_dir(&mut self, dir: impl AsRef<Path>) -> Result<(), VariantStoreError> {
        let dir = dir.as_ref();
        append_records_to_path(
            dir.join(OPERATIONS_FILE),
            &self.operations[self.persisted_operations..],
        )?;
        self.persisted_operations = self.operations.len();

        let submitted: Vec<SubmittedVariant> = self.submitted.values().cloned().collect();
        write_records_to_path(dir.join(SUBMITTED_FILE), &submitted)?;
        let clustered: Vec<ClusteredVariant> = self.clustered.values().cloned().collect();
        write_records_to_path(dir.join(CLUSTERED_FILE), &clustered)?;
        Ok(())
    }

    // ── Submitted variants ──

    pub fn submitted_len(&self) -> usize {
        self.submitted.len()
    }

    pub fn submitted(&self, hash: &ContentHash) -> Option<&SubmittedVariant> {
        self.submitted.get(hash)
    }

    /// Iterate all SS in deterministic hash order.
    pub fn submitted_variants(&self) -> impl Iterator<Item = &SubmittedVariant> {
        self.submitted.values()
    }

    /// Insert a new SS. An existing hash is never overwritten.
    pub fn insert_submitted(&mut self, ss: SubmittedVariant) -> Result<(), VariantStoreError> {
        if self.submitted.contains_key(&ss.hash) {
            return Err(VariantStoreError::SubmittedExists(ss.hash));
        }
        self.index_member(&ss);
        self.submitted.insert(ss.hash.clone(), ss);
        Ok(())
    }

    /// Point an SS at an RS (or at none). Returns the previous reference.
    pub fn set_clustered_reference(
        &mut self,
        hash: &ContentHash,
        accession: Option<u64>,
    ) -> Result<Option<u64>, VariantStoreError> {
        let ss = self
            .submitted
            .get_mut(hash)
            .ok_or_else(|| VariantStoreError::SubmittedNotFound(hash.clone()))?;
        let previous = ss.clustered_variant_accession;
        if previous == accession {
            return Ok(previous);
        }
        ss.clustered_variant_accession = accession;
        if let Some(old) = previous
            && let Some(set) = self.members.get_mut(&old)
        {
            set.remove(hash);
            if set.is_empty() {
                self.members.remove(&old);
            }
        }
        if let Some(new) = accession {
            self.members.entry(new).or_default().insert(hash.clone());
        }
        Ok(previous)
    }

    /// SS referencing `accession`, across assemblies, in hash order.
    pub fn members_of(&self, accession: u64) -> Vec<&SubmittedVariant> {
        self.members
            .get(&accession)
            .into_iter()
            .flatten()
            .filter_map(|hash| self.submitted.get(hash))
            .collect()
    }

    /// SS referencing `accession` within one assembly.
    pub fn members_in_assembly(&self, assembly: &str, accession: u64) -> Vec<&SubmittedVariant> {
        self.members_of(accession)
            .into_iter()
            .filter(|ss| ss.assembly_accession == assembly)
            .collect()
    }

    // ── Clustered variants ──

    pub fn clustered_len(&self) -> usize {
        self.clustered.len()
    }

    pub fn clustered(&self, hash: &ContentHash) -> Option<&ClusteredVariant> {
        self.clustered.get(hash)
    }

    /// Iterate all active RS in deterministic hash order.
    pub fn clustered_variants(&self) -> impl Iterator<Item = &ClusteredVariant> {
        self.clustered.values()
    }

    /// Active RS documents carrying `accession`, one per assembly at most.
    pub fn clustered_by_accession(&self, accession: u64) -> Vec<&ClusteredVariant> {
        self.clustered_by_accession
            .get(&accession)
            .into_iter()
            .flatten()
            .filter_map(|hash| self.clustered.get(hash))
            .collect()
    }

    pub fn clustered_in_assembly(&self, assembly: &str, accession: u64) -> Option<&ClusteredVariant> {
        self.clustered_by_accession(accession)
            .into_iter()
            .find(|rs| rs.assembly_accession == assembly)
    }

    /// Store an RS document.
    ///
    /// Replaces a document at the same hash only if it carries the same
    /// accession, and refuses a second document for the same accession in
    /// the same assembly.
    pub fn insert_clustered(&mut self, rs: ClusteredVariant) -> Result<(), VariantStoreError> {
        if let Some(existing) = self.clustered.get(&rs.hash)
            && existing.accession != rs.accession
        {
            return Err(VariantStoreError::ClusteredHashTaken {
                hash: rs.hash,
                holder: existing.accession,
                accession: rs.accession,
            });
        }
        if let Some(other) = self.clustered_in_assembly(&rs.assembly_accession, rs.accession)
            && other.hash != rs.hash
        {
            return Err(VariantStoreError::ClusteredAccessionTaken {
                accession: rs.accession,
                assembly: rs.assembly_accession,
                existing: other.hash.clone(),
            });
        }
        if let Some(previous) = self.clustered.remove(&rs.hash) {
            self.unindex_clustered(&previous);
        }
        self.index_clustered(&rs);
        self.clustered.insert(rs.hash.clone(), rs);
        Ok(())
    }

    /// Remove an RS document, returning it.
    pub fn remove_clustered(&mut self, hash: &ContentHash) -> Option<ClusteredVariant> {
        let removed = self.clustered.remove(hash)?;
        self.unindex_clustered(&removed);
        Some(removed)
    }

    /// Follow `assembly`'s MERGED chain from `accession` to the accession
    /// now in use there.
    ///
    /// An accession with a document in `assembly` is in use and resolves to
    /// itself. Returns `None` when the chain ends in an accession deprecated
    /// in `assembly`.
    pub fn resolve_clustered_accession(&self, assembly: &str, accession: u64) -> Option<u64> {
        let mut current = accession;
        let mut seen = BTreeSet::new();
        while self.clustered_in_assembly(assembly, current).is_none()
            && let Some(&next) = self.merged_into.get(&(assembly.to_string(), current))
        {
            if !seen.insert(current) {
                break;
            }
            current = next;
        }
        if self.clustered_in_assembly(assembly, current).is_none()
            && self.deprecated.contains(&(assembly.to_string(), current))
        {
            None
        } else {
            Some(current)
        }
    }

    // ── Operations ──

    /// Append an operation unless one with the same id exists.
    pub fn append_operation(&mut self, op: VariantOperation) -> bool {
        if !self.operation_ids.insert(op.id.clone()) {
            return false;
        }
        if op.category == AccessionCategory::Clustered
            && let Some(assembly) = op.assembly()
        {
            let key = (assembly.to_string(), op.accession);
            match op.event_type {
                EventType::Merged => {
                    if let Some(target) = op.merged_into {
                        self.merged_into.insert(key, target);
                    }
                }
                EventType::Deprecated => {
                    self.deprecated.insert(key);
                }
                EventType::Split | EventType::Updated => {}
            }
        }
        self.operations.push(op);
        true
    }

    /// All operations in append order.
    pub fn operations(&self) -> &[VariantOperation] {
        &self.operations
    }

    /// Operations not yet written to disk.
    pub fn pending_operations(&self) -> &[VariantOperation] {
        &self.operations[self.persisted_operations..]
    }

    /// Operations whose subject is `accession` in `category`.
    pub fn operations_for(
        &self,
        category: AccessionCategory,
        accession: u64,
    ) -> impl Iterator<Item = &VariantOperation> {
        self.operations
            .iter()
            .filter(move |op| op.category == category && op.accession == accession)
    }

    // ── Range queries ──

    /// Whether any persisted record uses an accession in `range`.
    pub fn has_accessions_in(&self, category: AccessionCategory, range: Range<u64>) -> bool {
        if range.is_empty() {
            return false;
        }
        match category {
            AccessionCategory::Submitted => {
                self.submitted
                    .values()
                    .any(|ss| range.contains(&ss.accession))
                    || self.operations.iter().any(|op| {
                        op.category == AccessionCategory::Submitted
                            && range.contains(&op.accession)
                    })
            }
            AccessionCategory::Clustered => {
                self.clustered_by_accession
                    .range(range.clone())
                    .next()
                    .is_some()
                    || self.members.range(range.clone()).next().is_some()
                    || self.operations.iter().any(|op| {
                        op.clustered_accessions()
                            .iter()
                            .any(|acc| range.contains(acc))
                    })
            }
        }
    }

    /// Largest accession in use for `category`, if any.
    pub fn max_accession(&self, category: AccessionCategory) -> Option<u64> {
        match category {
            AccessionCategory::Submitted => self.submitted.values().map(|ss| ss.accession).max(),
            AccessionCategory::Clustered => {
                let documents = self.clustered_by_accession.keys().next_back().copied();
                let references = self.members.keys().next_back().copied();
                documents.max(references)
            }
        }
    }

    fn index_member(&mut self, ss: &SubmittedVariant) {
        if let Some(acc) = ss.clustered_variant_accession {
            self.members.entry(acc).or_default().insert(ss.hash.clone());
        }
    }

    fn unindex_member(&mut self, ss: &SubmittedVariant) {
        if let Some(acc) = ss.clustered_variant_accession
            && let Some(set) = self.members.get_mut(&acc)
        {
            set.remove(&ss.hash);
            if set.is_empty() {
                self.members.remove(&acc);
            }
        }
    }

    fn index_clustered(&mut self, rs: &ClusteredVariant) {
        self.clustered_by_accession
            .entry(rs.accession)
            .or_default()
            .insert(rs.hash.clone());
    }

    fn unindex_clustered(&mut self, rs: &ClusteredVariant) {
        if let Some(set) = self.clustered_by_accession.get_mut(&rs.accession) {
            set.remove(&rs.hash);
            if set.is_empty() {
                self.clustered_by_accession.remove(&rs.accession);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::SubmittedFlags;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};
    use varclust_kernel::VariantType;

    fn ss(hash: &str, accession: u64, rs: Option<u64>) -> SubmittedVariant {
        SubmittedVariant {
            accession,
            hash: ContentHash(hash.to_string()),
            assembly_accession: "GCA1".to_string(),
            taxonomy_accession: 9606,
            project_accession: "PRJ1".to_string(),
            contig: "chr1".to_string(),
            start: 100,
            reference_allele: "C".to_string(),
            alternate_allele: "T".to_string(),
            clustered_variant_accession: rs,
            flags: SubmittedFlags::default(),
            created_date: Utc::now(),
        }
    }

    fn rs(hash: &str, accession: u64) -> ClusteredVariant {
        ClusteredVariant {
            accession,
            hash: ContentHash(hash.to_string()),
            assembly_accession: "GCA1".to_string(),
            taxonomy_accession: 9606,
            contig: "chr1".to_string(),
            start: 100,
            variant_type: VariantType::Snv,
            validated: false,
            created_date: Utc::now(),
        }
    }

    fn temp_dir(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "varclust-store-{prefix}-{}-{unique}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    #[test]
    fn member_index_follows_reference_changes() {
        let mut store = VariantStore::from_records(
            vec![ss("a", 1, Some(10)), ss("b", 2, Some(10))],
            vec![rs("h10", 10)],
            Vec::new(),
        );
        assert_eq!(store.members_of(10).len(), 2);

        let previous = store
            .set_clustered_reference(&ContentHash("b".to_string()), Some(11))
            .expect("ss exists");
        assert_eq!(previous, Some(10));
        assert_eq!(store.members_of(10).len(), 1);
        assert_eq!(store.members_of(11)[0].accession, 2);
    }

    #[test]
    fn existing_submitted_hash_is_never_overwritten() {
        let mut store = VariantStore::default();
        store.insert_submitted(ss("a", 1, None)).expect("first insert");
        let err = store
            .insert_submitted(ss("a", 2, None))
            .expect_err("second insert must fail");
        assert!(matches!(err, VariantStoreError::SubmittedExists(_)));
        assert_eq!(store.submitted(&ContentHash("a".to_string())).unwrap().accession, 1);
    }

    #[test]
    fn one_rs_document_per_hash_and_per_assembly_accession() {
        let mut store = VariantStore::default();
        store.insert_clustered(rs("h1", 1)).expect("first rs");
        assert!(matches!(
            store.insert_clustered(rs("h1", 2)),
            Err(VariantStoreError::ClusteredHashTaken { holder: 1, .. })
        ));
        assert!(matches!(
            store.insert_clustered(rs("h2", 1)),
            Err(VariantStoreError::ClusteredAccessionTaken { accession: 1, .. })
        ));
        let removed = store.remove_clustered(&ContentHash("h1".to_string()));
        assert_eq!(removed.map(|r| r.accession), Some(1));
        store.insert_clustered(rs("h2", 1)).expect("re-key after removal");
    }

    #[test]
    fn merge_chain_resolves_to_survivor() {
        let mut store = VariantStore::default();
        store.append_operation(VariantOperation::merged("GCA1", vec![rs("h3", 3)], 3, 2, Utc::now()));
        store.append_operation(VariantOperation::merged("GCA1", vec![rs("h2", 2)], 2, 1, Utc::now()));
        assert_eq!(store.resolve_clustered_accession("GCA1", 3), Some(1));
        assert_eq!(store.resolve_clustered_accession("GCA1", 9), Some(9));

        store.append_operation(VariantOperation::deprecated(rs("h1", 1), "gone", Utc::now()));
        assert_eq!(store.resolve_clustered_accession("GCA1", 3), None);
    }

    #[test]
    fn merge_chain_is_scoped_to_its_assembly() {
        let mut other = rs("g9", 9);
        other.assembly_accession = "GCA2".to_string();
        let mut store =
            VariantStore::from_records(Vec::new(), vec![rs("h5", 5), other], Vec::new());
        let merged = VariantOperation::merged("GCA1", vec![rs("h9", 9)], 9, 5, Utc::now());
        store.append_operation(merged);

        assert_eq!(store.resolve_clustered_accession("GCA1", 9), Some(5));
        assert_eq!(store.resolve_clustered_accession("GCA2", 9), Some(9));
        assert_eq!(store.resolve_clustered_accession("GCA3", 9), Some(9));

        store.append_operation(VariantOperation::deprecated(rs("h5", 5), "gone", Utc::now()));
        assert_eq!(store.resolve_clustered_accession("GCA1", 5), Some(5));
        store.remove_clustered(&ContentHash("h5".to_string()));
        assert_eq!(store.resolve_clustered_accession("GCA1", 9), None);
        assert_eq!(store.resolve_clustered_accession("GCA2", 9), Some(9));
    }

    #[test]
    fn append_operation_deduplicates_by_id() {
        let mut store = VariantStore::default();
        let op = VariantOperation::merged("GCA1", vec![rs("h3", 3)], 3, 2, Utc::now());
        assert!(store.append_operation(op.clone()));
        assert!(!store.append_operation(op));
        assert_eq!(store.operations().len(), 1);
    }

    #[test]
    fn save_appends_only_new_operations() {
        let dir = temp_dir("save");
        let mut store = VariantStore::from_records(
            vec![ss("a", 1, Some(10))],
            vec![rs("h10", 10)],
            Vec::new(),
        );
        store.append_operation(VariantOperation::merged("GCA1", vec![rs("h3", 3)], 3, 10, Utc::now()));
        store.save_dir(&dir).expect("first save");
        assert!(store.pending_operations().is_empty());
        store.save_dir(&dir).expect("second save is a no-op for the log");

        let reloaded = VariantStore::load_dir(&dir).expect("reload");
        assert_eq!(reloaded.operations().len(), 1);
        assert_eq!(reloaded.submitted_len(), 1);
        assert_eq!(reloaded.clustered_len(), 1);
        assert_eq!(reloaded.members_of(10).len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn accession_ranges_see_documents_references_and_operations() {
        let mut store = VariantStore::from_records(
            vec![ss("a", 100, Some(20))],
            vec![rs("h10", 10)],
            Vec::new(),
        );
        store.append_operation(VariantOperation::merged("GCA1", vec![rs("h3", 30)], 30, 10, Utc::now()));

        assert!(store.has_accessions_in(AccessionCategory::Submitted, 100..110));
        assert!(!store.has_accessions_in(AccessionCategory::Submitted, 110..120));
        assert!(store.has_accessions_in(AccessionCategory::Clustered, 10..11));
        assert!(store.has_accessions_in(AccessionCategory::Clustered, 20..21));
        assert!(store.has_accessions_in(AccessionCategory::Clustered, 30..31));
        assert!(!store.has_accessions_in(AccessionCategory::Clustered, 40..50));
        assert_eq!(store.max_accession(AccessionCategory::Clustered), Some(20));
    }
}
