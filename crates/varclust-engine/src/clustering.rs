//! Per-chunk clustering: validate, assign, merge, then split.
//!
//! ```text
//! inputs ──hash──▶ groups by clustering hash
//!                    │ none      → new RS
//!                    │ one       → repoint members
//!                    │ several   → lowest accession survives, others MERGED
//!                    ▼
//!                 split pass over touched RS
//! ```
//!
//! Every decision is a function of store state and hashes, so replaying a
//! chunk is a no-op.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use varclust_kernel::{ContentHash, IdentityHasher, SubmittedKey};
use varclust_store::{
    ClusteredVariant, SubmittedVariant, SubmittedVariantInput, VariantOperation, VariantStore,
    VariantStoreError,
};

use crate::config::{ClusteringPolicy, ConfigError, JobConfig};
use crate::cursor::ChunkCursors;
use crate::error::EngineError;
use crate::metrics::{
    CLUSTERED_VARIANTS_CREATED, CLUSTERED_VARIANTS_DEPRECATED,
    CLUSTERED_VARIANTS_INVARIANT_VIOLATIONS, CLUSTERED_VARIANTS_MERGE_OPERATIONS,
    CLUSTERED_VARIANTS_MERGED, CLUSTERED_VARIANTS_UPDATED, CounterMetrics, MetricsSink,
    SUBMITTED_VARIANTS_CREATED, SUBMITTED_VARIANTS_INVALID, SUBMITTED_VARIANTS_KEPT_UNCLUSTERED,
    SUBMITTED_VARIANTS_UPDATE_OPERATIONS, SUBMITTED_VARIANTS_UPDATED_RS,
};

/// What one chunk did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub records: usize,
    pub changed: bool,
    pub operations_appended: usize,
}

/// Submitted variants of one chunk sharing a clustering hash.
struct Group {
    assembly: String,
    key: SubmittedKey,
    members: BTreeSet<ContentHash>,
}

#[derive(Debug, Clone)]
pub struct ClusteringEngine {
    hasher: IdentityHasher,
    policy: ClusteringPolicy,
    full_split_scan: bool,
}

impl ClusteringEngine {
    pub fn new(hasher: IdentityHasher) -> Self {
        Self {
            hasher,
            policy: ClusteringPolicy::default(),
            full_split_scan: false,
        }
    }

    pub fn from_config(config: &JobConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.hasher()?)
            .with_policy(config.policy)
            .with_full_split_scan(config.full_split_scan))
    }

    pub fn with_policy(mut self, policy: ClusteringPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Re-check every RS in the store after each chunk, not only touched ones.
    pub fn with_full_split_scan(mut self, enabled: bool) -> Self {
        self.full_split_scan = enabled;
        self
    }

    pub fn hasher(&self) -> &IdentityHasher {
        &self.hasher
    }

    /// Cluster one chunk into `store`.
    ///
    /// New accessions come from `cursors`; counts go to `stats`. The caller
    /// persists the store and settles the cursors.
    pub fn process_chunk(
        &self,
        store: &mut VariantStore,
        inputs: &[SubmittedVariantInput],
        cursors: &mut ChunkCursors,
        stats: &CounterMetrics,
        now: DateTime<Utc>,
    ) -> Result<ChunkOutcome, EngineError> {
        let operations_before = store.operations().len();
        let mut writer = StoreWriter::new(store, stats, now);

        let mut groups: BTreeMap<ContentHash, Group> = BTreeMap::new();
        for input in inputs {
            let key = match self.hasher.submitted_key(&input.attributes()) {
                Ok(key) => key,
                Err(err) => {
                    tracing::warn!(
                        assembly = %input.assembly_accession,
                        contig = %input.contig,
                        start = input.start,
                        error = %err,
                        "skipping invalid submitted variant"
                    );
                    writer.count(SUBMITTED_VARIANTS_INVALID, 1);
                    continue;
                }
            };
            let ss = writer.ensure_submitted(input, &key, cursors)?;
            if !self.policy.admits(&ss.flags) {
                writer.repoint(&ss.hash, None, "Kept unclustered by clustering policy.")?;
                writer.count(SUBMITTED_VARIANTS_KEPT_UNCLUSTERED, 1);
                continue;
            }
            groups
                .entry(key.clustering_hash.clone())
                .or_insert_with(|| Group {
                    assembly: ss.assembly_accession.clone(),
                    key: key.clone(),
                    members: BTreeSet::new(),
                })
                .members
                .insert(ss.hash);
        }

        let mut touched = BTreeSet::new();
        for (hash, group) in &groups {
            let accession = Self::resolve_group(&mut writer, hash, group, cursors)?;
            touched.insert(accession);
        }

        let scope = if self.full_split_scan {
            writer
                .store
                .clustered_variants()
                .map(|rs| rs.accession)
                .collect()
        } else {
            touched
        };
        self.split_pass(&mut writer, scope, cursors)?;

        let changed = writer.changed;
        let outcome = ChunkOutcome {
            records: inputs.len(),
            changed,
            operations_appended: store.operations().len() - operations_before,
        };
        tracing::debug!(
            records = outcome.records,
            groups = groups.len(),
            operations = outcome.operations_appended,
            "processed chunk"
        );
        Ok(outcome)
    }

    /// Settle one clustering hash on a single RS accession; returns it.
    fn resolve_group(
        writer: &mut StoreWriter<'_>,
        group_hash: &ContentHash,
        group: &Group,
        cursors: &mut ChunkCursors,
    ) -> Result<u64, EngineError> {
        let mut candidates = BTreeSet::new();
        for hash in &group.members {
            if let Some(referenced) = writer
                .store
                .submitted(hash)
                .and_then(|ss| ss.clustered_variant_accession)
                && let Some(active) = writer
                    .store
                    .resolve_clustered_accession(&group.assembly, referenced)
            {
                candidates.insert(active);
            }
        }
        if let Some(rs) = writer.store.clustered(group_hash) {
            candidates.insert(rs.accession);
        }

        let mut ordered = candidates.into_iter();
        let Some(survivor) = ordered.next() else {
            let accession = cursors.clustered.next_accession()?;
            let first = writer.first_member(group)?;
            writer.insert_clustered(ClusteredVariant::from_submitted(
                accession,
                &first,
                &group.key,
                writer.now,
            ))?;
            writer.count(CLUSTERED_VARIANTS_CREATED, 1);
            tracing::debug!(rs = accession, assembly = %group.assembly, "created clustered variant");
            let reason = format!("Clustered into new rs{accession}.");
            for hash in &group.members {
                writer.repoint(hash, Some(accession), &reason)?;
            }
            return Ok(accession);
        };

        for loser in ordered {
            writer.merge(&group.assembly, loser, survivor)?;
        }
        writer.ensure_document(group_hash, group, survivor)?;
        let reason = format!("Clustered into rs{survivor}.");
        for hash in &group.members {
            writer.repoint(hash, Some(survivor), &reason)?;
        }
        Ok(survivor)
    }
}

/// Mutations of one chunk, with their operations and counters.
pub(crate) struct StoreWriter<'a> {
    pub(crate) store: &'a mut VariantStore,
    stats: &'a CounterMetrics,
    pub(crate) now: DateTime<Utc>,
    pub(crate) changed: bool,
}

impl<'a> StoreWriter<'a> {
    pub(crate) fn new(
        store: &'a mut VariantStore,
        stats: &'a CounterMetrics,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            stats,
            now,
            changed: false,
        }
    }

    pub(crate) fn count(&self, name: &str, by: u64) {
        self.stats.increment(name, by);
    }

    pub(crate) fn append(&mut self, op: VariantOperation) -> bool {
        let added = self.store.append_operation(op);
        self.changed |= added;
        added
    }

    pub(crate) fn insert_clustered(&mut self, rs: ClusteredVariant) -> Result<(), EngineError> {
        self.store.insert_clustered(rs)?;
        self.changed = true;
        Ok(())
    }

    pub(crate) fn remove_clustered(&mut self, hash: &ContentHash) -> Option<ClusteredVariant> {
        let removed = self.store.remove_clustered(hash);
        self.changed |= removed.is_some();
        removed
    }

    /// The stored record for `input`, created on first sight.
    fn ensure_submitted(
        &mut self,
        input: &SubmittedVariantInput,
        key: &SubmittedKey,
        cursors: &mut ChunkCursors,
    ) -> Result<SubmittedVariant, EngineError> {
        if let Some(existing) = self.store.submitted(&key.submitted_hash) {
            return Ok(existing.clone());
        }
        let accession = match input.accession {
            Some(accession) => accession,
            None => cursors.submitted.next_accession()?,
        };
        let legacy = input.clustered_variant_accession.and_then(|rs| {
            self.store
                .resolve_clustered_accession(&input.assembly_accession, rs)
        });
        let mut ss = input.clone().into_submitted(accession, key, self.now);
        ss.clustered_variant_accession = legacy;
        self.store.insert_submitted(ss.clone())?;
        self.changed = true;
        self.count(SUBMITTED_VARIANTS_CREATED, 1);
        Ok(ss)
    }

    fn first_member(&self, group: &Group) -> Result<SubmittedVariant, EngineError> {
        let hash = group
            .members
            .first()
            .ok_or_else(|| VariantStoreError::SubmittedNotFound(group.key.submitted_hash.clone()))?;
        self.store
            .submitted(hash)
            .cloned()
            .ok_or_else(|| VariantStoreError::SubmittedNotFound(hash.clone()).into())
    }

    /// Point an SS at `target`. Moving off an existing RS is recorded as an
    /// UPDATED operation on the SS.
    pub(crate) fn repoint(
        &mut self,
        hash: &ContentHash,
        target: Option<u64>,
        reason: &str,
    ) -> Result<bool, EngineError> {
        let prior = self
            .store
            .submitted(hash)
            .cloned()
            .ok_or_else(|| VariantStoreError::SubmittedNotFound(hash.clone()))?;
        if prior.clustered_variant_accession == target {
            return Ok(false);
        }
        let had_reference = prior.clustered_variant_accession.is_some();
        self.store.set_clustered_reference(hash, target)?;
        self.changed = true;
        if target.is_some() {
            self.count(SUBMITTED_VARIANTS_UPDATED_RS, 1);
        }
        if had_reference
            && self.append(VariantOperation::submitted_updated(
                prior, target, reason, self.now,
            ))
        {
            self.count(SUBMITTED_VARIANTS_UPDATE_OPERATIONS, 1);
        }
        Ok(true)
    }

    /// Merge RS `loser` into `survivor` within one assembly.
    pub(crate) fn merge(
        &mut self,
        assembly: &str,
        loser: u64,
        survivor: u64,
    ) -> Result<(), EngineError> {
        let snapshot: Vec<ClusteredVariant> = self
            .store
            .clustered_in_assembly(assembly, loser)
            .cloned()
            .into_iter()
            .collect();
        for rs in &snapshot {
            self.remove_clustered(&rs.hash);
        }
        self.merge_detached(assembly, snapshot, loser, survivor)
    }

    /// Merge whose loser documents were already taken out of the store.
    pub(crate) fn merge_detached(
        &mut self,
        assembly: &str,
        snapshot: Vec<ClusteredVariant>,
        loser: u64,
        survivor: u64,
    ) -> Result<(), EngineError> {
        let members: Vec<ContentHash> = self
            .store
            .members_in_assembly(assembly, loser)
            .into_iter()
            .map(|ss| ss.hash.clone())
            .collect();
        let reason = format!("Original rs{loser} was merged into rs{survivor}.");
        for hash in &members {
            self.repoint(hash, Some(survivor), &reason)?;
        }
        if self.append(VariantOperation::merged(
            assembly, snapshot, loser, survivor, self.now,
        )) {
            self.count(CLUSTERED_VARIANTS_MERGE_OPERATIONS, 1);
        }
        self.count(CLUSTERED_VARIANTS_MERGED, 1);
        tracing::info!(loser, survivor, assembly, "merged clustered variant");
        Ok(())
    }

    /// Make sure `accession` has its document in the group's assembly.
    fn ensure_document(
        &mut self,
        group_hash: &ContentHash,
        group: &Group,
        accession: u64,
    ) -> Result<(), EngineError> {
        let recorded = self
            .store
            .clustered_in_assembly(&group.assembly, accession)
            .map(|doc| doc.hash.clone());
        match recorded {
            Some(recorded) if recorded == *group_hash => Ok(()),
            Some(recorded) => {
                tracing::warn!(
                    rs = accession,
                    assembly = %group.assembly,
                    recorded = %recorded,
                    observed = %group_hash,
                    "clustered variant hash disagrees with its submitted variants"
                );
                self.count(CLUSTERED_VARIANTS_INVARIANT_VIOLATIONS, 1);
                Ok(())
            }
            None => {
                let first = self.first_member(group)?;
                self.insert_clustered(ClusteredVariant::from_submitted(
                    accession, &first, &group.key, self.now,
                ))?;
                tracing::debug!(
                    rs = accession,
                    assembly = %group.assembly,
                    "created clustered variant document for existing accession"
                );
                Ok(())
            }
        }
    }

    /// Store `prior` under a new locus, keeping its accession.
    pub(crate) fn rekey(
        &mut self,
        prior: &ClusteredVariant,
        key: &SubmittedKey,
        member: &SubmittedVariant,
    ) -> Result<(), EngineError> {
        let mut rekeyed =
            ClusteredVariant::from_submitted(prior.accession, member, key, prior.created_date);
        rekeyed.taxonomy_accession = prior.taxonomy_accession;
        rekeyed.validated = prior.validated;
        let reason = format!(
            "rs{} moved from {}:{} {} to {}:{} {}.",
            prior.accession,
            prior.contig,
            prior.start,
            prior.variant_type,
            rekeyed.contig,
            rekeyed.start,
            rekeyed.variant_type
        );
        self.insert_clustered(rekeyed)?;
        if self.append(VariantOperation::clustered_updated(
            prior.clone(),
            reason,
            self.now,
        )) {
            self.count(CLUSTERED_VARIANTS_UPDATED, 1);
        }
        Ok(())
    }
}

/// Retire RS `accession` in `assembly`: DEPRECATED operation, document
/// removed, members left unclustered.
pub fn deprecate(
    store: &mut VariantStore,
    assembly: &str,
    accession: u64,
    reason: &str,
    stats: &CounterMetrics,
    now: DateTime<Utc>,
) -> Result<VariantOperation, EngineError> {
    let prior = store
        .clustered_in_assembly(assembly, accession)
        .cloned()
        .ok_or_else(|| EngineError::ClusteredNotFound {
            accession,
            assembly: assembly.to_string(),
        })?;
    let mut writer = StoreWriter::new(store, stats, now);
    let members: Vec<ContentHash> = writer
        .store
        .members_in_assembly(assembly, accession)
        .into_iter()
        .map(|ss| ss.hash.clone())
        .collect();
    let member_reason = format!("rs{accession} was deprecated.");
    for hash in &members {
        writer.repoint(hash, None, &member_reason)?;
    }
    writer.remove_clustered(&prior.hash);
    let op = VariantOperation::deprecated(prior, reason, now);
    writer.append(op.clone());
    writer.count(CLUSTERED_VARIANTS_DEPRECATED, 1);
    tracing::info!(rs = accession, assembly, "deprecated clustered variant");
    Ok(op)
}
