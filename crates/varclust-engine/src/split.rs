//! Split pass: an RS whose members no longer share one clustering hash is
//! broken up by hash.
//!
//! The largest partition keeps the accession (ties go to the smallest hash).
//! Every other partition joins the active RS already stored at its hash, or
//! gets a fresh accession. If the keeping partition's hash is not the one the
//! RS was stored under, the document is re-keyed.

use std::collections::{BTreeMap, BTreeSet};
use varclust_kernel::{ContentHash, SubmittedKey};
use varclust_store::{ClusteredVariant, SubmittedVariant, VariantOperation};

use crate::clustering::{ClusteringEngine, StoreWriter};
use crate::cursor::ChunkCursors;
use crate::error::EngineError;
use crate::metrics::{CLUSTERED_VARIANTS_RS_SPLIT, SUBMITTED_VARIANTS_SS_SPLIT};

type Partitions = BTreeMap<ContentHash, (SubmittedKey, Vec<SubmittedVariant>)>;

impl ClusteringEngine {
    /// Check every RS accession in `scope`, across its assemblies.
    pub(crate) fn split_pass(
        &self,
        writer: &mut StoreWriter<'_>,
        scope: BTreeSet<u64>,
        cursors: &mut ChunkCursors,
    ) -> Result<(), EngineError> {
        let mut queue = scope;
        while let Some(accession) = queue.pop_first() {
            let documents: Vec<ClusteredVariant> = writer
                .store
                .clustered_by_accession(accession)
                .into_iter()
                .cloned()
                .collect();
            for doc in documents {
                // An RS that absorbed another one is checked again.
                if let Some(absorber) = self.split_document(writer, doc, cursors)? {
                    queue.insert(absorber);
                }
            }
        }
        Ok(())
    }

    fn partition_members(&self, writer: &StoreWriter<'_>, doc: &ClusteredVariant) -> Partitions {
        let mut partitions = Partitions::new();
        for ss in writer
            .store
            .members_in_assembly(&doc.assembly_accession, doc.accession)
        {
            match self.hasher().submitted_key(&ss.attributes()) {
                Ok(key) => partitions
                    .entry(key.clustering_hash.clone())
                    .or_insert_with(|| (key, Vec::new()))
                    .1
                    .push(ss.clone()),
                Err(err) => tracing::warn!(
                    ss = ss.accession,
                    rs = doc.accession,
                    error = %err,
                    "stored submitted variant no longer hashes; leaving it in place"
                ),
            }
        }
        partitions
    }

    fn split_document(
        &self,
        writer: &mut StoreWriter<'_>,
        doc: ClusteredVariant,
        cursors: &mut ChunkCursors,
    ) -> Result<Option<u64>, EngineError> {
        let mut partitions = self.partition_members(writer, &doc);
        let Some(keeper_hash) = partitions
            .iter()
            .max_by(|a, b| {
                a.1.1
                    .len()
                    .cmp(&b.1.1.len())
                    .then_with(|| b.0.cmp(a.0))
            })
            .map(|(hash, _)| hash.clone())
        else {
            return Ok(None);
        };
        if partitions.len() == 1 && keeper_hash == doc.hash {
            return Ok(None);
        }
        let Some((keeper_key, keeper_members)) = partitions.remove(&keeper_hash) else {
            return Ok(None);
        };

        let rekey = keeper_hash != doc.hash;
        if rekey {
            writer.remove_clustered(&doc.hash);
        }

        let mut split_into = Vec::new();
        for (hash, (key, members)) in partitions {
            let existing = writer.store.clustered(&hash).map(|rs| rs.accession);
            let target = match existing {
                Some(accession) => accession,
                None => {
                    let accession = cursors.clustered.next_accession()?;
                    writer.insert_clustered(ClusteredVariant::from_submitted(
                        accession,
                        &members[0],
                        &key,
                        writer.now,
                    ))?;
                    accession
                }
            };
            let reason = format!("rs{} split into rs{target}.", doc.accession);
            for ss in &members {
                if writer.repoint(&ss.hash, Some(target), &reason)? {
                    writer.count(SUBMITTED_VARIANTS_SS_SPLIT, 1);
                }
            }
            split_into.push(target);
        }
        if !split_into.is_empty() {
            tracing::info!(
                rs = doc.accession,
                assembly = %doc.assembly_accession,
                into = ?split_into,
                "split clustered variant"
            );
            writer.append(VariantOperation::split(doc.clone(), split_into, writer.now));
            writer.count(CLUSTERED_VARIANTS_RS_SPLIT, 1);
        }
        if !rekey {
            return Ok(None);
        }

        let holder = writer.store.clustered(&keeper_hash).map(|rs| rs.accession);
        match holder {
            None => {
                writer.rekey(&doc, &keeper_key, &keeper_members[0])?;
                Ok(None)
            }
            // The keeping partition coincides with an older RS: fold into it.
            Some(older) if older < doc.accession => {
                writer.merge_detached(
                    &doc.assembly_accession,
                    vec![doc.clone()],
                    doc.accession,
                    older,
                )?;
                Ok(None)
            }
            Some(newer) => {
                writer.merge(&doc.assembly_accession, newer, doc.accession)?;
                writer.rekey(&doc, &keeper_key, &keeper_members[0])?;
                Ok(Some(doc.accession))
            }
        }
    }
}
