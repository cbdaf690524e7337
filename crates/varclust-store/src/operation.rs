//! Operation log entries: the audit trail of every merge, split, update and
//! deprecation.
//!
//! An operation is written once and never edited. Its id is derived from the
//! inactivated object(s) and the transition, so replaying the same
//! transition after a crash yields the same id and is dropped on append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use varclust_kernel::ContentHash;

use crate::variant::{AccessionCategory, ClusteredVariant, SubmittedVariant};

pub const OPERATION_ID_PREFIX: &str = "op1_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Merged,
    Split,
    Updated,
    Deprecated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merged => "MERGED",
            Self::Split => "SPLIT",
            Self::Updated => "UPDATED",
            Self::Deprecated => "DEPRECATED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full prior state of a record made inactive (or changed) by an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InactiveObject {
    ClusteredVariant(ClusteredVariant),
    SubmittedVariant(SubmittedVariant),
}

impl InactiveObject {
    pub fn hash(&self) -> &ContentHash {
        match self {
            Self::ClusteredVariant(rs) => &rs.hash,
            Self::SubmittedVariant(ss) => &ss.hash,
        }
    }

    pub fn accession(&self) -> u64 {
        match self {
            Self::ClusteredVariant(rs) => rs.accession,
            Self::SubmittedVariant(ss) => ss.accession,
        }
    }

    /// RS reference held by the snapshot (the RS itself for clustered ones).
    fn clustered_reference(&self) -> Option<u64> {
        match self {
            Self::ClusteredVariant(rs) => Some(rs.accession),
            Self::SubmittedVariant(ss) => ss.clustered_variant_accession,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantOperation {
    pub id: String,
    pub event_type: EventType,
    pub category: AccessionCategory,
    pub accession: u64,
    /// Assembly the transition happened in. Merges and deprecations only
    /// hold within it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_accession: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub split_into: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustered_variant_accession: Option<u64>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub inactive_objects: Vec<InactiveObject>,
    pub created_date: DateTime<Utc>,
}

impl VariantOperation {
    /// RS `loser` was merged into RS `survivor` within `assembly`.
    pub fn merged(
        assembly: &str,
        losers: Vec<ClusteredVariant>,
        loser: u64,
        survivor: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            EventType::Merged,
            AccessionCategory::Clustered,
            Some(assembly.to_string()),
            loser,
            Some(survivor),
            Vec::new(),
            None,
            format!("Original rs{loser} was merged into rs{survivor}."),
            losers
                .into_iter()
                .map(InactiveObject::ClusteredVariant)
                .collect(),
            now,
        )
    }

    /// RS `prior` lost some members to new accessions `split_into`.
    pub fn split(prior: ClusteredVariant, split_into: Vec<u64>, now: DateTime<Utc>) -> Self {
        let accession = prior.accession;
        let targets = split_into
            .iter()
            .map(|acc| format!("rs{acc}"))
            .collect::<Vec<_>>()
            .join(", ");
        Self::build(
            EventType::Split,
            AccessionCategory::Clustered,
            Some(prior.assembly_accession.clone()),
            accession,
            None,
            split_into,
            None,
            format!("rs{accession} split into {targets}: members no longer share one locus."),
            vec![InactiveObject::ClusteredVariant(prior)],
            now,
        )
    }

    /// RS `prior` was re-keyed to a new locus without changing accession.
    pub fn clustered_updated(
        prior: ClusteredVariant,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            EventType::Updated,
            AccessionCategory::Clustered,
            Some(prior.assembly_accession.clone()),
            prior.accession,
            None,
            Vec::new(),
            Some(prior.accession),
            reason.into(),
            vec![InactiveObject::ClusteredVariant(prior)],
            now,
        )
    }

    /// SS `prior` was repointed to RS `clustered_into`.
    pub fn submitted_updated(
        prior: SubmittedVariant,
        clustered_into: Option<u64>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            EventType::Updated,
            AccessionCategory::Submitted,
            Some(prior.assembly_accession.clone()),
            prior.accession,
            None,
            Vec::new(),
            clustered_into,
            reason.into(),
            vec![InactiveObject::SubmittedVariant(prior)],
            now,
        )
    }

    /// RS `prior` was retired with no successor.
    pub fn deprecated(
        prior: ClusteredVariant,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            EventType::Deprecated,
            AccessionCategory::Clustered,
            Some(prior.assembly_accession.clone()),
            prior.accession,
            None,
            Vec::new(),
            None,
            reason.into(),
            vec![InactiveObject::ClusteredVariant(prior)],
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        event_type: EventType,
        category: AccessionCategory,
        assembly_accession: Option<String>,
        accession: u64,
        merged_into: Option<u64>,
        split_into: Vec<u64>,
        clustered_variant_accession: Option<u64>,
        reason: String,
        inactive_objects: Vec<InactiveObject>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = operation_id(
            event_type,
            category,
            assembly_accession.as_deref(),
            accession,
            merged_into,
            &split_into,
            clustered_variant_accession,
            &inactive_objects,
        );
        Self {
            id,
            event_type,
            category,
            accession,
            assembly_accession,
            merged_into,
            split_into,
            clustered_variant_accession,
            reason,
            inactive_objects,
            created_date: now,
        }
    }

    /// Assembly this operation applies to, falling back to its snapshots.
    pub fn assembly(&self) -> Option<&str> {
        self.assembly_accession.as_deref().or_else(|| {
            self.inactive_objects.iter().find_map(|object| match object {
                InactiveObject::ClusteredVariant(rs) => Some(rs.assembly_accession.as_str()),
                InactiveObject::SubmittedVariant(ss) => Some(ss.assembly_accession.as_str()),
            })
        })
    }

    /// Every accession this operation mentions, subject first.
    pub fn accessions(&self) -> impl Iterator<Item = u64> + '_ {
        std::iter::once(self.accession)
            .chain(self.merged_into)
            .chain(self.split_into.iter().copied())
    }

    /// RS accessions this operation mentions.
    pub fn clustered_accessions(&self) -> Vec<u64> {
        let mut out = Vec::new();
        if self.category == AccessionCategory::Clustered {
            out.extend(self.accessions());
        }
        out.extend(self.clustered_variant_accession);
        out.extend(
            self.inactive_objects
                .iter()
                .filter_map(InactiveObject::clustered_reference),
        );
        out
    }
}

#[allow(clippy::too_many_arguments)]
fn operation_id(
    event_type: EventType,
    category: AccessionCategory,
    assembly: Option<&str>,
    accession: u64,
    merged_into: Option<u64>,
    split_into: &[u64],
    clustered_variant_accession: Option<u64>,
    inactive_objects: &[InactiveObject],
) -> String {
    let mut builder = ContentHash::builder()
        .field("event", event_type.as_str())
        .field("category", category.as_str())
        .field_opt("assembly", assembly)
        .field_u64("accession", accession)
        .field_opt(
            "merged_into",
            merged_into.map(|acc| acc.to_string()).as_deref(),
        )
        .field_opt(
            "clustered_into",
            clustered_variant_accession
                .map(|acc| acc.to_string())
                .as_deref(),
        );
    for target in split_into {
        builder = builder.field_u64("split_into", *target);
    }
    for object in inactive_objects {
        builder = builder
            .field("inactive", object.hash().as_str())
            .field_opt(
                "inactive_rs",
                object
                    .clustered_reference()
                    .map(|acc| acc.to_string())
                    .as_deref(),
            );
    }
    let digest = builder.finish();
    format!("{OPERATION_ID_PREFIX}{}", &digest.as_str()[..32])
}
