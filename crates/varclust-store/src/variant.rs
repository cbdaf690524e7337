//! Submitted (SS) and clustered (RS) variant records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use varclust_kernel::{
    ClusteredAttributes, ContentHash, SubmittedAttributes, SubmittedKey, VariantType,
};

/// Which accession sequence an identifier is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessionCategory {
    #[serde(rename = "RS")]
    Clustered,
    #[serde(rename = "SS")]
    Submitted,
}

impl AccessionCategory {
    pub const ALL: [AccessionCategory; 2] = [Self::Clustered, Self::Submitted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clustered => "RS",
            Self::Submitted => "SS",
        }
    }

    /// Lowercase token used in file names.
    pub fn file_token(&self) -> &'static str {
        match self {
            Self::Clustered => "rs",
            Self::Submitted => "ss",
        }
    }
}

impl fmt::Display for AccessionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rs" | "clustered" => Ok(Self::Clustered),
            "ss" | "submitted" => Ok(Self::Submitted),
            other => Err(format!("unknown accession category: {other} (expected rs or ss)")),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Evidence flags carried by a submitted variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedFlags {
    #[serde(default = "default_true")]
    pub supported_by_evidence: bool,
    #[serde(default = "default_true")]
    pub assembly_match: bool,
    #[serde(default = "default_true")]
    pub alleles_match: bool,
    #[serde(default)]
    pub validated: bool,
}

impl Default for SubmittedFlags {
    fn default() -> Self {
        Self {
            supported_by_evidence: true,
            assembly_match: true,
            alleles_match: true,
            validated: false,
        }
    }
}

/// A persisted submitted variant. Stored under its content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedVariant {
    pub accession: u64,
    pub hash: ContentHash,
    pub assembly_accession: String,
    pub taxonomy_accession: u32,
    pub project_accession: String,
    pub contig: String,
    pub start: u64,
    #[serde(default)]
    pub reference_allele: String,
    #[serde(default)]
    pub alternate_allele: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustered_variant_accession: Option<u64>,
    #[serde(flatten)]
    pub flags: SubmittedFlags,
    #[serde(default = "default_timestamp")]
    pub created_date: DateTime<Utc>,
}

impl SubmittedVariant {
    pub fn attributes(&self) -> SubmittedAttributes<'_> {
        SubmittedAttributes {
            assembly: &self.assembly_accession,
            project: &self.project_accession,
            contig: &self.contig,
            start: self.start,
            reference: &self.reference_allele,
            alternate: &self.alternate_allele,
        }
    }
}

/// A submitted variant as it arrives from ingestion.
///
/// `accession` is present for records that already own an SS id (remapped
/// or imported); `clustered_variant_accession` is present for imports that
/// carry a legacy RS reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedVariantInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accession: Option<u64>,
    #[serde(default)]
    pub assembly_accession: String,
    #[serde(default)]
    pub taxonomy_accession: u32,
    #[serde(default)]
    pub project_accession: String,
    #[serde(default)]
    pub contig: String,
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub reference_allele: String,
    #[serde(default)]
    pub alternate_allele: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustered_variant_accession: Option<u64>,
    #[serde(flatten)]
    pub flags: SubmittedFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
}

impl SubmittedVariantInput {
    pub fn new(
        assembly: impl Into<String>,
        project: impl Into<String>,
        contig: impl Into<String>,
        start: u64,
        reference: impl Into<String>,
        alternate: impl Into<String>,
    ) -> Self {
        Self {
            accession: None,
            assembly_accession: assembly.into(),
            taxonomy_accession: 0,
            project_accession: project.into(),
            contig: contig.into(),
            start,
            reference_allele: reference.into(),
            alternate_allele: alternate.into(),
            clustered_variant_accession: None,
            flags: SubmittedFlags::default(),
            created_date: None,
        }
    }

    pub fn attributes(&self) -> SubmittedAttributes<'_> {
        SubmittedAttributes {
            assembly: &self.assembly_accession,
            project: &self.project_accession,
            contig: &self.contig,
            start: self.start,
            reference: &self.reference_allele,
            alternate: &self.alternate_allele,
        }
    }

    /// Materialize the persisted record from normalized identity.
    pub fn into_submitted(
        self,
        accession: u64,
        key: &SubmittedKey,
        now: DateTime<Utc>,
    ) -> SubmittedVariant {
        SubmittedVariant {
            accession,
            hash: key.submitted_hash.clone(),
            assembly_accession: self.assembly_accession.trim().to_string(),
            taxonomy_accession: self.taxonomy_accession,
            project_accession: self.project_accession.trim().to_string(),
            contig: key.canonical_contig.clone(),
            start: self.start,
            reference_allele: key.reference.clone(),
            alternate_allele: key.alternate.clone(),
            clustered_variant_accession: None,
            flags: self.flags,
            created_date: self.created_date.unwrap_or(now),
        }
    }
}

/// A persisted clustered variant. Stored under its content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteredVariant {
    pub accession: u64,
    pub hash: ContentHash,
    pub assembly_accession: String,
    #[serde(default)]
    pub taxonomy_accession: u32,
    pub contig: String,
    pub start: u64,
    #[serde(rename = "type")]
    pub variant_type: VariantType,
    #[serde(default)]
    pub validated: bool,
    #[serde(default = "default_timestamp")]
    pub created_date: DateTime<Utc>,
}

impl ClusteredVariant {
    /// Build the RS that a submitted variant clusters into.
    pub fn from_submitted(
        accession: u64,
        submitted: &SubmittedVariant,
        key: &SubmittedKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            accession,
            hash: key.clustering_hash.clone(),
            assembly_accession: submitted.assembly_accession.clone(),
            taxonomy_accession: submitted.taxonomy_accession,
            contig: key.canonical_contig.clone(),
            start: submitted.start,
            variant_type: key.variant_type,
            validated: false,
            created_date: now,
        }
    }

    pub fn attributes(&self) -> ClusteredAttributes<'_> {
        ClusteredAttributes {
            assembly: &self.assembly_accession,
            contig: &self.contig,
            start: self.start,
            variant_type: self.variant_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_flags_default_to_supported() {
        let input: SubmittedVariantInput = serde_json::from_str(
            r#"{"assemblyAccession":"GCA1","projectAccession":"PRJ1","contig":"chr1","start":100,"referenceAllele":"C","alternateAllele":"T"}"#,
        )
        .expect("input should parse");
        assert!(input.flags.supported_by_evidence);
        assert!(input.flags.assembly_match);
        assert!(input.flags.alleles_match);
        assert!(!input.flags.validated);
        assert_eq!(input.accession, None);
    }

    #[test]
    fn flags_are_flattened_into_the_record() {
        let mut input = SubmittedVariantInput::new("GCA1", "PRJ1", "chr1", 100, "C", "T");
        input.flags.supported_by_evidence = false;
        let value = serde_json::to_value(&input).expect("input serializes");
        assert_eq!(value["supportedByEvidence"], false);
        assert!(value.get("flags").is_none());
    }

    #[test]
    fn category_parses_both_spellings() {
        assert_eq!("rs".parse::<AccessionCategory>(), Ok(AccessionCategory::Clustered));
        assert_eq!("SS".parse::<AccessionCategory>(), Ok(AccessionCategory::Submitted));
        assert!("xx".parse::<AccessionCategory>().is_err());
        assert_eq!(
            serde_json::to_string(&AccessionCategory::Clustered).unwrap(),
            "\"RS\""
        );
    }
}
