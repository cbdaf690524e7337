//! Identity hashing for submitted (SS) and clustered (RS) variants.

use std::sync::Arc;

use crate::contig::{ContigResolver, PassthroughResolver};
use crate::digest::ContentHash;
use crate::error::ValidationError;
use crate::variant_type::{VariantType, classify, normalize_allele};

const SUBMITTED_KIND: &str = "submitted_variant";
const CLUSTERED_KIND: &str = "clustered_variant";

/// Raw attributes of a submitted variant, as stored or submitted.
#[derive(Debug, Clone, Copy)]
pub struct SubmittedAttributes<'a> {
    pub assembly: &'a str,
    pub project: &'a str,
    pub contig: &'a str,
    pub start: u64,
    pub reference: &'a str,
    pub alternate: &'a str,
}

/// Raw attributes of a clustered variant.
#[derive(Debug, Clone, Copy)]
pub struct ClusteredAttributes<'a> {
    pub assembly: &'a str,
    pub contig: &'a str,
    pub start: u64,
    pub variant_type: VariantType,
}

/// Everything the engine needs to know about one submitted variant's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedKey {
    /// Identity of the SS record itself.
    pub submitted_hash: ContentHash,
    /// Identity of the RS the SS belongs in.
    pub clustering_hash: ContentHash,
    pub canonical_contig: String,
    pub reference: String,
    pub alternate: String,
    pub variant_type: VariantType,
}

/// Pure, deterministic hashing over normalized variant attributes.
#[derive(Clone)]
pub struct IdentityHasher {
    resolver: Arc<dyn ContigResolver>,
}

impl Default for IdentityHasher {
    fn default() -> Self {
        Self::new(Arc::new(PassthroughResolver))
    }
}

impl std::fmt::Debug for IdentityHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityHasher").finish_non_exhaustive()
    }
}

impl IdentityHasher {
    pub fn new(resolver: Arc<dyn ContigResolver>) -> Self {
        Self { resolver }
    }

    /// Normalize and hash a submitted variant.
    pub fn submitted_key(
        &self,
        attrs: &SubmittedAttributes<'_>,
    ) -> Result<SubmittedKey, ValidationError> {
        let assembly = required("assembly", attrs.assembly)?;
        let project = required("project", attrs.project)?;
        if attrs.start == 0 {
            return Err(ValidationError::InvalidStart(attrs.start));
        }
        let canonical_contig = self.resolver.canonical_name(attrs.contig)?;
        let reference = normalize_allele(attrs.reference)?;
        let alternate = normalize_allele(attrs.alternate)?;
        if reference.is_empty() && alternate.is_empty() {
            return Err(ValidationError::EmptyAlleles);
        }
        let variant_type = classify(&reference, &alternate);

        let submitted_hash = ContentHash::builder()
            .field("kind", SUBMITTED_KIND)
            .field("assembly", assembly)
            .field("project", project)
            .field("contig", &canonical_contig)
            .field_u64("start", attrs.start)
            .field("reference", &reference)
            .field("alternate", &alternate)
            .finish();
        let clustering_hash =
            clustered_digest(assembly, &canonical_contig, attrs.start, variant_type);

        Ok(SubmittedKey {
            submitted_hash,
            clustering_hash,
            canonical_contig,
            reference,
            alternate,
            variant_type,
        })
    }

    /// Hash of the RS a submitted variant clusters into.
    pub fn clustering_hash(
        &self,
        attrs: &SubmittedAttributes<'_>,
    ) -> Result<ContentHash, ValidationError> {
        self.submitted_key(attrs).map(|key| key.clustering_hash)
    }

    /// Hash of a clustered variant under its own hashing function.
    pub fn clustered_hash(
        &self,
        attrs: &ClusteredAttributes<'_>,
    ) -> Result<ContentHash, ValidationError> {
        let assembly = required("assembly", attrs.assembly)?;
        if attrs.start == 0 {
            return Err(ValidationError::InvalidStart(attrs.start));
        }
        let canonical_contig = self.resolver.canonical_name(attrs.contig)?;
        Ok(clustered_digest(
            assembly,
            &canonical_contig,
            attrs.start,
            attrs.variant_type,
        ))
    }

    /// Canonical contig name under this hasher's resolver.
    pub fn canonical_contig(&self, raw: &str) -> Result<String, ValidationError> {
        self.resolver.canonical_name(raw)
    }
}

fn required<'a>(name: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ValidationError::MissingField(name))
    } else {
        Ok(trimmed)
    }
}

fn clustered_digest(
    assembly: &str,
    contig: &str,
    start: u64,
    variant_type: VariantType,
) -> ContentHash {
    ContentHash::builder()
        .field("kind", CLUSTERED_KIND)
        .field("assembly", assembly)
        .field("contig", contig)
        .field_u64("start", start)
        .field("type", variant_type.as_str())
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contig::{ContigAliasTable, ContigSynonyms};

    fn attrs<'a>(contig: &'a str, reference: &'a str, alternate: &'a str) -> SubmittedAttributes<'a> {
        SubmittedAttributes {
            assembly: "GCA_000001405.15",
            project: "PRJEB1",
            contig,
            start: 100,
            reference,
            alternate,
        }
    }

    fn grch38_table() -> ContigAliasTable {
        let mut table = ContigAliasTable::new();
        table.insert(ContigSynonyms {
            sequence_name: Some("1".to_string()),
            genbank: Some("CM000663.2".to_string()),
            refseq: Some("NC_000001.11".to_string()),
            ucsc: Some("chr1".to_string()),
            identical_genbank_and_refseq: true,
        });
        table
    }

    #[test]
    fn allele_case_does_not_change_either_hash() {
        let hasher = IdentityHasher::default();
        let upper = hasher.submitted_key(&attrs("chr1", "C", "T")).unwrap();
        let lower = hasher.submitted_key(&attrs("chr1", "c", "t")).unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn contig_naming_convention_does_not_change_the_hash() {
        let hasher = IdentityHasher::new(Arc::new(grch38_table()));
        let ucsc = hasher.submitted_key(&attrs("chr1", "C", "T")).unwrap();
        let refseq = hasher.submitted_key(&attrs("NC_000001.11", "C", "T")).unwrap();
        let plain = hasher.submitted_key(&attrs("1", "c", "t")).unwrap();
        assert_eq!(ucsc.submitted_hash, refseq.submitted_hash);
        assert_eq!(ucsc.clustering_hash, plain.clustering_hash);
        assert_eq!(ucsc.canonical_contig, "CM000663.2");
    }

    #[test]
    fn different_alleles_of_one_type_share_the_clustering_hash() {
        let hasher = IdentityHasher::default();
        let c_t = hasher.submitted_key(&attrs("chr1", "C", "T")).unwrap();
        let c_g = hasher.submitted_key(&attrs("chr1", "C", "G")).unwrap();
        assert_ne!(c_t.submitted_hash, c_g.submitted_hash);
        assert_eq!(c_t.clustering_hash, c_g.clustering_hash);

        let deletion = hasher.submitted_key(&attrs("chr1", "CA", "-")).unwrap();
        assert_ne!(c_t.clustering_hash, deletion.clustering_hash);
    }

    #[test]
    fn clustering_hash_matches_clustered_hash_of_the_same_locus() {
        let hasher = IdentityHasher::default();
        let ss = hasher.clustering_hash(&attrs("chr1", "C", "T")).unwrap();
        let rs = hasher
            .clustered_hash(&ClusteredAttributes {
                assembly: "GCA_000001405.15",
                contig: "chr1",
                start: 100,
                variant_type: VariantType::Snv,
            })
            .unwrap();
        assert_eq!(ss, rs);
    }

    #[test]
    fn malformed_records_are_validation_errors() {
        let hasher = IdentityHasher::default();
        let mut missing_project = attrs("chr1", "C", "T");
        missing_project.project = " ";
        assert_eq!(
            hasher.submitted_key(&missing_project),
            Err(ValidationError::MissingField("project"))
        );

        let mut zero_start = attrs("chr1", "C", "T");
        zero_start.start = 0;
        assert_eq!(
            hasher.submitted_key(&zero_start),
            Err(ValidationError::InvalidStart(0))
        );

        assert_eq!(
            hasher.submitted_key(&attrs("chr1", "-", ".")),
            Err(ValidationError::EmptyAlleles)
        );
        assert_eq!(
            hasher.submitted_key(&attrs("", "C", "T")),
            Err(ValidationError::MissingField("contig"))
        );
    }
}
