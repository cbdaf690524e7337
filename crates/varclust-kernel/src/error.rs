//! Error types for identity hashing.

/// A variant record that cannot be hashed.
///
/// Raised per record; callers skip the record and continue the batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required attribute is empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Positions are 1-based.
    #[error("start position must be >= 1 (got {0})")]
    InvalidStart(u64),

    /// Both alleles normalized to nothing.
    #[error("reference and alternate alleles are both empty")]
    EmptyAlleles,

    /// An allele holds characters outside the nucleotide alphabet.
    #[error("invalid allele {allele:?}: {reason}")]
    InvalidAllele { allele: String, reason: &'static str },

    /// A strict resolver does not know the contig.
    #[error("unknown contig: {0}")]
    UnknownContig(String),

    /// The contig has no INSDC (GenBank) equivalent.
    #[error("contig {0} has no INSDC-equivalent name")]
    NonInsdcContig(String),
}
