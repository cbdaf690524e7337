//! Allele normalization and variant-type classification.
//!
//! Clustering keys on the variant *type*, not the alleles, so that e.g. a
//! C>T and a C>G submission at the same locus land in the same RS.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Nucleotide codes accepted in an allele (IUPAC, uppercase).
const IUPAC_CODES: &[u8] = b"ACGTNRYSWKMBDHV";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantType {
    Snv,
    Mnv,
    Ins,
    Del,
    Indel,
    SequenceAlteration,
    NoSequenceAlteration,
}

impl VariantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snv => "SNV",
            Self::Mnv => "MNV",
            Self::Ins => "INS",
            Self::Del => "DEL",
            Self::Indel => "INDEL",
            Self::SequenceAlteration => "SEQUENCE_ALTERATION",
            Self::NoSequenceAlteration => "NO_SEQUENCE_ALTERATION",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SNV" => Ok(Self::Snv),
            "MNV" => Ok(Self::Mnv),
            "INS" => Ok(Self::Ins),
            "DEL" => Ok(Self::Del),
            "INDEL" => Ok(Self::Indel),
            "SEQUENCE_ALTERATION" => Ok(Self::SequenceAlteration),
            "NO_SEQUENCE_ALTERATION" => Ok(Self::NoSequenceAlteration),
            other => Err(format!("unknown variant type: {other}")),
        }
    }
}

/// Normalize one allele: trim, uppercase, `-`/`.` as the empty allele.
///
/// Symbolic alleles (`<DEL>`, `<INS:ME>`) are kept verbatim after
/// uppercasing.
pub fn normalize_allele(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed == "-" || trimmed == "." {
        return Ok(String::new());
    }
    let upper = trimmed.to_ascii_uppercase();
    if is_symbolic(&upper) {
        return Ok(upper);
    }
    if let Some(bad) = upper.bytes().find(|b| !IUPAC_CODES.contains(b)) {
        let reason = if bad.is_ascii_whitespace() {
            "embedded whitespace"
        } else {
            "not a nucleotide code"
        };
        return Err(ValidationError::InvalidAllele {
            allele: raw.to_string(),
            reason,
        });
    }
    Ok(upper)
}

fn is_symbolic(allele: &str) -> bool {
    allele.len() > 2 && allele.starts_with('<') && allele.ends_with('>')
}

/// Classify a pair of already-normalized alleles.
pub fn classify(reference: &str, alternate: &str) -> VariantType {
    if is_symbolic(reference) || is_symbolic(alternate) {
        return VariantType::SequenceAlteration;
    }
    if reference == alternate {
        return VariantType::NoSequenceAlteration;
    }
    match (reference.len(), alternate.len()) {
        (1, 1) => VariantType::Snv,
        (0, _) => VariantType::Ins,
        (_, 0) => VariantType::Del,
        (r, a) if r == a => VariantType::Mnv,
        _ => VariantType::Indel,
    }
}
