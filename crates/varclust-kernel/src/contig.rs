//! Contig naming: resolve any synonym of a contig to one canonical name.
//!
//! The same chromosome may be submitted as `chr1`, `1`, `CM000663.2` or
//! `NC_000001.11`. Hashing must see a single name for all of them.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::ValidationError;

/// All known names of one contig.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContigSynonyms {
    pub sequence_name: Option<String>,
    pub genbank: Option<String>,
    pub refseq: Option<String>,
    pub ucsc: Option<String>,
    pub identical_genbank_and_refseq: bool,
}

impl ContigSynonyms {
    /// Canonical name: GenBank, then RefSeq, then sequence name, then UCSC.
    pub fn canonical(&self) -> Option<&str> {
        self.genbank
            .as_deref()
            .or(self.refseq.as_deref())
            .or(self.sequence_name.as_deref())
            .or(self.ucsc.as_deref())
    }

    /// Whether the contig can be named in INSDC terms.
    pub fn has_insdc_name(&self) -> bool {
        self.genbank.is_some() || (self.refseq.is_some() && self.identical_genbank_and_refseq)
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        [
            self.sequence_name.as_deref(),
            self.genbank.as_deref(),
            self.refseq.as_deref(),
            self.ucsc.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

/// Lookup service for contig synonyms.
pub trait ContigResolver: Send + Sync {
    /// Resolve a raw contig name. `None` means the name is unknown.
    fn resolve(&self, raw: &str) -> Option<ContigSynonyms>;

    /// Canonical name for `raw`, or a validation error under strict policy.
    fn canonical_name(&self, raw: &str) -> Result<String, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::MissingField("contig"));
        }
        match self.resolve(raw) {
            Some(synonyms) => Ok(synonyms.canonical().unwrap_or(raw).to_string()),
            None => Ok(raw.to_string()),
        }
    }
}

/// Treats every raw name as already canonical.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

impl ContigResolver for PassthroughResolver {
    fn resolve(&self, raw: &str) -> Option<ContigSynonyms> {
        Some(ContigSynonyms {
            sequence_name: Some(raw.to_string()),
            ..ContigSynonyms::default()
        })
    }
}

/// Errors raised while loading a contig alias table.
#[derive(Debug, thiserror::Error)]
pub enum ContigTableError {
    #[error("{path}: I/O error: {message}")]
    Io { path: String, message: String },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// In-memory contig synonym table, typically loaded from an assembly report.
#[derive(Debug, Clone, Default)]
pub struct ContigAliasTable {
    entries: Vec<ContigSynonyms>,
    by_name: HashMap<String, usize>,
    strict: bool,
    require_insdc: bool,
}

impl ContigAliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown contigs become validation errors instead of passing through.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Reject contigs that have no INSDC-equivalent name.
    pub fn require_insdc(mut self, require: bool) -> Self {
        self.require_insdc = require;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a contig under every one of its names.
    pub fn insert(&mut self, synonyms: ContigSynonyms) {
        let index = self.entries.len();
        for name in synonyms.names() {
            self.by_name.insert(name.to_string(), index);
        }
        self.entries.push(synonyms);
    }

    /// Parse a tab-separated table.
    ///
    /// Columns: `sequence_name  genbank  refseq  ucsc  identical`. Empty
    /// cells and `na` mean absent; `identical` is `true`/`=` or anything else.
    /// Blank lines and `#` comments are skipped.
    pub fn from_tsv(reader: impl BufRead) -> Result<Self, ContigTableError> {
        let mut table = Self::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| ContigTableError::Parse {
                line: line_no + 1,
                message: e.to_string(),
            })?;
            let trimmed = line.trim_end();
            if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let cells: Vec<&str> = trimmed.split('\t').collect();
            if cells.len() < 4 {
                return Err(ContigTableError::Parse {
                    line: line_no + 1,
                    message: format!("expected at least 4 columns, got {}", cells.len()),
                });
            }
            let synonyms = ContigSynonyms {
                sequence_name: cell(cells[0]),
                genbank: cell(cells[1]),
                refseq: cell(cells[2]),
                ucsc: cell(cells[3]),
                identical_genbank_and_refseq: cells
                    .get(4)
                    .map(|v| matches!(v.trim(), "true" | "=" | "yes"))
                    .unwrap_or(false),
            };
            if synonyms.names().next().is_none() {
                return Err(ContigTableError::Parse {
                    line: line_no + 1,
                    message: "row names no contig".to_string(),
                });
            }
            table.insert(synonyms);
        }
        Ok(table)
    }

    pub fn from_tsv_path(path: impl AsRef<Path>) -> Result<Self, ContigTableError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ContigTableError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_tsv(BufReader::new(file))
    }
}

fn cell(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("na") {
        None
    } else {
        Some(value.to_string())
    }
}

impl ContigResolver for ContigAliasTable {
    fn resolve(&self, raw: &str) -> Option<ContigSynonyms> {
        self.by_name
            .get(raw.trim())
            .and_then(|&index| self.entries.get(index))
            .cloned()
    }

    fn canonical_name(&self, raw: &str) -> Result<String, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::MissingField("contig"));
        }
        match self.resolve(raw) {
            Some(synonyms) => {
                if self.require_insdc && !synonyms.has_insdc_name() {
                    return Err(ValidationError::NonInsdcContig(raw.to_string()));
                }
                Ok(synonyms.canonical().unwrap_or(raw).to_string())
            }
            None if self.strict => Err(ValidationError::UnknownContig(raw.to_string())),
            None => Ok(raw.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const REPORT: &str = "\
# sequence_name\tgenbank\trefseq\tucsc\tidentical
1\tCM000663.2\tNC_000001.11\tchr1\t=
MT\tna\tNC_012920.1\tchrM\t
";

    #[test]
    fn every_synonym_resolves_to_genbank() {
        let table = ContigAliasTable::from_tsv(Cursor::new(REPORT)).expect("table parses");
        assert_eq!(table.len(), 2);
        for raw in ["1", "chr1", "NC_000001.11", "CM000663.2"] {
            assert_eq!(table.canonical_name(raw).unwrap(), "CM000663.2");
        }
    }

    #[test]
    fn refseq_is_canonical_when_genbank_is_absent() {
        let table = ContigAliasTable::from_tsv(Cursor::new(REPORT)).expect("table parses");
        assert_eq!(table.canonical_name("chrM").unwrap(), "NC_012920.1");
    }

    #[test]
    fn strict_table_rejects_unknown_contigs() {
        let lenient = ContigAliasTable::from_tsv(Cursor::new(REPORT)).expect("table parses");
        assert_eq!(lenient.canonical_name("scaffold_9").unwrap(), "scaffold_9");

        let strict = lenient.clone().strict(true);
        assert_eq!(
            strict.canonical_name("scaffold_9"),
            Err(ValidationError::UnknownContig("scaffold_9".to_string()))
        );
    }

    #[test]
    fn insdc_policy_rejects_refseq_only_contigs() {
        let table = ContigAliasTable::from_tsv(Cursor::new(REPORT))
            .expect("table parses")
            .require_insdc(true);
        assert!(table.canonical_name("chr1").is_ok());
        assert_eq!(
            table.canonical_name("MT"),
            Err(ValidationError::NonInsdcContig("MT".to_string()))
        );
    }

    #[test]
    fn short_rows_are_rejected_with_line_number() {
        let err = ContigAliasTable::from_tsv(Cursor::new("chr1\tCM000663.2\n"))
            .expect_err("two columns is malformed");
        assert!(matches!(err, ContigTableError::Parse { line: 1, .. }));
    }
}
