//! # varclust kernel
//!
//! Identity for genomic variants: a submitted variant (SS) and the clustered
//! variant (RS) it belongs to are both named by a content digest over their
//! normalized attributes, never by their accession.
//!
//! ## Architecture
//!
//! ```text
//! ContigResolver        ← synonym lookup (chr1 / 1 / CM000663.2 / NC_000001.11)
//!     │
//! normalize_allele      ← uppercase, `-` as empty, IUPAC check
//!     │
//! classify              ← SNV / MNV / INS / DEL / INDEL / …
//!     │
//! IdentityHasher        ← SS hash (alleles) and clustering hash (type)
//!     │
//! ContentHash           ← SHA-256 over named fields
//! ```
//!
//! Everything here is pure. The only failure is `ValidationError` for a
//! malformed record.

pub mod contig;
pub mod digest;
pub mod error;
pub mod hasher;
pub mod variant_type;

pub use contig::{
    ContigAliasTable, ContigResolver, ContigSynonyms, ContigTableError, PassthroughResolver,
};
pub use digest::{ContentHash, ContentHashBuilder, DIGEST_HEX_LEN};
pub use error::ValidationError;
pub use hasher::{ClusteredAttributes, IdentityHasher, SubmittedAttributes, SubmittedKey};
pub use variant_type::{VariantType, classify, normalize_allele};
