//! Content digests: the identity keys SS and RS records are stored under.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a rendered digest (SHA-256, lowercase hex).
pub const DIGEST_HEX_LEN: usize = 64;

/// Fixed-length content digest of a variant's normalized attributes.
///
/// Two records with the same `ContentHash` denote the same variant.
/// Ordering is lexicographic over the hex rendering, which is what split
/// tie-breaks rely on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn builder() -> ContentHashBuilder {
        ContentHashBuilder {
            sha: Sha256::new(),
            fields: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this looks like a digest produced by this crate.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == DIGEST_HEX_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Digest over named fields, fed in a fixed order.
///
/// Names and values are length-prefixed, so no choice of values can make two
/// different field lists encode to the same byte stream.
pub struct ContentHashBuilder {
    sha: Sha256,
    fields: u32,
}

impl ContentHashBuilder {
    fn chunk(&mut self, bytes: &[u8]) {
        self.sha.update((bytes.len() as u64).to_be_bytes());
        self.sha.update(bytes);
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.chunk(name.as_bytes());
        self.chunk(value.as_bytes());
        self.fields += 1;
        self
    }

    pub fn field_u64(self, name: &str, value: u64) -> Self {
        self.field(name, &value.to_string())
    }

    /// Absent values contribute nothing.
    pub fn field_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.field(name, v),
            None => self,
        }
    }

    pub fn finish(mut self) -> ContentHash {
        // Field count last, so a prefix of a field list never shares a digest with it.
        let fields = self.fields;
        self.sha.update(fields.to_be_bytes());
        ContentHash(hex(&self.sha.finalize()))
    }
}

fn hex(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_is_stable_and_well_formed() {
        let digest = || {
            ContentHash::builder()
                .field("assembly", "GCA_000001405.15")
                .field_u64("start", 100)
                .finish()
        };
        let a = digest();
        assert_eq!(a, digest());
        assert!(a.is_well_formed());
        assert_eq!(a.as_str().len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn field_boundaries_are_part_of_the_digest() {
        let left = ContentHash::builder().field("a", "bc").finish();
        let right = ContentHash::builder().field("ab", "c").finish();
        assert_ne!(left, right);

        let split = ContentHash::builder().field("x", "1").field("y", "2").finish();
        let joined = ContentHash::builder().field("x", "1y2").finish();
        assert_ne!(split, joined);
    }

    #[test]
    fn absent_optional_field_is_skipped() {
        let plain = ContentHash::builder().field("x", "1").finish();
        let with_none = ContentHash::builder()
            .field("x", "1")
            .field_opt("y", None)
            .finish();
        assert_eq!(plain, with_none);
        assert!(!ContentHash("XYZ".into()).is_well_formed());
    }
}
