//! Hash value types.
//!
//! A [`FileHash`] couples a digest algorithm with a validated lowercase hex
//! string. The inner fields are private to guarantee every constructed value
//! went through validation, so downstream code never re-checks.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{StoreError, StoreResult};

/// Digest algorithms Vigil indexes signatures under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha1,
    Md5,
}

impl HashAlgorithm {
    /// Expected hex length for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Md5 => 32,
        }
    }

    /// Stable lowercase name, also the storage key prefix component.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Md5 => "md5",
        }
    }

    /// Storage key prefix (`"sha256:"` etc.).
    pub fn key_prefix(&self) -> String {
        format!("{}:", self.as_str())
    }

    /// All supported algorithms, used when walking every keyspace.
    pub fn all() -> [HashAlgorithm; 3] {
        [HashAlgorithm::Sha256, HashAlgorithm::Sha1, HashAlgorithm::Md5]
    }

    fn for_hex_len(len: usize) -> Option<HashAlgorithm> {
        match len {
            64 => Some(HashAlgorithm::Sha256),
            40 => Some(HashAlgorithm::Sha1),
            32 => Some(HashAlgorithm::Md5),
            _ => None,
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated file hash: algorithm + lowercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHash {
    algorithm: HashAlgorithm,
    hex: String,
}

impl FileHash {
    /// Parse a bare hex string, inferring the algorithm from its length.
    ///
    /// Trims surrounding whitespace and lowercases. Rejects non-hex
    /// characters and lengths that match no supported algorithm.
    pub fn parse(value: &str) -> StoreResult<Self> {
        let trimmed = value.trim();
        let algorithm =
            HashAlgorithm::for_hex_len(trimmed.len()).ok_or_else(|| StoreError::InvalidHash {
                value: trimmed.to_string(),
                reason: format!("length {} matches no supported digest", trimmed.len()),
            })?;
        Self::new(algorithm, trimmed)
    }

    /// Build a hash of a known algorithm, validating hex and length.
    pub fn new(algorithm: HashAlgorithm, hex: &str) -> StoreResult<Self> {
        let trimmed = hex.trim();
        if trimmed.len() != algorithm.hex_len() {
            return Err(StoreError::InvalidHash {
                value: trimmed.to_string(),
                reason: format!(
                    "expected {} hex chars for {}, got {}",
                    algorithm.hex_len(),
                    algorithm,
                    trimmed.len()
                ),
            });
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StoreError::InvalidHash {
                value: trimmed.to_string(),
                reason: "non-hex character".to_string(),
            });
        }
        Ok(FileHash {
            algorithm,
            hex: trimmed.to_ascii_lowercase(),
        })
    }

    /// Compute the SHA-256 hash of the given bytes.
    pub fn sha256_of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        FileHash {
            algorithm: HashAlgorithm::Sha256,
            hex: hex::encode(hasher.finalize()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The full lowercase hex string.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Composite storage key: `"<algorithm>:<hex>"`.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.algorithm.as_str(), self.hex)
    }

    /// Short form (first 12 hex chars), for log lines.
    pub fn short(&self) -> &str {
        &self.hex[..12.min(self.hex.len())]
    }
}

impl std::fmt::Display for FileHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EICAR_SHA256: &str = "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f";

    #[test]
    fn test_parse_infers_algorithm() {
        let h = FileHash::parse(EICAR_SHA256).unwrap();
        assert_eq!(h.algorithm(), HashAlgorithm::Sha256);
        assert_eq!(h.hex(), EICAR_SHA256);

        let h = FileHash::parse("3395856ce81f2b7382dee72602f798b642f14140").unwrap();
        assert_eq!(h.algorithm(), HashAlgorithm::Sha1);

        let h = FileHash::parse("44d88612fea8a8f36de82e1278abb02f").unwrap();
        assert_eq!(h.algorithm(), HashAlgorithm::Md5);
    }

    #[test]
    fn test_parse_trims_and_lowercases() {
        let upper = EICAR_SHA256.to_ascii_uppercase();
        let h = FileHash::parse(&format!("  {upper}\n")).unwrap();
        assert_eq!(h.hex(), EICAR_SHA256);
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        let err = FileHash::parse("abc123").unwrap_err();
        assert!(matches!(err, StoreError::InvalidHash { .. }));
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let bad = "g".repeat(64);
        let err = FileHash::parse(&bad).unwrap_err();
        assert!(matches!(err, StoreError::InvalidHash { .. }));
    }

    #[test]
    fn test_new_rejects_mismatched_length() {
        let err = FileHash::new(HashAlgorithm::Md5, EICAR_SHA256).unwrap_err();
        assert!(matches!(err, StoreError::InvalidHash { .. }));
    }

    #[test]
    fn test_storage_key_format() {
        let h = FileHash::parse(EICAR_SHA256).unwrap();
        assert_eq!(h.storage_key(), format!("sha256:{EICAR_SHA256}"));
    }

    #[test]
    fn test_sha256_of_bytes() {
        let h = FileHash::sha256_of(b"hello");
        assert_eq!(h.algorithm(), HashAlgorithm::Sha256);
        assert_eq!(h.hex().len(), 64);
    }
}
