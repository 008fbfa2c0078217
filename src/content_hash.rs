//! Content-addressed hashing for archives.
//!
//! Every archive is identified by a dual hash: a longer cryptographic
//! digest (SHA-384, the primary hash used for storage keys and
//! equality) plus a secondary SHA-256 of the same bytes, computed in the
//! same streaming pass, for clients that only verify SHA-256. Formats:
//! `sha384:<96 hex characters>` and `sha256:<64 hex characters>`.

use crate::error::{Result, StoreError};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha384};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    primary: [u8; 48],
    secondary: [u8; 32],
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_str(&s).map_err(D::Error::custom)
    }
}

/// Streaming tee: feeds bytes into both digests as they arrive, so the
/// ingest path never has to buffer the whole body to compute hashes.
#[derive(Default)]
pub struct ContentHasher {
    primary: Sha384,
    secondary: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.primary.update(chunk);
        self.secondary.update(chunk);
    }

    pub fn finalize(self) -> ContentHash {
        ContentHash {
            primary: self.primary.finalize().into(),
            secondary: self.secondary.finalize().into(),
        }
    }
}

impl ContentHash {
    /// Hash a fully buffered blob in one shot.
    ///
    /// ```
    /// use charmstore::content_hash::ContentHash;
    ///
    /// let hash = ContentHash::from_bytes(b"hello world");
    /// assert!(hash.to_string().starts_with("sha384:"));
    /// assert!(hash.verify(b"hello world"));
    /// ```
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Parse the primary (SHA-384) hash from its `sha384:<hex>` form.
    pub fn from_primary_hex(s: &str) -> Result<Self> {
        let hex_str = s.strip_prefix("sha384:").unwrap_or(s);
        if hex_str.len() != 96 {
            return Err(StoreError::bad_request(format!(
                "expected 96 hex characters for a sha384 hash, got {}",
                hex_str.len()
            )));
        }
        let bytes = hex::decode(hex_str)
            .map_err(|e| StoreError::bad_request(format!("invalid hex: {e}")))?;
        let primary: [u8; 48] = bytes.try_into().map_err(|v: Vec<u8>| {
            StoreError::bad_request(format!("hash must be exactly 48 bytes, got {}", v.len()))
        })?;
        Ok(Self {
            primary,
            secondary: [0u8; 32],
        })
    }

    pub fn primary_hex(&self) -> String {
        hex::encode(self.primary)
    }

    pub fn secondary_hex(&self) -> String {
        hex::encode(self.secondary)
    }

    pub fn verify(&self, data: &[u8]) -> bool {
        let computed = Self::from_bytes(data);
        computed.primary == self.primary
    }

    /// Verify only against a declared primary-hash hex string, the shape
    /// the `hash` query parameter arrives in.
    pub fn verify_declared(&self, declared_primary_hex: &str) -> bool {
        let declared_hex = declared_primary_hex
            .strip_prefix("sha384:")
            .unwrap_or(declared_primary_hex);
        self.primary_hex().eq_ignore_ascii_case(declared_hex)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha384:{}", self.primary_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ContentHash(sha384:{}, sha256:{})",
            self.primary_hex(),
            self.secondary_hex()
        )
    }
}

impl std::str::FromStr for ContentHash {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_primary_hex(s)
    }
}
