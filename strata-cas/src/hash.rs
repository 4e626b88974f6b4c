use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::errors::CasError;
use crate::validation;

/// SHA-256 digest identifying a chunk by its content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash `data` with SHA-256
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Create from raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding, the form used on disk and in the catalog
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64 character hex string
    pub fn from_hex(s: &str) -> Result<Self, CasError> {
        validation::validate_content_hash(s)?;
        let mut array = [0u8; 32];
        hex::decode_to_slice(s, &mut array).map_err(|e| {
            CasError::InvalidHash(validation::ValidationError::InvalidHash(e.to_string()))
        })?;
        Ok(Self(array))
    }

    /// Check that `data` hashes to this value
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::digest(data) == *self
    }
}

impl FromStr for ContentHash {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
