//! SHA-256 digest newtype used by manifests.

use serde::{Deserialize, Deserializer, Serialize};

/// Length of a hex-encoded SHA-256 digest.
pub const SHA256_HEX_LEN: usize = 64;

/// Errors produced when validating a digest string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The digest does not have exactly 64 characters.
    #[error("invalid SHA256 digest: expected {SHA256_HEX_LEN} hex characters, got {0}")]
    Length(usize),

    /// The digest contains a character outside `[0-9a-fA-F]`.
    #[error("invalid SHA256 digest: contains non-hex characters")]
    NotHex,
}

/// A validated SHA256 digest (64 hex characters, stored lower-case).
///
/// Manifests compare the lower-case hex encoding of a freshly computed digest
/// against this value, so normalizing at construction keeps comparisons a
/// plain string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError`] if `s` is not exactly 64 ASCII hex characters.
    pub fn new(s: &str) -> Result<Self, DigestError> {
        if s.len() != SHA256_HEX_LEN {
            return Err(DigestError::Length(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NotHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Build a digest from the raw 32-byte output of a SHA-256 hasher.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Sha256Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
