//! Manifest authentication against a trust store.
//!
//! The pipeline only depends on [`TrustVerifier`]. The bundled
//! implementation is [`Keyring`]: a directory of `*.pub` files, each holding
//! one base64-encoded Ed25519 public key. The detached signature
//! (`manifest.sha256.asc`) is a base64-encoded 64-byte Ed25519 signature over
//! the exact manifest transcript.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;
use tracing::debug;

use crate::ErrorKind;
use crate::manifest::MAX_MANIFEST_BYTES;

/// Upper bound on the size of a signature entry (base64 text plus whitespace).
const MAX_SIGNATURE_BYTES: u64 = 4096;

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("manifest signature does not verify against any trusted key")]
    Untrusted,

    #[error("malformed manifest signature: {0}")]
    Malformed(String),

    #[error("manifest signature entry is missing")]
    MissingSignature,

    #[error("keyring {} holds no trusted keys", path.display())]
    EmptyKeyring { path: PathBuf },

    #[error("invalid key file {}: {reason}", path.display())]
    InvalidKey { path: PathBuf, reason: String },

    #[error("reading signature material failed: {0}")]
    Io(#[from] io::Error),
}

impl TrustError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Trust
    }
}

/// Validates a manifest's detached signature.
///
/// Called exactly once per package, with streams extracted from the
/// archive's two control entries, before any content is compared.
pub trait TrustVerifier: Send + Sync {
    /// Returns `Ok(())` only if `signature` is a valid signature over the
    /// bytes of `manifest` by a trusted key.
    fn verify(&self, manifest: &mut dyn Read, signature: &mut dyn Read) -> Result<(), TrustError>;
}

/// Trusted Ed25519 keys loaded from a keyring directory.
#[derive(Debug, Clone)]
pub struct Keyring {
    dir: PathBuf,
    keys: Vec<(String, VerifyingKey)>,
}

impl Keyring {
    /// Load every `*.pub` file in `dir`. A missing directory yields an empty
    /// keyring, which rejects every signature.
    pub fn load(dir: &Path) -> Result<Self, TrustError> {
        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    dir: dir.to_path_buf(),
                    keys: Vec::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "pub") && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut keys = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            let key = parse_public_key(text.trim()).map_err(|reason| TrustError::InvalidKey {
                path: path.clone(),
                reason,
            })?;
            let label = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            keys.push((label, key));
        }

        debug!(dir = %dir.display(), keys = keys.len(), "loaded keyring");
        Ok(Self {
            dir: dir.to_path_buf(),
            keys,
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn parse_public_key(b64: &str) -> Result<VerifyingKey, String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| format!("not base64: {e}"))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("expected 32 key bytes, got {}", bytes.len()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| e.to_string())
}

fn parse_signature(raw: &[u8]) -> Result<Signature, TrustError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| TrustError::Malformed("signature is not text".to_string()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| TrustError::Malformed(format!("signature is not base64: {e}")))?;
    Signature::from_slice(&bytes).map_err(|_| {
        TrustError::Malformed(format!("expected 64 signature bytes, got {}", bytes.len()))
    })
}

impl TrustVerifier for Keyring {
    fn verify(&self, manifest: &mut dyn Read, signature: &mut dyn Read) -> Result<(), TrustError> {
        if self.keys.is_empty() {
            return Err(TrustError::EmptyKeyring {
                path: self.dir.clone(),
            });
        }

        let mut raw_sig = Vec::new();
        signature
            .take(MAX_SIGNATURE_BYTES + 1)
            .read_to_end(&mut raw_sig)?;
        if raw_sig.len() as u64 > MAX_SIGNATURE_BYTES {
            return Err(TrustError::Malformed("signature entry too large".to_string()));
        }
        let signature = parse_signature(&raw_sig)?;

        let mut message = Vec::new();
        manifest
            .take(MAX_MANIFEST_BYTES + 1)
            .read_to_end(&mut message)?;
        if message.len() as u64 > MAX_MANIFEST_BYTES {
            return Err(TrustError::Untrusted);
        }

        match self
            .keys
            .iter()
            .find(|(_, key)| key.verify_strict(&message, &signature).is_ok())
        {
            Some((label, _)) => {
                debug!(key = %label, "manifest signature verified");
                Ok(())
            }
            None => Err(TrustError::Untrusted),
        }
    }
}
