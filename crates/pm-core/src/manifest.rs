//! Package manifest: the declared `path -> digest` mapping plus the exact
//! byte transcript it was parsed from.
//!
//! The signature covers the literal transcript, not a re-serialization, so
//! the bytes are kept alongside the parsed map.
//!
//! Format, one entry per line:
//!
//! ```text
//! <64 hex chars>\t<relative path>\n
//! ```

use std::collections::BTreeMap;

use pm_schema::{DigestError, Sha256Digest};
use thiserror::Error;

use crate::ErrorKind;

/// Archive entry holding the manifest transcript.
pub const MANIFEST_ENTRY: &str = "manifest.sha256";

/// Archive entry holding the detached signature over the transcript.
pub const SIGNATURE_ENTRY: &str = "manifest.sha256.asc";

/// Upper bound on the transcript size read from an archive.
pub const MAX_MANIFEST_BYTES: u64 = 16 * 1024 * 1024;

/// Returns `true` for the two reserved control entries.
pub fn is_control_entry(name: &str) -> bool {
    name == MANIFEST_ENTRY || name == SIGNATURE_ENTRY
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("manifest line {line}: not valid UTF-8")]
    NotUtf8 { line: usize },

    #[error("manifest format error on line {line}: got {got} fields, want 2")]
    FieldCount { line: usize, got: usize },

    #[error("manifest line {line}: {source}")]
    InvalidDigest {
        line: usize,
        #[source]
        source: DigestError,
    },

    #[error("manifest line {line}: invalid path {path:?}")]
    InvalidPath { line: usize, path: String },

    #[error("manifest line {line}: duplicate path {path:?}")]
    DuplicatePath { line: usize, path: String },
}

impl ManifestError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Format
    }
}

/// Parsed manifest. Partial manifests are never produced: any bad line fails
/// the whole parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, Sha256Digest>,
    transcript: Vec<u8>,
}

impl Manifest {
    /// Parse a transcript. Empty lines are accepted only at the very end.
    pub fn parse(transcript: Vec<u8>) -> Result<Self, ManifestError> {
        let mut lines: Vec<&[u8]> = transcript.split(|b| *b == b'\n').collect();
        while lines.last().is_some_and(|l| l.is_empty() || *l == b"\r") {
            lines.pop();
        }

        let mut entries = BTreeMap::new();
        for (idx, &raw) in lines.iter().enumerate() {
            let line = idx + 1;
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let text = std::str::from_utf8(raw).map_err(|_| ManifestError::NotUtf8 { line })?;

            let fields: Vec<&str> = text.split('\t').collect();
            let [digest, path] = fields[..] else {
                return Err(ManifestError::FieldCount {
                    line,
                    got: fields.len(),
                });
            };

            let digest = Sha256Digest::new(digest)
                .map_err(|source| ManifestError::InvalidDigest { line, source })?;

            if !is_valid_path(path) || is_control_entry(path) {
                return Err(ManifestError::InvalidPath {
                    line,
                    path: path.to_string(),
                });
            }

            if entries.insert(path.to_string(), digest).is_some() {
                return Err(ManifestError::DuplicatePath {
                    line,
                    path: path.to_string(),
                });
            }
        }

        Ok(Self {
            entries,
            transcript,
        })
    }

    /// Canonical transcript for a set of entries: sorted by path, one
    /// newline-terminated line each.
    pub fn serialize<'a, I>(entries: I) -> Vec<u8>
    where
        I: IntoIterator<Item = (&'a str, &'a Sha256Digest)>,
    {
        let sorted: BTreeMap<&str, &Sha256Digest> = entries.into_iter().collect();
        sorted
            .into_iter()
            .map(|(path, digest)| format!("{digest}\t{path}\n"))
            .collect::<String>()
            .into_bytes()
    }

    pub fn entries(&self) -> &BTreeMap<String, Sha256Digest> {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&Sha256Digest> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The exact bytes the manifest was parsed from.
    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }
}

/// Relative, non-empty, and free of `.`/`..`/empty segments.
fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\0')
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}
