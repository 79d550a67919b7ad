//! Manifest authentication and content verification.
//!
//! The two stages are chained by type: [`verify_manifest_trust`] is the only
//! producer of a [`TrustedManifest`], and [`verify_contents`] only accepts
//! one, so no code path can compare content against an unauthenticated
//! manifest. The transcript is read from the archive once; the bytes handed
//! to the trust verifier are the bytes that get parsed.

use std::collections::{BTreeSet, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};

use pm_schema::{PackageId, Sha256Digest};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::archive::{ArchiveEntry, ArchiveError, EntryKind, PackageArchive};
use crate::manifest::{
    MANIFEST_ENTRY, MAX_MANIFEST_BYTES, Manifest, ManifestError, SIGNATURE_ENTRY,
    is_control_entry,
};
use crate::trust::{TrustError, TrustVerifier};
use crate::{ErrorKind, Reporter};

const DIGEST_BUF_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error("extra file {path:?} found in archive")]
    UndeclaredFile { path: String },

    #[error("{path:?} checksum was incorrect: manifest declares {expected}, archive contains {actual}")]
    ChecksumMismatch {
        path: String,
        expected: Sha256Digest,
        actual: Sha256Digest,
    },

    #[error("declared files missing from archive: {}", paths.join(", "))]
    MissingDeclaredFile { paths: Vec<String> },

    #[error("{path:?} appears more than once in archive")]
    DuplicateEntry { path: String },

    #[error("control entry {name:?} appears more than once in archive")]
    DuplicateControlEntry { name: String },

    #[error("entry {path:?} is a {kind}; only regular files and directories are allowed")]
    UnsupportedEntry { path: String, kind: EntryKind },
}

impl VerifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Archive(e) => e.kind(),
            Self::Manifest(e) => e.kind(),
            Self::Trust(e) => e.kind(),
            Self::UndeclaredFile { .. }
            | Self::ChecksumMismatch { .. }
            | Self::MissingDeclaredFile { .. }
            | Self::DuplicateEntry { .. } => ErrorKind::Content,
            Self::DuplicateControlEntry { .. } | Self::UnsupportedEntry { .. } => {
                ErrorKind::Format
            }
        }
    }
}

/// A manifest whose transcript carried a valid signature from a trusted key.
#[derive(Debug, Clone)]
pub struct TrustedManifest(Manifest);

impl std::ops::Deref for TrustedManifest {
    type Target = Manifest;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Proof that every content entry of an archive matched its trusted manifest.
///
/// Only [`verify_contents`] creates one; the store refuses anything else.
#[derive(Debug)]
pub struct VerifiedArchive {
    id: PackageId,
    path: PathBuf,
    manifest: TrustedManifest,
    bytes: u64,
}

impl VerifiedArchive {
    pub fn id(&self) -> &PackageId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &TrustedManifest {
        &self.manifest
    }

    /// Total content bytes streamed through the digest.
    pub fn bytes_verified(&self) -> u64 {
        self.bytes
    }
}

/// Authenticate the manifest carried by `archive`.
///
/// Extracts both control entries, hands them to `verifier`, and only then
/// parses the transcript.
pub fn verify_manifest_trust(
    archive: &Path,
    verifier: &dyn TrustVerifier,
) -> Result<TrustedManifest, VerifyError> {
    let transcript = PackageArchive::open(archive)?.read_named(MANIFEST_ENTRY, MAX_MANIFEST_BYTES)?;

    let mut handle = PackageArchive::open(archive)?;
    let mut signature = match handle.extract_named(SIGNATURE_ENTRY) {
        Ok(entry) => entry,
        Err(ArchiveError::EntryNotFound { .. }) => return Err(TrustError::MissingSignature.into()),
        Err(e) => return Err(e.into()),
    };

    verifier.verify(&mut transcript.as_slice(), &mut signature)?;
    drop(signature);

    let manifest = Manifest::parse(transcript)?;
    debug!(archive = %archive.display(), files = manifest.len(), "manifest trusted");
    Ok(TrustedManifest(manifest))
}

/// Stream every content entry of `archive` through SHA-256 and reconcile the
/// result against `manifest`. Fails fast on the first offending entry.
pub fn verify_contents(
    archive: &Path,
    id: &PackageId,
    manifest: TrustedManifest,
    reporter: &dyn Reporter,
) -> Result<VerifiedArchive, VerifyError> {
    let mut bytes = 0u64;
    walk_declared(archive, &manifest, |entry, expected| {
        reporter.digesting(id, entry.name());
        let (actual, read) = digest_entry(entry)?;
        if &actual != expected {
            return Err(VerifyError::ChecksumMismatch {
                path: entry.name().to_string(),
                expected: expected.clone(),
                actual,
            });
        }
        bytes += read;
        Ok(())
    })?;

    debug!(%id, files = manifest.len(), bytes, "contents verified");
    Ok(VerifiedArchive {
        id: id.clone(),
        path: archive.to_path_buf(),
        manifest,
        bytes,
    })
}

/// Both stages back to back.
pub fn verify_archive(
    archive: &Path,
    id: &PackageId,
    verifier: &dyn TrustVerifier,
    reporter: &dyn Reporter,
) -> Result<VerifiedArchive, VerifyError> {
    let manifest = verify_manifest_trust(archive, verifier)?;
    verify_contents(archive, id, manifest, reporter)
}

/// Traverse `archive` once, enforcing the closed-world rules, and call
/// `visit` for every declared regular file with its expected digest.
///
/// Control entries, directories and PAX/GNU headers are skipped. Any other
/// non-regular entry, undeclared name, repeated name, or declared path never
/// seen is an error.
pub(crate) fn walk_declared<E>(
    archive: &Path,
    manifest: &Manifest,
    mut visit: impl FnMut(&mut ArchiveEntry<'_>, &Sha256Digest) -> Result<(), E>,
) -> Result<(), E>
where
    E: From<VerifyError>,
{
    let mut handle = PackageArchive::open(archive).map_err(VerifyError::from)?;
    let mut remaining: BTreeSet<&str> = manifest.entries().keys().map(String::as_str).collect();
    let mut controls: HashSet<String> = HashSet::new();

    for entry in handle.entries().map_err(VerifyError::from)? {
        let mut entry = entry.map_err(VerifyError::from)?;
        let name = entry.name().to_string();

        if is_control_entry(&name) {
            if !controls.insert(name.clone()) {
                return Err(VerifyError::DuplicateControlEntry { name }.into());
            }
            continue;
        }

        match entry.kind() {
            EntryKind::Directory | EntryKind::Metadata => continue,
            EntryKind::File => {}
            kind @ EntryKind::Other(_) => {
                return Err(VerifyError::UnsupportedEntry { path: name, kind }.into());
            }
        }

        let Some(expected) = manifest.get(&name) else {
            return Err(VerifyError::UndeclaredFile { path: name }.into());
        };
        if !remaining.remove(name.as_str()) {
            return Err(VerifyError::DuplicateEntry { path: name }.into());
        }

        visit(&mut entry, expected)?;
    }

    if !remaining.is_empty() {
        return Err(VerifyError::MissingDeclaredFile {
            paths: remaining.into_iter().map(str::to_string).collect(),
        }
        .into());
    }
    Ok(())
}

/// Drain `entry` through SHA-256 with a fixed buffer.
fn digest_entry(entry: &mut ArchiveEntry<'_>) -> Result<(Sha256Digest, u64), ArchiveError> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_BUF_SIZE];
    let mut offset = 0u64;
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(ArchiveError::Read {
                    name: entry.name().to_string(),
                    offset,
                    source,
                });
            }
        };
        hasher.update(&buf[..n]);
        offset += n as u64;
    }
    Ok((Sha256Digest::from_bytes(&hasher.finalize().into()), offset))
}
