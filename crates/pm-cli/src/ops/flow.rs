//! Installation Flow Typestate Pattern
//!
//! Models the per-package pipeline as a series of explicit state transitions:
//!
//! ```text
//! FetchedPackage --[verify_trust()]--> TrustedPackage --[verify_contents()]--> VerifiedPackage --[commit()]--> InstalledPackage
//! ```
//!
//! Each transition consumes its input, so a package cannot be committed
//! before its contents are verified, and its contents cannot be verified
//! before its manifest is authenticated.

use std::path::PathBuf;

use pm_core::Reporter;
use pm_core::store::{self, Store};
use pm_core::trust::TrustVerifier;
use pm_core::verify::{self, TrustedManifest, VerifiedArchive};
use pm_schema::{PackageId, PackageMeta};

use crate::ops::InstallError;

/// State 1: an archive sitting in the cache, not yet trusted.
///
/// # Transitions
///
/// - [`verify_trust()`](Self::verify_trust) -> [`TrustedPackage`]
#[derive(Debug)]
pub struct FetchedPackage {
    pub meta: PackageMeta,
    pub id: PackageId,
    pub archive: PathBuf,
}

/// State 2: the archive's manifest carries a valid signature from a
/// trusted key.
///
/// # Transitions
///
/// - [`verify_contents()`](Self::verify_contents) -> [`VerifiedPackage`]
#[derive(Debug)]
pub struct TrustedPackage {
    pub fetched: FetchedPackage,
    manifest: TrustedManifest,
}

/// State 3: every content entry matched the trusted manifest.
///
/// # Transitions
///
/// - [`commit()`](Self::commit) -> [`InstalledPackage`]
#[derive(Debug)]
pub struct VerifiedPackage {
    pub meta: PackageMeta,
    archive: VerifiedArchive,
}

/// Final state: the package is live in the store.
#[derive(Debug)]
pub struct InstalledPackage {
    pub meta: PackageMeta,
    pub record: store::InstalledPackage,
}

impl FetchedPackage {
    pub fn new(meta: PackageMeta, archive: PathBuf) -> Self {
        Self {
            id: meta.id(),
            meta,
            archive,
        }
    }

    /// Authenticate the manifest carried by the archive.
    pub fn verify_trust(self, verifier: &dyn TrustVerifier) -> Result<TrustedPackage, InstallError> {
        match verify::verify_manifest_trust(&self.archive, verifier) {
            Ok(manifest) => Ok(TrustedPackage {
                fetched: self,
                manifest,
            }),
            Err(source) => Err(InstallError::Trust {
                package: self.id,
                source,
            }),
        }
    }
}

impl TrustedPackage {
    /// Number of files the trusted manifest declares.
    pub fn declared_files(&self) -> usize {
        self.manifest.len()
    }

    /// Re-hash every content entry against the trusted manifest.
    pub fn verify_contents(self, reporter: &dyn Reporter) -> Result<VerifiedPackage, InstallError> {
        let Self { fetched, manifest } = self;
        match verify::verify_contents(&fetched.archive, &fetched.id, manifest, reporter) {
            Ok(archive) => Ok(VerifiedPackage {
                meta: fetched.meta,
                archive,
            }),
            Err(source) => Err(InstallError::Content {
                package: fetched.id,
                source,
            }),
        }
    }
}

impl VerifiedPackage {
    pub fn id(&self) -> &PackageId {
        self.archive.id()
    }

    /// Materialize the verified archive as the live generation.
    pub fn commit(self, store: &Store) -> Result<InstalledPackage, InstallError> {
        match store.commit(&self.archive) {
            Ok(record) => Ok(InstalledPackage {
                meta: self.meta,
                record,
            }),
            Err(source) => Err(InstallError::Commit {
                package: self.archive.id().clone(),
                source,
            }),
        }
    }
}
