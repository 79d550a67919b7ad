//! Package catalog: turns requested names into resolved [`PackageMeta`]s.
//!
//! The orchestrator only sees the [`Catalog`] trait. [`AvailableDb`] is the
//! bundled implementation, backed by `<root>/var/lib/pm/available.json`:
//!
//! ```json
//! {"packages": [{"name": "foo", "version": "1.0", "url": "https://..."}]}
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use pm_schema::{IdentError, PackageId, PackageMeta, PackageName, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ErrorKind;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("unknown packages: {}", names.join(", "))]
    Unknown { names: Vec<String> },

    #[error("conflicting versions requested for {name}: {}", versions.join(", "))]
    Conflict { name: String, versions: Vec<String> },

    #[error("resolved packages share the identifier {id}")]
    DuplicateId { id: PackageId },

    #[error("invalid package request {request:?}: {source}")]
    InvalidRequest {
        request: String,
        #[source]
        source: IdentError,
    },

    #[error("cannot read available database {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed available database {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Resolution
    }
}

/// Resolves requested names to installable packages.
pub trait Catalog: Send + Sync {
    /// Resolve every request (`name` or `name@version`), in request order.
    ///
    /// Either the whole batch resolves or nothing does.
    fn installable(&self, requests: &[String]) -> Result<Vec<PackageMeta>, ResolveError>;
}

/// Reject a resolved batch in which two packages map to the same identifier.
///
/// Each package owns the cache file and store entry named by its id, so a
/// shared id would make two packages overwrite each other.
pub fn ensure_distinct_ids(packages: &[PackageMeta]) -> Result<(), ResolveError> {
    let mut seen = HashSet::with_capacity(packages.len());
    for meta in packages {
        let id = meta.id();
        if !seen.insert(id.clone()) {
            return Err(ResolveError::DuplicateId { id });
        }
    }
    Ok(())
}

/// A parsed `name[@version]` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub name: PackageName,
    pub version: Option<Version>,
}

impl Request {
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let invalid = |source| ResolveError::InvalidRequest {
            request: raw.to_string(),
            source,
        };
        let (name, version) = match raw.split_once('@') {
            Some((name, version)) => (name, Some(Version::new(version).map_err(invalid)?)),
            None => (raw, None),
        };
        Ok(Self {
            name: PackageName::new(name).map_err(invalid)?,
            version,
        })
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{v}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Merge repeated requests for one name. Pinning the same name to two
/// different versions is a conflict; a bare name defers to a pinned one.
fn merge_requests(requests: &[String]) -> Result<Vec<Request>, ResolveError> {
    let mut merged: Vec<Request> = Vec::new();
    for raw in requests {
        let request = Request::parse(raw)?;
        let Some(existing) = merged.iter_mut().find(|r| r.name == request.name) else {
            merged.push(request);
            continue;
        };
        let Some(pinned) = request.version else {
            continue;
        };
        match &existing.version {
            Some(current) if *current != pinned => {
                return Err(ResolveError::Conflict {
                    name: request.name.to_string(),
                    versions: vec![current.to_string(), pinned.to_string()],
                });
            }
            Some(_) => {}
            None => existing.version = Some(pinned),
        }
    }
    Ok(merged)
}

/// Semver ordering when both sides parse, lexical otherwise.
fn compare_versions(a: &Version, b: &Version) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.as_str().cmp(b.as_str()),
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AvailableFile {
    packages: Vec<PackageMeta>,
}

/// Catalog loaded from the available package database.
#[derive(Debug, Clone, Default)]
pub struct AvailableDb {
    packages: BTreeMap<PackageName, Vec<PackageMeta>>,
}

impl AvailableDb {
    /// Load the database at `path`. A missing file is a [`ResolveError::Load`].
    pub fn load(path: &Path) -> Result<Self, ResolveError> {
        let bytes = std::fs::read(path).map_err(|source| ResolveError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let file: AvailableFile =
            serde_json::from_slice(&bytes).map_err(|source| ResolveError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), packages = file.packages.len(), "loaded available database");
        Ok(Self::from_packages(file.packages))
    }

    pub fn from_packages(packages: impl IntoIterator<Item = PackageMeta>) -> Self {
        let mut db = Self::default();
        for meta in packages {
            db.packages.entry(meta.name.clone()).or_default().push(meta);
        }
        for versions in db.packages.values_mut() {
            versions.sort_by(|a, b| compare_versions(&a.version, &b.version));
        }
        db
    }

    /// Every known package, by name then ascending version.
    pub fn iter(&self) -> impl Iterator<Item = &PackageMeta> {
        self.packages.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.packages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn lookup(&self, request: &Request) -> Option<&PackageMeta> {
        let versions = self.packages.get(&request.name)?;
        match &request.version {
            Some(v) => versions.iter().find(|m| m.version == *v),
            None => versions.last(),
        }
    }
}

impl Catalog for AvailableDb {
    fn installable(&self, requests: &[String]) -> Result<Vec<PackageMeta>, ResolveError> {
        let requests = merge_requests(requests)?;

        let mut resolved = Vec::with_capacity(requests.len());
        let mut unknown = Vec::new();
        for request in &requests {
            match self.lookup(request) {
                Some(meta) => resolved.push(meta.clone()),
                None => unknown.push(request.to_string()),
            }
        }

        if !unknown.is_empty() {
            return Err(ResolveError::Unknown { names: unknown });
        }
        ensure_distinct_ids(&resolved)?;
        Ok(resolved)
    }
}
