//! Generation store: atomic materialization of verified archives.
//!
//! Layout under `<root>/var/lib/pm`:
//!
//! ```text
//! generations/<id>/<n>/          committed generation n
//! generations/<id>/<n>.staging/  extraction in progress
//! generations/<id>/<n>.json      receipt for generation n
//! installed/<id> -> generations/<id>/<n>
//! ```
//!
//! The live state of a package only ever changes by renaming a fresh symlink
//! over `installed/<id>`, so a crash at any point leaves either the previous
//! generation or the new one live. Leftovers are swept by [`Store::recover`].

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pm_schema::{PackageId, Sha256Digest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveEntry, ArchiveError};
use crate::verify::{VerifiedArchive, VerifyError, walk_declared};
use crate::{ErrorKind, Layout};

const STAGING_SUFFIX: &str = ".staging";
const RECEIPT_SUFFIX: &str = ".json";
const TMP_LINK_SUFFIX: &str = ".tmp";
const COPY_BUF_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("archive changed after verification: {0}")]
    ArchiveChanged(#[source] VerifyError),

    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid receipt {}: {source}", path.display())]
    Receipt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("atomic link switching is not supported on this platform")]
    Unsupported,
}

impl CommitError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Commit
    }
}

impl From<VerifyError> for CommitError {
    fn from(e: VerifyError) -> Self {
        Self::ArchiveChanged(e)
    }
}

fn io_err<'a>(
    action: &'static str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> CommitError + 'a {
    move |source| CommitError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// Record written next to every committed generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub generation: u64,
    pub files: Vec<String>,
    pub bytes: u64,
    pub committed_at: DateTime<Utc>,
}

/// A package whose generation is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub id: PackageId,
    pub generation: u64,
    pub path: PathBuf,
    pub files: usize,
    pub size_bytes: u64,
}

/// Paths removed by [`Store::recover`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub removed: Vec<PathBuf>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    layout: Layout,
}

impl Store {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Materialize `archive` as a new generation and make it live.
    ///
    /// On any error before the link switch the staging directory is removed
    /// and the previously live generation (if any) stays in place.
    pub fn commit(&self, archive: &VerifiedArchive) -> Result<InstalledPackage, CommitError> {
        let id = archive.id();
        let pkg_dir = self.layout.generations_dir().join(id);
        fs::create_dir_all(&pkg_dir).map_err(io_err("create", &pkg_dir))?;

        let generation = next_generation(&pkg_dir)?;
        let staging = pkg_dir.join(format!("{generation}{STAGING_SUFFIX}"));
        let receipt_path = pkg_dir.join(format!("{generation}{RECEIPT_SUFFIX}"));
        let live = pkg_dir.join(generation.to_string());

        debug!(%id, generation, staging = %staging.display(), "staging commit");
        let staged = extract(archive, &staging).and_then(|(files, bytes)| {
            let receipt = Receipt {
                id: id.to_string(),
                generation,
                files,
                bytes,
                committed_at: Utc::now(),
            };
            write_receipt(&receipt_path, &receipt)?;
            fs::rename(&staging, &live).map_err(io_err("finalize", &live))?;
            Ok(receipt)
        });

        let receipt = match staged {
            Ok(receipt) => receipt,
            Err(e) => {
                discard(&staging);
                discard(&receipt_path);
                return Err(e);
            }
        };

        if let Err(e) = self.switch_link(id, &live) {
            discard(&live);
            discard(&receipt_path);
            return Err(e);
        }

        prune(&pkg_dir, generation);
        info!(%id, generation, files = receipt.files.len(), "committed");

        Ok(InstalledPackage {
            id: id.clone(),
            generation,
            files: receipt.files.len(),
            size_bytes: receipt.bytes,
            path: live,
        })
    }

    #[cfg(unix)]
    fn switch_link(&self, id: &PackageId, target: &Path) -> Result<(), CommitError> {
        let dir = self.layout.installed_dir();
        fs::create_dir_all(&dir).map_err(io_err("create", &dir))?;

        let link = dir.join(id);
        let tmp = dir.join(format!(".{id}{TMP_LINK_SUFFIX}"));
        discard(&tmp);
        std::os::unix::fs::symlink(target, &tmp).map_err(io_err("link", &tmp))?;
        fs::rename(&tmp, &link).map_err(|e| {
            discard(&tmp);
            io_err("switch", &link)(e)
        })?;

        File::open(&dir)
            .and_then(|d| d.sync_all())
            .map_err(io_err("sync", &dir))
    }

    #[cfg(not(unix))]
    fn switch_link(&self, _id: &PackageId, _target: &Path) -> Result<(), CommitError> {
        Err(CommitError::Unsupported)
    }

    /// Live generation of `id`, if one is linked.
    pub fn live_generation(&self, id: &PackageId) -> Option<u64> {
        let target = fs::read_link(self.layout.installed_dir().join(id)).ok()?;
        target.file_name()?.to_str()?.parse().ok()
    }

    /// Every package with a live link, sorted by id.
    pub fn installed(&self) -> Result<Vec<InstalledPackage>, CommitError> {
        let dir = self.layout.installed_dir();
        let read_dir = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err("read", &dir)(e)),
        };

        let mut packages = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(io_err("read", &dir))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let Ok(id) = PackageId::parse(&name) else {
                warn!(entry = %name, "ignoring unexpected entry in installed dir");
                continue;
            };
            let Some(generation) = self.live_generation(&id) else {
                warn!(%id, "installed entry is not a generation link");
                continue;
            };

            let pkg_dir = self.layout.generations_dir().join(&id);
            let path = pkg_dir.join(generation.to_string());
            let receipt = read_receipt(&pkg_dir.join(format!("{generation}{RECEIPT_SUFFIX}")))?;
            packages.push(InstalledPackage {
                id,
                generation,
                files: receipt.files.len(),
                size_bytes: calculate_dir_size(&path),
                path,
            });
        }
        packages.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(packages)
    }

    /// Sweep what an interrupted commit can leave behind: staging
    /// directories, generations and receipts no live link points at, and
    /// temporary links.
    pub fn recover(&self) -> Result<RecoveryReport, CommitError> {
        let mut report = RecoveryReport::default();

        let installed = self.layout.installed_dir();
        for entry in list_dir(&installed)? {
            let name = file_name(&entry);
            if name.starts_with('.') && name.ends_with(TMP_LINK_SUFFIX) {
                remove_path(&entry, &mut report)?;
            }
        }

        let generations = self.layout.generations_dir();
        for pkg_dir in list_dir(&generations)? {
            let live = PackageId::parse(&file_name(&pkg_dir))
                .ok()
                .and_then(|id| self.live_generation(&id));

            for entry in list_dir(&pkg_dir)? {
                let name = file_name(&entry);
                let keep = match live {
                    Some(n) => name == n.to_string() || name == format!("{n}{RECEIPT_SUFFIX}"),
                    None => false,
                };
                if !keep {
                    remove_path(&entry, &mut report)?;
                }
            }

            if live.is_none() {
                remove_path(&pkg_dir, &mut report)?;
            }
        }

        if report.is_empty() {
            debug!("store is clean");
        } else {
            info!(removed = report.removed.len(), "recovered store");
        }
        Ok(report)
    }
}

/// One past the highest generation number used by any entry in `pkg_dir`.
fn next_generation(pkg_dir: &Path) -> Result<u64, CommitError> {
    let highest = list_dir(pkg_dir)?
        .iter()
        .filter_map(|p| {
            let name = file_name(p);
            let number = name.split('.').next().unwrap_or_default();
            number.parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0);
    Ok(highest + 1)
}

fn extract(archive: &VerifiedArchive, staging: &Path) -> Result<(Vec<String>, u64), CommitError> {
    if staging.exists() {
        fs::remove_dir_all(staging).map_err(io_err("clear", staging))?;
    }
    fs::create_dir_all(staging).map_err(io_err("create", staging))?;

    let mut files = Vec::new();
    let mut bytes = 0u64;
    walk_declared(archive.path(), archive.manifest(), |entry, expected| {
        // Names were validated as relative, dot-free paths by the manifest.
        let dest = staging.join(entry.name());
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_err("create", parent))?;
        }

        let mut file = File::create(&dest).map_err(io_err("create", &dest))?;
        let (actual, written) = copy_hashed(entry, &mut file, &dest)?;
        if &actual != expected {
            return Err(CommitError::ArchiveChanged(VerifyError::ChecksumMismatch {
                path: entry.name().to_string(),
                expected: expected.clone(),
                actual,
            }));
        }
        file.sync_all().map_err(io_err("sync", &dest))?;
        set_mode(&dest, entry.mode() & 0o755)?;

        files.push(entry.name().to_string());
        bytes += written;
        Ok(())
    })?;

    Ok((files, bytes))
}

fn copy_hashed(
    entry: &mut ArchiveEntry<'_>,
    out: &mut File,
    dest: &Path,
) -> Result<(Sha256Digest, u64), CommitError> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut offset = 0u64;
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(CommitError::ArchiveChanged(VerifyError::Archive(
                    ArchiveError::Read {
                        name: entry.name().to_string(),
                        offset,
                        source,
                    },
                )));
            }
        };
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n]).map_err(io_err("write", dest))?;
        offset += n as u64;
    }
    Ok((Sha256Digest::from_bytes(&hasher.finalize().into()), offset))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), CommitError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_err("chmod", path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), CommitError> {
    Ok(())
}

fn write_receipt(path: &Path, receipt: &Receipt) -> Result<(), CommitError> {
    let json = serde_json::to_vec_pretty(receipt).map_err(|source| CommitError::Receipt {
        path: path.to_path_buf(),
        source,
    })?;
    let mut file = File::create(path).map_err(io_err("create", path))?;
    file.write_all(&json).map_err(io_err("write", path))?;
    file.sync_all().map_err(io_err("sync", path))
}

fn read_receipt(path: &Path) -> Result<Receipt, CommitError> {
    let bytes = fs::read(path).map_err(io_err("read", path))?;
    serde_json::from_slice(&bytes).map_err(|source| CommitError::Receipt {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove every generation of a package older than `keep`. Best effort.
fn prune(pkg_dir: &Path, keep: u64) {
    let Ok(entries) = list_dir(pkg_dir) else {
        return;
    };
    for entry in entries {
        let name = file_name(&entry);
        let Some(n) = name.split('.').next().and_then(|s| s.parse::<u64>().ok()) else {
            continue;
        };
        if n >= keep {
            continue;
        }
        let result = if entry.is_dir() {
            fs::remove_dir_all(&entry)
        } else {
            fs::remove_file(&entry)
        };
        match result {
            Ok(()) => debug!(path = %entry.display(), "pruned old generation"),
            Err(e) => warn!(path = %entry.display(), error = %e, "failed to prune old generation"),
        }
    }
}

/// Best-effort removal of a commit leftover. Anything but absence is logged.
fn discard(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    if let Err(e) = result.or_else(|e| match e.kind() {
        io::ErrorKind::NotFound => Ok(()),
        _ => Err(e),
    }) {
        warn!(path = %path.display(), error = %e, "failed to clean up commit leftover");
    }
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, CommitError> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err("read", dir)(e)),
    };
    let mut paths = read_dir
        .map(|e| e.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(io_err("read", dir))?;
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn remove_path(path: &Path, report: &mut RecoveryReport) -> Result<(), CommitError> {
    let meta = fs::symlink_metadata(path).map_err(io_err("stat", path))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).map_err(io_err("remove", path))?;
    } else {
        fs::remove_file(path).map_err(io_err("remove", path))?;
    }
    debug!(path = %path.display(), "removed");
    report.removed.push(path.to_path_buf());
    Ok(())
}

fn calculate_dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .flatten()
        .filter_map(|e| e.metadata().ok())
        .filter(std::fs::Metadata::is_file)
        .map(|m| m.len())
        .sum()
}
