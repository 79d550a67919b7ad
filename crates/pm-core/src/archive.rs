//! Read access to package archives.
//!
//! An archive is a tape of named entries. Two access patterns are supported:
//! first-match extraction of a single entry (the manifest and its signature)
//! and a full forward-only traversal (content verification and commit). Each
//! handle supports exactly one pass; re-open the archive to rewind. Entry
//! readers borrow the handle, so the file descriptor is released on every
//! exit path when the handle is dropped.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::ErrorKind;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive {} not found", path.display())]
    NotFound { path: PathBuf },

    #[error("cannot open archive {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("tar traversal of {} failed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("entry {name:?} not found in {}", path.display())]
    EntryNotFound { path: PathBuf, name: String },

    #[error("entry name is not valid UTF-8: {name:?}")]
    InvalidEntryName { name: String },

    #[error("reading entry {name:?} failed after {offset} bytes: {source}")]
    Read {
        name: String,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("entry {name:?} exceeds the {limit} byte limit")]
    TooLarge { name: String, limit: u64 },
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::Unreadable { .. } => ErrorKind::Cache,
            _ => ErrorKind::Format,
        }
    }
}

/// Type of an archive entry, as far as verification cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular (or contiguous) file with content.
    File,
    /// Directory; carries no digest.
    Directory,
    /// PAX / GNU bookkeeping header that describes other entries.
    Metadata,
    /// Anything else (symlink, hard link, device, fifo, sparse), by type flag.
    Other(u8),
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Directory => f.write_str("directory"),
            Self::Metadata => f.write_str("metadata"),
            Self::Other(flag) => write!(f, "type flag {:?}", char::from(*flag)),
        }
    }
}

impl From<tar::EntryType> for EntryKind {
    fn from(ty: tar::EntryType) -> Self {
        if ty.is_file() || ty.is_contiguous() {
            Self::File
        } else if ty.is_dir() {
            Self::Directory
        } else if ty.is_pax_global_extensions()
            || ty.is_pax_local_extensions()
            || ty.is_gnu_longname()
            || ty.is_gnu_longlink()
        {
            Self::Metadata
        } else {
            Self::Other(ty.as_byte())
        }
    }
}

type TarReader = BufReader<File>;

/// An open package archive. One traversal per handle.
pub struct PackageArchive {
    path: PathBuf,
    archive: tar::Archive<TarReader>,
}

impl std::fmt::Debug for PackageArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageArchive")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl PackageArchive {
    /// Open the archive at `path`.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ArchiveError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ArchiveError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            archive: tar::Archive::new(BufReader::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazy, forward-only sequence of entries in physical order.
    pub fn entries(&mut self) -> Result<Entries<'_>, ArchiveError> {
        let path = &self.path;
        let inner = self
            .archive
            .entries()
            .map_err(|source| ArchiveError::Malformed {
                path: path.clone(),
                source,
            })?;
        Ok(Entries {
            path,
            inner,
            done: false,
        })
    }

    /// Scan forward to the first entry called `name` and return its reader.
    ///
    /// Later entries with the same name are never looked at.
    pub fn extract_named(&mut self, name: &str) -> Result<ArchiveEntry<'_>, ArchiveError> {
        let path = self.path.clone();
        for entry in self.entries()? {
            let entry = entry?;
            if entry.name() == name {
                return Ok(entry);
            }
        }
        Err(ArchiveError::EntryNotFound {
            path,
            name: name.to_string(),
        })
    }

    /// Extract the first entry called `name` fully into memory, refusing
    /// entries longer than `limit` bytes.
    pub fn read_named(&mut self, name: &str, limit: u64) -> Result<Vec<u8>, ArchiveError> {
        let entry = self.extract_named(name)?;
        let mut buf = Vec::new();
        entry
            .take(limit + 1)
            .read_to_end(&mut buf)
            .map_err(|source| ArchiveError::Read {
                name: name.to_string(),
                offset: buf.len() as u64,
                source,
            })?;

        if buf.len() as u64 > limit {
            return Err(ArchiveError::TooLarge {
                name: name.to_string(),
                limit,
            });
        }
        Ok(buf)
    }
}

/// Iterator over the entries of a [`PackageArchive`].
pub struct Entries<'a> {
    path: &'a Path,
    inner: tar::Entries<'a, TarReader>,
    done: bool,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<ArchiveEntry<'a>, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = match self.inner.next()? {
            Ok(entry) => ArchiveEntry::new(entry),
            Err(source) => Err(ArchiveError::Malformed {
                path: self.path.to_path_buf(),
                source,
            }),
        };
        // tar keeps yielding errors after a corrupt header; stop at the first.
        self.done = result.is_err();
        Some(result)
    }
}

/// One entry of an archive: its name, type, and a reader over its bytes.
pub struct ArchiveEntry<'a> {
    name: String,
    kind: EntryKind,
    mode: u32,
    inner: tar::Entry<'a, TarReader>,
}

impl<'a> ArchiveEntry<'a> {
    fn new(inner: tar::Entry<'a, TarReader>) -> Result<Self, ArchiveError> {
        let name = String::from_utf8(inner.path_bytes().into_owned()).map_err(|e| {
            ArchiveError::InvalidEntryName {
                name: String::from_utf8_lossy(e.as_bytes()).into_owned(),
            }
        })?;
        let kind = EntryKind::from(inner.header().entry_type());
        let mode = inner.header().mode().unwrap_or(0o644);
        Ok(Self {
            name,
            kind,
            mode,
            inner,
        })
    }

    /// Path of the entry inside the archive, exactly as recorded.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Unix permission bits recorded in the header.
    pub fn mode(&self) -> u32 {
        self.mode
    }
}

impl Read for ArchiveEntry<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl std::fmt::Debug for ArchiveEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
