use std::path::{Path, PathBuf};

use pm_schema::PackageId;

/// Cache directory, relative to the install root.
pub const CACHE_DIR: &str = "var/cache/pm";

/// Keyring directory holding trusted `*.pub` keys, relative to the root.
pub const KEYRING_DIR: &str = "etc/pm/keyring";

/// Package state directory, relative to the root.
pub const STATE_DIR: &str = "var/lib/pm";

/// Every on-disk location `pm` touches, derived from a single root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Create a layout rooted at `root` (usually `/`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The install root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Archive cache: `<root>/var/cache/pm`
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    /// Cached archive for one package: `<root>/var/cache/pm/<id>`
    pub fn cached_archive(&self, id: &PackageId) -> PathBuf {
        self.cache_dir().join(id)
    }

    /// Trusted keys: `<root>/etc/pm/keyring`
    pub fn keyring_dir(&self) -> PathBuf {
        self.root.join(KEYRING_DIR)
    }

    /// Available package database: `<root>/var/lib/pm/available.json`
    pub fn available_db(&self) -> PathBuf {
        self.root.join(STATE_DIR).join("available.json")
    }

    /// Committed generations: `<root>/var/lib/pm/generations`
    pub fn generations_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR).join("generations")
    }

    /// Live links, one per installed package: `<root>/var/lib/pm/installed`
    pub fn installed_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR).join("installed")
    }
}
