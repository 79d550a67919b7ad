//! Package identity: validated names, versions and identifiers.

use serde::{Deserialize, Serialize};

/// Errors that can occur when validating a package identity component.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentError {
    /// The component is empty.
    #[error("empty {0}")]
    Empty(&'static str),

    /// The component contains a character outside `[A-Za-z0-9._+-]`.
    #[error("invalid character {ch:?} in {what} '{value}'")]
    InvalidChar {
        /// Which component was being validated ("name" or "version").
        what: &'static str,
        /// The offending input.
        value: String,
        /// The first character that is not allowed.
        ch: char,
    },

    /// The component starts with `.` or `-`.
    #[error("{what} '{value}' must not start with '.' or '-'")]
    LeadingPunctuation {
        /// Which component was being validated ("name" or "version").
        what: &'static str,
        /// The offending input.
        value: String,
    },

    /// The version contains `-`, which separates name and version in a
    /// [`PackageId`].
    #[error("version '{0}' must not contain '-'")]
    VersionSeparator(String),
}

/// Checks that `value` can be embedded in a single path component.
fn validate_token(what: &'static str, value: &str) -> Result<(), IdentError> {
    if value.is_empty() {
        return Err(IdentError::Empty(what));
    }
    if let Some(ch) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-')))
    {
        return Err(IdentError::InvalidChar {
            what,
            value: value.to_string(),
            ch,
        });
    }
    if value.starts_with(['.', '-']) {
        return Err(IdentError::LeadingPunctuation {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Name of a package, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Create a validated package name.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError`] if the name is empty, starts with punctuation,
    /// or contains characters that are unsafe in a filename.
    pub fn new(name: &str) -> Result<Self, IdentError> {
        let name = name.to_lowercase();
        validate_token("name", &name)?;
        Ok(Self(name))
    }

    /// Return the normalized name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PackageName {
    type Error = IdentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PackageName> for String {
    fn from(name: PackageName) -> Self {
        name.0
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

/// Version string of a package, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    /// Create a validated version.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError`] under the same rules as [`PackageName::new`],
    /// and additionally if the version contains `-`.
    pub fn new(version: &str) -> Result<Self, IdentError> {
        validate_token("version", version)?;
        if version.contains('-') {
            return Err(IdentError::VersionSeparator(version.to_string()));
        }
        Ok(Self(version.to_string()))
    }

    /// Return the version as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Version {
    type Error = IdentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for Version {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Stable, filesystem-safe package identifier: `<name>-<version>`.
///
/// Used as the cache filename and as the key of the installed store. Because
/// both halves are validated tokens the identifier is always exactly one path
/// component. Versions never contain `-`, so the last `-` splits the two
/// halves and distinct packages never share an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Derive the identifier for `name` at `version`.
    pub fn new(name: &PackageName, version: &Version) -> Self {
        Self(format!("{name}-{version}"))
    }

    /// Return the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild an identifier read back from disk (e.g. a store entry name).
    ///
    /// # Errors
    ///
    /// Returns [`IdentError`] if `raw` is not a safe single path component.
    pub fn parse(raw: &str) -> Result<Self, IdentError> {
        validate_token("package id", raw)?;
        Ok(Self(raw.to_string()))
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<std::path::Path> for PackageId {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of a resolvable package, as produced by the catalog.
///
/// Immutable once resolved; the fetcher and the orchestrator only read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMeta {
    /// Package name (e.g. "foo").
    pub name: PackageName,

    /// Version string (e.g. "1.0").
    pub version: Version,

    /// Source URL of the package archive.
    pub url: String,
}

impl PackageMeta {
    /// Create a new package record.
    pub fn new(name: PackageName, version: Version, url: impl Into<String>) -> Self {
        Self {
            name,
            version,
            url: url.into(),
        }
    }

    /// The identifier used for the cache file and the store entry.
    pub fn id(&self) -> PackageId {
        PackageId::new(&self.name, &self.version)
    }
}

impl std::fmt::Display for PackageMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
