//! Pipeline stages and the error taxonomy shared by every component.
//!
//! Each component error exposes `kind()` so callers can branch on the class
//! of failure (network vs. integrity vs. trust) without inspecting messages.

use std::fmt;

/// A step of the install pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Turning requested names into package records.
    Resolving,
    /// Downloading archives into the cache.
    Fetching,
    /// Checking the manifest signature against the trust store.
    VerifyingTrust,
    /// Re-hashing archive contents against the trusted manifest.
    VerifyingContent,
    /// Materializing a verified archive into the store.
    Committing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolving => "resolving",
            Self::Fetching => "fetching",
            Self::VerifyingTrust => "verifying trust",
            Self::VerifyingContent => "verifying content",
            Self::Committing => "committing",
        })
    }
}

/// Class of a failure, independent of the stage it surfaced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown or conflicting request.
    Resolution,
    /// Network or HTTP failure. The only transient class.
    Transport,
    /// Local filesystem failure around the cache.
    Cache,
    /// Malformed manifest or archive structure.
    Format,
    /// Signature absent, unparsable, or not made by a trusted key.
    Trust,
    /// Archive contents disagree with the trusted manifest.
    Content,
    /// Failure while materializing a verified archive.
    Commit,
    /// A worker task panicked or was aborted.
    Internal,
}

impl ErrorKind {
    /// Whether automatic retry (with backoff) is appropriate for this class.
    pub fn is_retryable(self) -> bool {
        self == Self::Transport
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolution => "resolution",
            Self::Transport => "transport",
            Self::Cache => "cache",
            Self::Format => "format",
            Self::Trust => "trust",
            Self::Content => "content",
            Self::Commit => "commit",
            Self::Internal => "internal",
        })
    }
}
