//! Domain-specific errors for package operations

use pm_core::catalog::ResolveError;
use pm_core::io::download::FetchError;
use pm_core::store::CommitError;
use pm_core::verify::VerifyError;
use pm_core::{ErrorKind, Stage};
use pm_schema::PackageId;
use thiserror::Error;

/// A pipeline failure, tagged with the stage it happened in.
///
/// Callers branch on [`stage`](Self::stage), [`kind`](Self::kind) and
/// [`package`](Self::package); the display string is for humans only.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to resolve packages: {0}")]
    Resolution(#[from] ResolveError),

    #[error("Package cache unavailable: {0}")]
    Cache(#[source] FetchError),

    #[error("{package}: download failed: {source}")]
    Fetch {
        package: PackageId,
        #[source]
        source: FetchError,
    },

    #[error("{package}: manifest not trusted: {source}")]
    Trust {
        package: PackageId,
        #[source]
        source: VerifyError,
    },

    #[error("{package}: content verification failed: {source}")]
    Content {
        package: PackageId,
        #[source]
        source: VerifyError,
    },

    #[error("{package}: commit failed: {source}")]
    Commit {
        package: PackageId,
        #[source]
        source: CommitError,
    },

    #[error("{package}: interrupted while {stage}")]
    Interrupted { package: PackageId, stage: Stage },
}

impl InstallError {
    /// The pipeline stage the failure surfaced in.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Resolution(_) => Stage::Resolving,
            Self::Cache(_) | Self::Fetch { .. } => Stage::Fetching,
            Self::Trust { .. } => Stage::VerifyingTrust,
            Self::Content { .. } => Stage::VerifyingContent,
            Self::Commit { .. } => Stage::Committing,
            Self::Interrupted { stage, .. } => *stage,
        }
    }

    /// Failure class of the underlying cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution(e) => e.kind(),
            Self::Cache(e) | Self::Fetch { source: e, .. } => e.kind(),
            Self::Trust { source, .. } | Self::Content { source, .. } => source.kind(),
            Self::Commit { source, .. } => source.kind(),
            Self::Interrupted { .. } => ErrorKind::Transport,
        }
    }

    /// The package the failure belongs to; `None` for batch-level failures.
    pub fn package(&self) -> Option<&PackageId> {
        match self {
            Self::Resolution(_) | Self::Cache(_) => None,
            Self::Fetch { package, .. }
            | Self::Trust { package, .. }
            | Self::Content { package, .. }
            | Self::Commit { package, .. }
            | Self::Interrupted { package, .. } => Some(package),
        }
    }

    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
