//! Reporter trait for dependency injection
//!
//! This trait allows core logic to report progress and status without
//! being coupled to a specific terminal implementation. It also serves as the
//! instrumentation hook for tests: `digesting` fires once per content digest
//! computed, so a test can assert that none happened for an untrusted archive.

use pm_schema::{PackageId, PackageMeta};

use crate::Stage;

pub trait Reporter: Send + Sync {
    /// The batch has been resolved to these packages.
    fn resolved(&self, packages: &[PackageMeta]);

    /// A package entered a pipeline stage.
    fn stage(&self, id: &PackageId, stage: Stage);

    /// Updates the progress of a download.
    fn downloading(&self, id: &PackageId, current: u64, total: Option<u64>);

    /// A content entry is about to be streamed through the digest.
    fn digesting(&self, id: &PackageId, path: &str);

    /// Marks a package as successfully completed.
    fn done(&self, id: &PackageId, detail: &str);

    /// Marks a package as failed with a specific reason.
    fn failed(&self, id: &PackageId, reason: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Display a final summary of the batch.
    fn summary(&self, installed: usize, failed: usize, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn resolved(&self, packages: &[PackageMeta]) {
        (**self).resolved(packages);
    }
    fn stage(&self, id: &PackageId, stage: Stage) {
        (**self).stage(id, stage);
    }
    fn downloading(&self, id: &PackageId, current: u64, total: Option<u64>) {
        (**self).downloading(id, current, total);
    }
    fn digesting(&self, id: &PackageId, path: &str) {
        (**self).digesting(id, path);
    }
    fn done(&self, id: &PackageId, detail: &str) {
        (**self).done(id, detail);
    }
    fn failed(&self, id: &PackageId, reason: &str) {
        (**self).failed(id, reason);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, installed: usize, failed: usize, elapsed_secs: f64) {
        (**self).summary(installed, failed, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn resolved(&self, _: &[PackageMeta]) {}
    fn stage(&self, _: &PackageId, _: Stage) {}
    fn downloading(&self, _: &PackageId, _: u64, _: Option<u64>) {}
    fn digesting(&self, _: &PackageId, _: &str) {}
    fn done(&self, _: &PackageId, _: &str) {}
    fn failed(&self, _: &PackageId, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: usize, _: f64) {}
}
