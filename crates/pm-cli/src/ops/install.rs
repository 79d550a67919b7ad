//! Package installation pipeline.
//!
//! The main entry point is [`install`]:
//!
//! 1. Resolve the requested names through the catalog. A failure here, or two
//!    packages sharing an identifier, aborts the batch before any network I/O.
//! 2. Make sure the cache directory exists.
//! 3. Fetch every archive concurrently (bounded by the fetcher's job count).
//! 4. For each fetched package, in request order: authenticate the manifest,
//!    verify the contents, commit. These steps are CPU and disk bound and run
//!    on the blocking pool, one package at a time.
//!
//! Every package ends up with its own [`PackageOutcome`]. With `fail_fast`
//! the first failure is returned as the call's error instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pm_core::Stage;
use pm_core::catalog;
use pm_core::io::download::{self, FetchError, FetchOutcome};
use pm_core::store;
use pm_schema::PackageMeta;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ops::flow::{FetchedPackage, InstalledPackage};
use crate::ops::{Context, InstallError};

/// Batch-level switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Resolve and report the plan without touching the network or disk.
    pub dry_run: bool,
    /// Return the first failure instead of recording it and moving on.
    pub fail_fast: bool,
}

#[derive(Debug)]
pub enum PackageStatus {
    /// Would be installed (dry run).
    Planned,
    Installed(store::InstalledPackage),
    Failed(InstallError),
}

#[derive(Debug)]
pub struct PackageOutcome {
    pub meta: PackageMeta,
    pub status: PackageStatus,
}

#[derive(Debug)]
pub struct InstallReport {
    pub outcomes: Vec<PackageOutcome>,
    pub elapsed: Duration,
}

impl InstallReport {
    pub fn installed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, PackageStatus::Installed(_)))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &InstallError> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            PackageStatus::Failed(e) => Some(e),
            _ => None,
        })
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }
}

/// Resolve, fetch, verify and commit `requests`.
pub async fn install(
    ctx: &Context,
    requests: &[String],
    options: InstallOptions,
    cancel: &CancellationToken,
) -> Result<InstallReport, InstallError> {
    let start = Instant::now();
    let reporter = &ctx.reporter;

    let metas = ctx.catalog.installable(requests)?;
    catalog::ensure_distinct_ids(&metas)?;
    reporter.resolved(&metas);
    info!(
        packages = metas.len(),
        dry_run = options.dry_run,
        "resolved install batch"
    );

    if options.dry_run {
        return Ok(InstallReport {
            outcomes: metas
                .into_iter()
                .map(|meta| PackageOutcome {
                    meta,
                    status: PackageStatus::Planned,
                })
                .collect(),
            elapsed: start.elapsed(),
        });
    }

    let cache_dir = ctx.layout.cache_dir();
    download::ensure_cache_dir(&cache_dir)
        .await
        .map_err(InstallError::Cache)?;

    for meta in &metas {
        reporter.stage(&meta.id(), Stage::Fetching);
    }
    let mut fetched = ctx
        .fetcher
        .fetch_all(&cache_dir, &metas, Arc::clone(reporter), cancel)
        .await;

    if let Some(pos) = fetched
        .iter()
        .position(|o| options.fail_fast && is_root_fetch_failure(o))
    {
        let FetchOutcome { meta, result, .. } = fetched.swap_remove(pos);
        let package = meta.id();
        if let Err(source) = result {
            reporter.failed(&package, &source.to_string());
            return Err(InstallError::Fetch { package, source });
        }
    }

    let mut outcomes = Vec::with_capacity(fetched.len());
    for outcome in fetched {
        let meta = outcome.meta.clone();
        let id = meta.id();

        let result = match outcome.result {
            Err(source) => Err(InstallError::Fetch {
                package: id.clone(),
                source,
            }),
            Ok(_) if cancel.is_cancelled() => Err(InstallError::Interrupted {
                package: id.clone(),
                stage: Stage::VerifyingTrust,
            }),
            Ok(bytes) => {
                debug!(%id, bytes, "fetched, verifying");
                verify_and_commit(ctx, FetchedPackage::new(outcome.meta, outcome.path)).await
            }
        };

        let status = match result {
            Ok(installed) => {
                let record = installed.record;
                reporter.done(
                    &id,
                    &format!("generation {}, {} files", record.generation, record.files),
                );
                PackageStatus::Installed(record)
            }
            Err(e) => {
                warn!(%id, stage = %e.stage(), kind = ?e.kind(), error = %e, "package failed");
                reporter.failed(&id, &e.to_string());
                if options.fail_fast {
                    return Err(e);
                }
                PackageStatus::Failed(e)
            }
        };
        outcomes.push(PackageOutcome { meta, status });
    }

    let report = InstallReport {
        outcomes,
        elapsed: start.elapsed(),
    };
    reporter.summary(
        report.installed_count(),
        report.failed_count(),
        report.elapsed.as_secs_f64(),
    );
    Ok(report)
}

/// A fetch failure that was not itself caused by cancelling the batch.
fn is_root_fetch_failure(outcome: &FetchOutcome) -> bool {
    matches!(&outcome.result, Err(e) if !matches!(e, FetchError::Cancelled))
}

/// Run the trust, content and commit stages for one package on the
/// blocking pool.
async fn verify_and_commit(
    ctx: &Context,
    fetched: FetchedPackage,
) -> Result<InstalledPackage, InstallError> {
    let trust = Arc::clone(&ctx.trust);
    let reporter = Arc::clone(&ctx.reporter);
    let store = ctx.store.clone();
    let id = fetched.id.clone();

    let handle = tokio::task::spawn_blocking(move || {
        reporter.stage(&fetched.id, Stage::VerifyingTrust);
        let trusted = fetched.verify_trust(trust.as_ref())?;
        debug!(id = %trusted.fetched.id, files = trusted.declared_files(), "manifest trusted");

        reporter.stage(&trusted.fetched.id, Stage::VerifyingContent);
        let verified = trusted.verify_contents(reporter.as_ref())?;

        reporter.stage(verified.id(), Stage::Committing);
        verified.commit(&store)
    });

    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(InstallError::Interrupted {
            package: id,
            stage: Stage::VerifyingTrust,
        }),
    }
}
