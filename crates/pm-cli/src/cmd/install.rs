//! Install command

use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use pm_core::Reporter;
use pm_core::catalog::AvailableDb;
use pm_core::io::download::Fetcher;
use pm_core::trust::Keyring;
use tokio_util::sync::CancellationToken;

use crate::ops::{self, Context, InstallOptions};
use crate::ui::{ConsoleReporter, table};
use crate::{Config, FetchArgs};

/// Fetch, verify and install `packages`.
pub async fn install(config: &Config, packages: &[String], fetch: &FetchArgs) -> Result<()> {
    let layout = config.layout.clone();
    let reporter = Arc::new(ConsoleReporter::new(config.quiet));

    let catalog = AvailableDb::load(&layout.available_db())
        .context("Failed to load available database")?;
    let keyring = Keyring::load(&layout.keyring_dir()).context("Failed to load keyring")?;
    if keyring.is_empty() && !config.dry_run {
        tracing::warn!(dir = %layout.keyring_dir().display(), "keyring is empty");
        reporter.warning(&format!(
            "no trusted keys in {}; every package will be rejected",
            layout.keyring_dir().display()
        ));
    }

    let fetcher = Fetcher::with_timeout(fetch.timeout(), fetch.options())
        .context("Failed to build HTTP client")?;
    let ctx = Context::new(
        layout,
        Arc::new(catalog),
        Arc::new(keyring),
        fetcher,
        reporter,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let options = InstallOptions {
        dry_run: config.dry_run,
        fail_fast: fetch.fail_fast,
    };
    let report = ops::install(&ctx, packages, options, &cancel).await?;

    if config.dry_run {
        println!("Dry run: nothing was fetched or installed.");
        println!("{}", table::install_report(&report));
        return Ok(());
    }
    if !config.quiet {
        println!("{}", table::install_report(&report));
    }

    let failed = report.failed_count();
    if failed > 0 {
        bail!("{failed} of {} package(s) failed", report.outcomes.len());
    }
    Ok(())
}
