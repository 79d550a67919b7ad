//! Verify command

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use pm_core::trust::Keyring;
use pm_core::verify::verify_archive;
use pm_core::{NullReporter, Reporter};
use pm_schema::PackageId;

use crate::Config;
use crate::ui::{ConsoleReporter, format_size};

fn package_id(archive: &Path) -> Result<PackageId> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", archive.display()))?;
    PackageId::parse(name).with_context(|| format!("Invalid package id for {}", archive.display()))
}

/// Authenticate and verify each archive in place, without installing it.
pub fn verify(config: &Config, archives: &[PathBuf]) -> Result<()> {
    let keyring = Keyring::load(&config.layout.keyring_dir()).context("Failed to load keyring")?;
    let reporter = ConsoleReporter::new(config.quiet);

    let mut failed = 0usize;
    for archive in archives {
        let id = package_id(archive)?;
        match verify_archive(archive, &id, &keyring, &NullReporter) {
            Ok(verified) => reporter.done(
                &id,
                &format!(
                    "{} files, {} verified",
                    verified.manifest().len(),
                    format_size(verified.bytes_verified())
                ),
            ),
            Err(e) => {
                failed += 1;
                reporter.failed(&id, &format!("{e} [{:?}]", e.kind()));
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} archive(s) failed verification", archives.len());
    }
    Ok(())
}
