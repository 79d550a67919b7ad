//! Recover command

use anyhow::{Context, Result};
use pm_core::store::Store;

use crate::Config;

/// Sweep leftovers of interrupted installs from the store.
pub fn recover(config: &Config) -> Result<()> {
    let store = Store::new(config.layout.clone());

    if config.dry_run {
        println!(
            "Dry run: would sweep {}",
            config.layout.generations_dir().display()
        );
        return Ok(());
    }

    let report = store.recover().context("Failed to recover store")?;
    if report.is_empty() {
        if !config.quiet {
            println!("Store is clean.");
        }
        return Ok(());
    }

    for path in &report.removed {
        if !config.quiet {
            println!("  removed {}", path.display());
        }
    }
    println!("Removed {} leftover path(s).", report.removed.len());
    Ok(())
}
