//! List command

use anyhow::{Context, Result};
use pm_core::catalog::AvailableDb;
use pm_core::store::Store;

use crate::Config;
use crate::ui::table;

/// List installed packages, or installable ones with `available`.
pub fn list(config: &Config, available: bool) -> Result<()> {
    if available {
        let path = config.layout.available_db();
        let db = AvailableDb::load(&path).context("Failed to load available database")?;
        if db.is_empty() {
            println!("No packages available.");
        } else {
            println!("{}", table::available(db.iter()));
        }
        return Ok(());
    }

    let packages = Store::new(config.layout.clone())
        .installed()
        .context("Failed to read installed packages")?;

    if packages.is_empty() {
        println!();
        println!("  No packages installed.");
        println!("  Run 'pm install <package>' to get started.");
        return Ok(());
    }

    println!("{}", table::installed(&packages));
    Ok(())
}
