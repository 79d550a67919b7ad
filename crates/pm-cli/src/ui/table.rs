//! Tabular summaries rendered with comfy-table.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};
use pm_core::store::InstalledPackage;
use pm_schema::PackageMeta;

use super::format_size;
use crate::ops::{InstallReport, PackageStatus};

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

/// One row per package of an install batch.
pub fn install_report(report: &InstallReport) -> Table {
    let mut table = new_table(&["Package", "Version", "Status", "Detail"]);
    for outcome in &report.outcomes {
        let (status, detail) = match &outcome.status {
            PackageStatus::Planned => ("planned".to_string(), String::new()),
            PackageStatus::Installed(record) => (
                "installed".to_string(),
                format!(
                    "generation {}, {} files, {}",
                    record.generation,
                    record.files,
                    format_size(record.size_bytes)
                ),
            ),
            PackageStatus::Failed(e) => (format!("failed ({})", e.stage()), e.to_string()),
        };
        table.add_row(vec![
            outcome.meta.name.to_string(),
            outcome.meta.version.to_string(),
            status,
            detail,
        ]);
    }
    table
}

/// Live packages in the store.
pub fn installed(packages: &[InstalledPackage]) -> Table {
    let mut table = new_table(&["Package", "Generation", "Files", "Size"]);
    for pkg in packages {
        table.add_row(vec![
            pkg.id.to_string(),
            pkg.generation.to_string(),
            pkg.files.to_string(),
            format_size(pkg.size_bytes),
        ]);
    }
    table
}

/// Packages listed in the available database.
pub fn available<'a>(packages: impl IntoIterator<Item = &'a PackageMeta>) -> Table {
    let mut table = new_table(&["Package", "Version", "Source"]);
    for meta in packages {
        table.add_row(vec![
            meta.name.to_string(),
            meta.version.to_string(),
            meta.url.clone(),
        ]);
    }
    table
}
