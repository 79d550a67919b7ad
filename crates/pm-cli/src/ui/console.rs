//! Line-oriented console reporter.
//!
//! Progress goes to stdout, failures to stderr. `--quiet` keeps only
//! failures and warnings.

use crossterm::style::Stylize;
use pm_core::{Reporter, Stage};
use pm_schema::{PackageId, PackageMeta};

use super::format_size;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Reporter for ConsoleReporter {
    fn resolved(&self, packages: &[PackageMeta]) {
        if self.quiet || packages.is_empty() {
            return;
        }
        let names: Vec<String> = packages.iter().map(ToString::to_string).collect();
        println!(
            "{} {} package(s): {}",
            "Resolved".bold(),
            packages.len(),
            names.join(", ")
        );
    }

    fn stage(&self, id: &PackageId, stage: Stage) {
        tracing::debug!(%id, %stage, "stage");
        if !self.quiet && stage != Stage::Fetching {
            println!("  {} {id} {}", "·".dark_grey(), stage.to_string().dark_grey());
        }
    }

    fn downloading(&self, id: &PackageId, current: u64, total: Option<u64>) {
        if self.quiet || current != 0 {
            return;
        }
        match total {
            Some(size) => println!("  {} {id} ({})", "↓".cyan(), format_size(size)),
            None => println!("  {} {id}", "↓".cyan()),
        }
    }

    fn digesting(&self, id: &PackageId, path: &str) {
        tracing::trace!(%id, path, "digesting");
    }

    fn done(&self, id: &PackageId, detail: &str) {
        if !self.quiet {
            println!("  {} {id} {}", "✔".green(), detail.dark_grey());
        }
    }

    fn failed(&self, id: &PackageId, reason: &str) {
        eprintln!("  {} {id} {reason}", "✘".red());
    }

    fn warning(&self, msg: &str) {
        eprintln!("{} {msg}", "warning:".yellow().bold());
    }

    fn summary(&self, installed: usize, failed: usize, elapsed_secs: f64) {
        if self.quiet && failed == 0 {
            return;
        }
        let failed_text = format!("{failed} failed");
        let failed_text = if failed > 0 {
            failed_text.red().to_string()
        } else {
            failed_text
        };
        println!(
            "{} {installed} installed, {failed_text} in {elapsed_secs:.1}s",
            "Done:".bold()
        );
    }
}
