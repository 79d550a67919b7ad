//! Runtime configuration assembled from the parsed command line.
//!
//! Every flag has an environment fallback (`PM_ROOT`, `PM_JOBS`,
//! `PM_TIMEOUT`, `PM_RETRIES`); clap resolves those before we get here.

use std::time::Duration;

use pm_core::Layout;
use pm_core::io::download::FetchOptions;

use crate::{Cli, FetchArgs};

/// Delay before the first retry of a transient fetch failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct Config {
    pub layout: Layout,
    pub dry_run: bool,
    pub quiet: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            layout: Layout::new(&cli.root),
            dry_run: cli.dry_run,
            quiet: cli.quiet,
        }
    }
}

impl FetchArgs {
    pub fn options(&self) -> FetchOptions {
        FetchOptions {
            jobs: self.jobs.max(1),
            retries: self.retries,
            backoff: RETRY_BACKOFF,
            fail_fast: self.fail_fast,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Commands;
    use clap::Parser;
    use std::path::Path;

    #[test]
    fn install_flags() {
        let cli = Cli::try_parse_from([
            "pm",
            "--root",
            "/tmp/pmroot",
            "install",
            "foo",
            "bar@2.0",
            "--jobs",
            "8",
            "--retries",
            "0",
            "--fail-fast",
        ])
        .unwrap();

        let config = Config::from_cli(&cli);
        assert_eq!(config.layout.root(), Path::new("/tmp/pmroot"));
        assert!(!config.dry_run);

        let Commands::Install { packages, fetch } = cli.command else {
            panic!("expected install");
        };
        assert_eq!(packages, vec!["foo", "bar@2.0"]);

        let options = fetch.options();
        assert_eq!(options.jobs, 8);
        assert_eq!(options.retries, 0);
        assert!(options.fail_fast);
        assert_eq!(fetch.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn zero_jobs_still_makes_progress() {
        let cli = Cli::try_parse_from(["pm", "install", "foo", "-j", "0"]).unwrap();
        let Commands::Install { fetch, .. } = cli.command else {
            panic!("expected install");
        };
        assert_eq!(fetch.options().jobs, 1);
    }

    #[test]
    fn install_requires_a_package() {
        assert!(Cli::try_parse_from(["pm", "install"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pm", "list", "--dry-run", "-q"]).unwrap();
        let config = Config::from_cli(&cli);
        assert!(config.dry_run);
        assert!(config.quiet);
    }
}
