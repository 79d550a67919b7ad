//! pm - verified package installation
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Fetches package archives into a local cache, authenticates each archive's
//! manifest against a keyring, re-hashes every file the archive carries, and
//! only then commits the package as a new store generation.
//!
//! # Architecture
//!
//! - **Typestate Pattern**: `FetchedPackage` → `TrustedPackage` →
//!   `VerifiedPackage` → `InstalledPackage`; content is never compared against
//!   an unauthenticated manifest and nothing unverified reaches the store.
//! - **Per-package outcomes**: a batch reports every package's result, tagged
//!   with the stage it failed in.
//!
//! # Directory Layout
//!
//! ```text
//! <root>/
//! ├── etc/pm/keyring/          # Trusted Ed25519 keys (*.pub)
//! ├── var/cache/pm/<id>        # Fetched archives
//! └── var/lib/pm/
//!     ├── available.json       # Installable packages
//!     ├── generations/<id>/<n> # Committed generations
//!     └── installed/<id>       # Link to the live generation
//! ```

pub mod cmd;
pub mod config;
pub mod ops;
pub mod ui;

pub use config::Config;
pub use pm_core::USER_AGENT;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pm")]
#[command(author, version, about = "pm - verified package installation")]
pub struct Cli {
    /// Install root; every path pm touches is derived from it
    #[arg(long, global = true, env = "PM_ROOT", default_value = "/")]
    pub root: PathBuf,

    /// Show what would happen without making changes
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch, verify and install packages
    Install {
        /// Package name(s), optionally with version: pkg or pkg@1.0
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Verify archives against the keyring without installing them
    Verify {
        /// Archive file(s); the file name is used as the package id
        #[arg(required = true)]
        archives: Vec<PathBuf>,
    },
    /// List installed packages
    List {
        /// List installable packages from the available database instead
        #[arg(long)]
        available: bool,
    },
    /// Remove leftovers of interrupted installs
    Recover,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Network settings for commands that fetch.
#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// Maximum concurrent downloads
    #[arg(short, long, env = "PM_JOBS", default_value_t = 4)]
    pub jobs: usize,

    /// Per-request timeout in seconds
    #[arg(long, env = "PM_TIMEOUT", default_value_t = 300)]
    pub timeout: u64,

    /// Retries after a transient network failure
    #[arg(long, env = "PM_RETRIES", default_value_t = 2)]
    pub retries: u32,

    /// Abort the whole batch on the first failure
    #[arg(long)]
    pub fail_fast: bool,
}
