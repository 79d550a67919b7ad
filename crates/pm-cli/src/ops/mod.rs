//! Package operations: the install pipeline and its typed stages.

pub mod context;
pub mod error;
pub mod flow;
pub mod install;

pub use context::Context;
pub use error::InstallError;
pub use install::{InstallOptions, InstallReport, PackageOutcome, PackageStatus, install};
