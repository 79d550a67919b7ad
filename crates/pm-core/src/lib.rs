pub mod archive;
pub mod catalog;
pub mod error;
pub mod io;
pub mod manifest;
pub mod paths;
pub mod reporter;
pub mod store;
pub mod trust;
pub mod verify;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::{ErrorKind, Stage};
pub use paths::Layout;
pub use reporter::{NullReporter, Reporter};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("pm-core/", env!("CARGO_PKG_VERSION"));
