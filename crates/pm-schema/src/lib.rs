//! Shared types for `pm`.
//!
//! Everything here is plain data: identities of resolvable packages and the
//! digest newtype used by manifests. No IO lives in this crate.

pub mod hash;
pub mod types;

// Re-exports
pub use hash::*;
pub use types::*;
