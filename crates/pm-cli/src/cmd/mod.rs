//! Command handlers, one module per subcommand.

pub mod completions;
pub mod install;
pub mod list;
pub mod recover;
pub mod verify;
