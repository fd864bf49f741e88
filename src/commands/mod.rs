//! Subcommand implementations

pub mod live;
pub mod replay;
