//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod build;
pub mod describe;
pub mod rename;
pub mod schema;
pub mod sync;
