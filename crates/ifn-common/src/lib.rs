//! IFN Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the IFN export workspace.
//!
//! # Overview
//!
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Time**: the ISO time format used in profiles and catalogs, day
//!   boundaries and epoch conversions
//! - **Errors**: error type for the helpers above
//!
//! # Example
//!
//! ```no_run
//! use ifn_common::time::{from_iso_time, midnight};
//!
//! let start = from_iso_time("2024-01-01T13:45:00").unwrap();
//! assert_eq!(midnight(start).to_string(), "2024-01-01 00:00:00 UTC");
//! ```

pub mod error;
pub mod logging;
pub mod time;

// Re-export commonly used types
pub use error::{CommonError, Result};
