//! IFN Export Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental export of survey responses and analytics table builder.
//!
//! # Overview
//!
//! - **Sync** (`ifn-export sync`): fetch responses window by window into an
//!   append-only raw store; an [`catalog::ExportCatalog`] records the
//!   synchronized windows so a restart never re-fetches or duplicates data
//! - **Schema** (`ifn-export schema`): infer column kinds from the survey
//!   definitions stored with the responses
//! - **Build** (`ifn-export build`): read the raw store in batches, run the
//!   version-aware [`processor::Pipeline`] and append to an analytics table
//!   whose columns grow with the data
//! - **Describe** / **rename-test**: inspection helpers

pub mod batch;
pub mod catalog;
pub mod commands;
pub mod debug;
pub mod describe;
pub mod error;
pub mod exporter;
pub mod importer;
pub mod processor;
pub mod profile;
pub mod schema;
pub mod source;
pub mod store;
pub mod version;

// Re-export commonly used types
pub use error::{ExportError, Result};
pub use profile::Profile;
pub use version::{SurveyVersion, VersionSelector};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// IFN Export - incremental survey response export
#[derive(Parser, Debug)]
#[command(name = "ifn-export")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synchronize the raw store of one or more survey profiles
    Sync {
        /// Profile file (repeat for a sync plan)
        #[arg(short, long = "profile", required = true)]
        profiles: Vec<PathBuf>,

        /// Restart from the profile from_time
        #[arg(long)]
        restart: bool,

        /// Restart from this time (YYYY-MM-DDTHH:MM:SS)
        #[arg(long, conflicts_with = "restart")]
        start_from: Option<String>,

        /// Read responses from a JSON dump instead of the management API
        #[arg(long)]
        input: Option<PathBuf>,

        /// Override a profile value (key.path=value)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },

    /// Infer the column schema from stored survey definitions
    Schema {
        /// Profile file
        #[arg(short, long)]
        profile: PathBuf,

        /// Version selector (e.g. "1-0:1-9;!1-5")
        #[arg(long)]
        versions: Option<String>,

        /// Previous schema file to update
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (YAML), printed when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the output even if problems were found
        #[arg(short, long)]
        force: bool,
    },

    /// Build the analytics table from the raw store
    Build {
        /// Profile file
        #[arg(short, long)]
        profile: PathBuf,

        /// Only show the resolved profile and exit
        #[arg(long)]
        only_show: bool,

        /// Process everything but write nothing
        #[arg(long)]
        dry_run: bool,

        /// Override a profile value (key.path=value)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },

    /// Show tables, row counts and time ranges of a database
    Describe {
        /// Database file
        #[arg(long)]
        db: PathBuf,
    },

    /// Apply the default renaming to a JSON list of column names
    RenameTest {
        /// JSON file with the column names
        #[arg(short, long)]
        file: PathBuf,

        /// Key separator
        #[arg(short, long, default_value = "|")]
        separator: String,
    },
}
