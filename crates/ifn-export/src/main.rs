//! IFN Export - Main entry point

use clap::Parser;
use ifn_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use ifn_export::{Cli, Commands};
use std::process;
use tracing::error;

fn main() {
    // API credentials may come from a .env file
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: unable to load .env: {}", e);
        }
    }

    let cli = Cli::parse();

    // Verbose mode logs debug to the console, otherwise only info and above
    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("ifn-export")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: ignoring LOG_* settings: {:#}", e);
            log_config
        },
    };

    // The CLI works without logging
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    if let Err(e) = execute_command(&cli) {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn execute_command(cli: &Cli) -> ifn_export::Result<()> {
    match &cli.command {
        Commands::Sync {
            profiles,
            restart,
            start_from,
            input,
            overrides,
        } => ifn_export::commands::sync::run(
            profiles,
            *restart,
            start_from.as_deref(),
            input.as_deref(),
            overrides,
        ),
        Commands::Schema {
            profile,
            versions,
            input,
            output,
            force,
        } => ifn_export::commands::schema::run(
            profile,
            versions.as_deref(),
            input.clone(),
            output.clone(),
            *force,
        ),
        Commands::Build {
            profile,
            only_show,
            dry_run,
            overrides,
        } => ifn_export::commands::build::run(profile, *only_show, *dry_run, overrides),
        Commands::Describe { db } => ifn_export::commands::describe::run(db),
        Commands::RenameTest { file, separator } => {
            ifn_export::commands::rename::run(file, separator, cli.verbose)
        },
    }
}
