//! `ifn-export describe` command implementation
//!
//! Shows row counts and time ranges of the tables of a database.

use crate::describe::{describe_database, format_as_table};
use crate::error::Result;
use colored::Colorize;
use std::path::Path;

pub fn run(db: &Path) -> Result<()> {
    let tables = describe_database(db)?;
    if tables.is_empty() {
        println!("No tables in {}", db.display());
        return Ok(());
    }

    println!("{} {}", "Database:".cyan().bold(), db.display());
    print!("{}", format_as_table(&tables));
    Ok(())
}
