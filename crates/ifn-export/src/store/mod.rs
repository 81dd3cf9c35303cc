//! SQLite stores
//!
//! - [`raw::RawStore`]: append-only raw responses, survey definitions,
//!   export metadata and import log
//! - [`analytics::SqliteWriter`]: analytics tables built from the raw store

pub mod analytics;
pub mod raw;

pub use analytics::{DryRunWriter, SqliteWriter, TableWriter};
pub use raw::{ExportMeta, RawStore};

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unable to open database '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Export metadata is missing in '{0}'. Run 'ifn-export sync' first to initialize the raw store.")]
    MetaMissing(String),

    #[error("Invalid survey definition for version '{version}': {reason}")]
    InvalidDefinition { version: String, reason: String },

    #[error("Failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Insert mode '{0}' is not supported, expected 'ignore' or 'replace'")]
    InsertMode(String),
}

/// Quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Kind of table registered in `survey_response_table`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Raw,
    Analytics,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Raw => "raw",
            TableKind::Analytics => "analytics",
        }
    }
}

/// Register a survey table in the `survey_response_table` registry
pub fn register_survey_table(
    conn: &Connection,
    survey: &str,
    table: &str,
    kind: TableKind,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS survey_response_table (
            "survey" TEXT NOT NULL,
            "table" TEXT NOT NULL PRIMARY KEY,
            "type" TEXT NOT NULL
        )
        "#,
        [],
    )?;
    conn.execute(
        r#"INSERT OR IGNORE INTO survey_response_table ("survey", "table", "type") VALUES (?1, ?2, ?3)"#,
        [survey, table, kind.as_str()],
    )?;
    Ok(())
}

/// Registered tables as `(survey, table, type)`
pub fn registered_tables(conn: &Connection) -> Result<Vec<(String, String, String)>, StoreError> {
    if !table_exists(conn, "survey_response_table")? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        r#"SELECT "survey", "table", "type" FROM survey_response_table ORDER BY "survey", "table""#,
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("Q1|a"), "\"Q1|a\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_registry() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(registered_tables(&conn).unwrap().is_empty());
        register_survey_table(&conn, "weekly", "responses_weekly", TableKind::Raw).unwrap();
        register_survey_table(&conn, "weekly", "responses_weekly", TableKind::Raw).unwrap();
        assert!(table_exists(&conn, "survey_response_table").unwrap());
        assert_eq!(
            registered_tables(&conn).unwrap(),
            vec![("weekly".into(), "responses_weekly".into(), "raw".into())]
        );
    }
}
