//! Table overview of a raw or analytics database

use crate::store::{quote_ident, StoreError};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::path::Path;

/// Row count and time range of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescription {
    pub table: String,
    pub rows: i64,
    pub first: Option<String>,
    pub last: Option<String>,
}

/// Time column of the tables this tool writes
fn time_column(table: &str) -> Option<&'static str> {
    if table.starts_with("responses_") {
        Some("submitted")
    } else if table.starts_with("pollster_results_") {
        Some("timestamp")
    } else {
        None
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn format_time(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Integer(t) => ifn_common::time::from_epoch(t)
            .ok()
            .map(|t| ifn_common::time::to_iso_time(&t)),
        SqlValue::Text(s) => Some(s),
        SqlValue::Real(x) => Some(x.to_string()),
        SqlValue::Null | SqlValue::Blob(_) => None,
    }
}

/// Describe every table of the database at `path`
pub fn describe_database(path: &Path) -> Result<Vec<TableDescription>, StoreError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(|source| {
        StoreError::Open {
            path: path.display().to_string(),
            source,
        }
    })?;
    describe_connection(&conn)
}

pub fn describe_connection(conn: &Connection) -> Result<Vec<TableDescription>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(tables.len());
    for table in tables {
        let quoted = quote_ident(&table);
        let time = match time_column(&table) {
            Some(column) if has_column(conn, &table, column)? => Some(column),
            _ => None,
        };
        let description = match time {
            Some(column) => {
                let (rows, first, last): (i64, SqlValue, SqlValue) = conn.query_row(
                    &format!(
                        "SELECT count(*), min({col}), max({col}) FROM {}",
                        quoted,
                        col = quote_ident(column)
                    ),
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;
                TableDescription {
                    table,
                    rows,
                    first: format_time(first),
                    last: format_time(last),
                }
            },
            None => {
                let rows: i64 =
                    conn.query_row(&format!("SELECT count(*) FROM {}", quoted), [], |row| row.get(0))?;
                TableDescription {
                    table,
                    rows,
                    first: None,
                    last: None,
                }
            },
        };
        out.push(description);
    }
    Ok(out)
}

/// Render descriptions as a terminal table
pub fn format_as_table(descriptions: &[TableDescription]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Table", "Rows", "First", "Last"]);

    for d in descriptions {
        table.add_row(vec![
            d.table.clone(),
            d.rows.to_string(),
            d.first.clone().unwrap_or_default(),
            d.last.clone().unwrap_or_default(),
        ]);
    }
    format!("{}\n", table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_connection() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE responses_weekly (id TEXT PRIMARY KEY, submitted INTEGER, version TEXT, data BLOB);
            INSERT INTO responses_weekly VALUES ('a', 1704067200, '1-0', '{}'), ('b', 1704153600, '1-0', '{}');
            CREATE TABLE pollster_results_weekly (id TEXT PRIMARY KEY, "timestamp" TIMESTAMP);
            INSERT INTO pollster_results_weekly VALUES ('a', '2024-01-01T00:00:00');
            CREATE TABLE survey_info (survey TEXT, version TEXT, data TEXT);
            "#,
        )
        .unwrap();

        let described = describe_connection(&conn).unwrap();
        assert_eq!(described.len(), 3);
        assert_eq!(
            described[1],
            TableDescription {
                table: "responses_weekly".into(),
                rows: 2,
                first: Some("2024-01-01T00:00:00".into()),
                last: Some("2024-01-02T00:00:00".into()),
            }
        );
        assert_eq!(described[0].last.as_deref(), Some("2024-01-01T00:00:00"));
        assert_eq!(described[2].rows, 0);
        assert!(described[2].first.is_none());

        let rendered = format_as_table(&described);
        assert!(rendered.contains("responses_weekly"));
    }

    #[test]
    fn test_missing_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = describe_database(&dir.path().join("missing.db")).unwrap_err();
        assert!(matches!(err, StoreError::Open { .. }));
    }
}
