//! Analytics table writers
//!
//! The analytics table is created from the columns of the first batch and
//! only grows afterwards: columns missing from the table are added before
//! each insert, existing columns are never altered or dropped.

use super::{quote_ident, register_survey_table, table_exists, StoreError, TableKind};
use crate::batch::Batch;
use crate::debug::{DebugFlag, Debugger};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Global identity index table
pub const USER_TABLE: &str = "survey_surveyuser";

/// Conflict handling on the `id` primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertMode {
    #[default]
    Ignore,
    Replace,
}

impl InsertMode {
    fn sql(&self) -> &'static str {
        match self {
            InsertMode::Ignore => "INSERT OR IGNORE",
            InsertMode::Replace => "INSERT OR REPLACE",
        }
    }
}

impl FromStr for InsertMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ignore" => Ok(InsertMode::Ignore),
            "replace" => Ok(InsertMode::Replace),
            other => Err(StoreError::InsertMode(other.to_string())),
        }
    }
}

impl fmt::Display for InsertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertMode::Ignore => write!(f, "ignore"),
            InsertMode::Replace => write!(f, "replace"),
        }
    }
}

/// Destination of processed batches
pub trait TableWriter {
    /// Register the target table of a survey
    fn register_survey(&mut self, survey: &str) -> Result<(), StoreError>;

    /// Append a batch, returns the number of rows written
    fn append(&mut self, batch: &Batch, trace: &Debugger) -> Result<usize, StoreError>;
}

/// Writer appending to an SQLite table
pub struct SqliteWriter {
    conn: Connection,
    table: String,
    insert_mode: InsertMode,
}

impl SqliteWriter {
    pub fn open(
        path: impl AsRef<Path>,
        table: impl Into<String>,
        insert_mode: InsertMode,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::new(conn, table, insert_mode)
    }

    pub fn new(
        conn: Connection,
        table: impl Into<String>,
        insert_mode: InsertMode,
    ) -> Result<Self, StoreError> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, global_id TEXT NOT NULL UNIQUE)",
                USER_TABLE
            ),
            [],
        )?;
        Ok(Self {
            conn,
            table: table.into(),
            insert_mode,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Column names of the target table, in table order
    pub fn table_columns(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(&self.table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn create_table(&self, batch: &Batch, trace: &Debugger) -> Result<(), StoreError> {
        let definitions: Vec<String> = batch
            .columns()
            .iter()
            .map(|c| {
                let sql_type = batch.sql_type(&c.name).unwrap_or("TEXT");
                if c.name == "id" {
                    format!("{} {} PRIMARY KEY", quote_ident(&c.name), sql_type)
                } else {
                    format!("{} {}", quote_ident(&c.name), sql_type)
                }
            })
            .collect();
        let table = quote_ident(&self.table);
        let sql = format!("CREATE TABLE {} ({})", table, definitions.join(", "));
        trace.trace(DebugFlag::Query, || sql.clone());
        self.conn.execute(&sql, [])?;

        for column in ["timestamp", "global_id"] {
            if batch.has_column(column) {
                self.conn.execute(
                    &format!(
                        "CREATE INDEX {} ON {} ({})",
                        quote_ident(&format!("{}_{}_idx", self.table, column)),
                        table,
                        quote_ident(column)
                    ),
                    [],
                )?;
            }
        }
        info!(table = %self.table, columns = batch.columns().len(), "Analytics table created");
        Ok(())
    }

    /// Add batch columns missing from the table
    fn update_schema(&self, batch: &Batch, trace: &Debugger) -> Result<usize, StoreError> {
        // SQLite column names are case-insensitive
        let existing: HashSet<String> = self
            .table_columns()?
            .into_iter()
            .map(|c| c.to_lowercase())
            .collect();
        let mut added = 0;
        for column in batch.columns() {
            if existing.contains(&column.name.to_lowercase()) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(&self.table),
                quote_ident(&column.name),
                batch.sql_type(&column.name).unwrap_or("TEXT")
            );
            trace.trace(DebugFlag::Query, || sql.clone());
            self.conn.execute(&sql, [])?;
            added += 1;
        }
        if added > 0 {
            info!(table = %self.table, added, "Analytics table columns added");
        }
        Ok(added)
    }

    fn insert(&mut self, batch: &Batch, trace: &Debugger) -> Result<usize, StoreError> {
        let names: Vec<String> = batch.columns().iter().map(|c| quote_ident(&c.name)).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "{} INTO {} ({}) VALUES ({})",
            self.insert_mode.sql(),
            quote_ident(&self.table),
            names.join(", "),
            placeholders
        );
        trace.trace(DebugFlag::Query, || sql.clone());

        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for idx in 0..batch.len() {
                written += stmt.execute(params_from_iter(batch.row(idx)))?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Insert the global ids of the batch not yet indexed
    fn update_index(&mut self, batch: &Batch) -> Result<usize, StoreError> {
        let Some(column) = batch.column("global_id") else {
            return Ok(0);
        };
        let ids: BTreeSet<String> = column
            .values
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .collect();

        let tx = self.conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt =
                tx.prepare(&format!("INSERT OR IGNORE INTO {} (global_id) VALUES (?1)", USER_TABLE))?;
            for id in &ids {
                added += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(added)
    }
}

impl TableWriter for SqliteWriter {
    fn register_survey(&mut self, survey: &str) -> Result<(), StoreError> {
        register_survey_table(&self.conn, survey, &self.table, TableKind::Analytics)
    }

    fn append(&mut self, batch: &Batch, trace: &Debugger) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        if table_exists(&self.conn, &self.table)? {
            self.update_schema(batch, trace)?;
        } else {
            self.create_table(batch, trace)?;
        }
        let written = self.insert(batch, trace)?;
        let users = self.update_index(batch)?;
        debug!(table = %self.table, rows = batch.len(), written, users, "Batch appended");
        Ok(written)
    }
}

/// Writer that only counts rows, for dry runs
#[derive(Debug, Default)]
pub struct DryRunWriter {
    pub rows: usize,
    pub columns: BTreeSet<String>,
}

impl TableWriter for DryRunWriter {
    fn register_survey(&mut self, survey: &str) -> Result<(), StoreError> {
        info!(survey, "Dry run, nothing will be written");
        Ok(())
    }

    fn append(&mut self, batch: &Batch, _trace: &Debugger) -> Result<usize, StoreError> {
        self.rows += batch.len();
        self.columns
            .extend(batch.column_names().into_iter().map(String::from));
        Ok(batch.len())
    }
}
