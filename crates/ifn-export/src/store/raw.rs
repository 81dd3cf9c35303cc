//! Raw response store
//!
//! One SQLite database holding, per survey, an append-only
//! `responses_<survey>` table keyed by response id, plus:
//!
//! - `export_meta`: key separator fixed at the first sync, jsonb support
//! - `import_log`: one row per synchronized window that inserted data
//! - `survey_info`: survey definitions per version
//! - `survey_response_table`: registry of survey tables

use super::{quote_ident, register_survey_table, table_exists, StoreError, TableKind};
use crate::schema::SurveyDefinition;
use crate::source::RawRecord;
use crate::version::SurveyVersion;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value as JsonValue;
use std::cmp::Reverse;
use std::path::Path;
use tracing::{debug, warn};

/// Provider of survey definitions per version
pub trait SurveyDefinitionProvider {
    fn survey_definitions(
        &self,
        survey_key: &str,
    ) -> Result<Vec<(SurveyVersion, SurveyDefinition)>, StoreError>;
}

/// Metadata fixed at the first sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportMeta {
    pub key_separator: String,
    pub use_jsonb: bool,
}

/// Row counts and submission range of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub table: String,
    pub rows: i64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

/// Name of the raw table of a survey
pub fn response_table(survey_key: &str) -> String {
    format!("responses_{}", survey_key)
}

/// Recode top-level `"TRUE"`/`"FALSE"` strings to JSON booleans
pub fn normalize_payload(payload: &mut JsonValue) {
    if let Some(object) = payload.as_object_mut() {
        for value in object.values_mut() {
            match value.as_str() {
                Some("TRUE") => *value = JsonValue::Bool(true),
                Some("FALSE") => *value = JsonValue::Bool(false),
                _ => {},
            }
        }
    }
}

/// Sort version tags by version order, unparsable tags last
fn sort_versions(versions: &mut [String]) {
    versions.sort_by_cached_key(|v| {
        let parsed = v.parse::<SurveyVersion>().ok();
        (Reverse(parsed.is_some()), parsed, v.clone())
    });
}

/// Raw response database
pub struct RawStore {
    conn: Connection,
    name: String,
}

impl RawStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "Unable to create store directory");
            }
        }
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::init(conn, path.display().to_string())
    }

    /// Open an existing store for reading. Nothing is created, a missing
    /// file is an error.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(|source| {
            StoreError::Open {
                path: path.display().to_string(),
                source,
            }
        })?;
        Ok(Self {
            conn,
            name: path.display().to_string(),
        })
    }

    /// In-memory store (tests, dry runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, ":memory:".to_string())
    }

    fn init(conn: Connection, name: String) -> Result<Self, StoreError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS import_log (
                "time" INTEGER NOT NULL,
                "survey_key" TEXT NOT NULL,
                "start" INTEGER NOT NULL,
                "end" INTEGER NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS export_meta (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                key_separator TEXT NOT NULL,
                use_jsonb INTEGER NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS survey_info (
                survey TEXT NOT NULL,
                version TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (survey, version)
            )
            "#,
            [],
        )?;
        Ok(Self { conn, name })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the bundled SQLite has the `jsonb` function
    pub fn supports_jsonb(&self) -> Result<bool, StoreError> {
        // older SQLite builds fail with "no such function"
        let probe = self
            .conn
            .query_row("SELECT jsonb('{}') IS NOT NULL", [], |row| row.get::<_, bool>(0));
        Ok(probe.unwrap_or(false))
    }

    pub fn meta(&self) -> Result<Option<ExportMeta>, StoreError> {
        if !table_exists(&self.conn, "export_meta")? {
            return Ok(None);
        }
        let meta = self
            .conn
            .query_row(
                "SELECT key_separator, use_jsonb FROM export_meta WHERE id = 0",
                [],
                |row| {
                    Ok(ExportMeta {
                        key_separator: row.get(0)?,
                        use_jsonb: row.get::<_, i64>(1)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    /// Metadata, failing when the store was never synchronized
    pub fn require_meta(&self) -> Result<ExportMeta, StoreError> {
        self.meta()?
            .ok_or_else(|| StoreError::MetaMissing(self.name.clone()))
    }

    /// Record the metadata at the first sync, or return the stored one
    pub fn setup_meta(&self, key_separator: &str) -> Result<ExportMeta, StoreError> {
        if let Some(meta) = self.meta()? {
            return Ok(meta);
        }
        let use_jsonb = self.supports_jsonb()?;
        self.conn.execute(
            "INSERT INTO export_meta (id, key_separator, use_jsonb) VALUES (0, ?1, ?2)",
            params![key_separator, use_jsonb as i64],
        )?;
        debug!(key_separator, use_jsonb, "Export metadata initialized");
        Ok(ExportMeta {
            key_separator: key_separator.to_string(),
            use_jsonb,
        })
    }

    /// Create the raw table of a survey if needed, return its name
    pub fn ensure_response_table(&self, survey_key: &str) -> Result<String, StoreError> {
        let table = response_table(survey_key);
        if !table_exists(&self.conn, &table)? {
            let quoted = quote_ident(&table);
            self.conn.execute(
                &format!(
                    "CREATE TABLE {} (id TEXT NOT NULL PRIMARY KEY, submitted INTEGER NOT NULL, version TEXT, data BLOB)",
                    quoted
                ),
                [],
            )?;
            self.conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}(submitted)",
                    quote_ident(&format!("{}_submitted", table)),
                    quoted
                ),
                [],
            )?;
            register_survey_table(&self.conn, survey_key, &table, TableKind::Raw)?;
            debug!(table = %table, "Raw response table created");
        }
        Ok(table)
    }

    /// Insert records, ignoring ids already present. Returns the number of
    /// rows actually inserted.
    pub fn insert_records(
        &mut self,
        table: &str,
        records: &[RawRecord],
        use_jsonb: bool,
    ) -> Result<usize, StoreError> {
        let json_expr = if use_jsonb { "jsonb(?4)" } else { "?4" };
        let sql = format!(
            "INSERT OR IGNORE INTO {} (id, submitted, version, data) VALUES (?1, ?2, ?3, {})",
            quote_ident(table),
            json_expr
        );

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                let mut payload = record.payload.clone();
                normalize_payload(&mut payload);
                inserted += stmt.execute(params![
                    record.id,
                    record.submitted.timestamp(),
                    record.version,
                    serde_json::to_string(&payload)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Log a synchronized window
    pub fn register_import(
        &self,
        survey_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            r#"INSERT INTO import_log ("time", "survey_key", "start", "end") VALUES (?1, ?2, ?3, ?4)"#,
            params![
                Utc::now().timestamp(),
                survey_key,
                start.timestamp(),
                end.timestamp()
            ],
        )?;
        Ok(())
    }

    /// Number of logged imports for a survey
    pub fn import_count(&self, survey_key: &str) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT count(*) FROM import_log WHERE survey_key = ?1",
            [survey_key],
            |row| row.get(0),
        )?)
    }

    /// Store a survey definition version
    pub fn store_survey_info(
        &self,
        survey_key: &str,
        version: &str,
        data: &JsonValue,
        replace: bool,
    ) -> Result<usize, StoreError> {
        let action = if replace { "REPLACE" } else { "IGNORE" };
        let changed = self.conn.execute(
            &format!(
                "INSERT OR {} INTO survey_info (survey, version, data) VALUES (?1, ?2, ?3)",
                action
            ),
            params![survey_key, version, serde_json::to_string(data)?],
        )?;
        Ok(changed)
    }

    /// Version tags with a stored definition
    pub fn survey_versions(&self, survey_key: &str) -> Result<Vec<String>, StoreError> {
        if !table_exists(&self.conn, "survey_info")? {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare("SELECT version FROM survey_info WHERE survey = ?1")?;
        let mut versions = stmt
            .query_map([survey_key], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        sort_versions(&mut versions);
        Ok(versions)
    }

    /// Distinct version tags present in a raw table
    pub fn response_versions(&self, table: &str) -> Result<Vec<String>, StoreError> {
        if !table_exists(&self.conn, table)? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT version FROM {} WHERE version IS NOT NULL",
            quote_ident(table)
        ))?;
        let mut versions = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        sort_versions(&mut versions);
        Ok(versions)
    }

    /// Row count and submission range of a raw table
    pub fn table_stats(&self, table: &str) -> Result<TableStats, StoreError> {
        let (rows, first, last): (i64, Option<i64>, Option<i64>) = self.conn.query_row(
            &format!(
                "SELECT count(*), min(submitted), max(submitted) FROM {}",
                quote_ident(table)
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let to_time = |t: Option<i64>| t.and_then(|t| ifn_common::time::from_epoch(t).ok());
        Ok(TableStats {
            table: table.to_string(),
            rows,
            first: to_time(first),
            last: to_time(last),
        })
    }
}

impl SurveyDefinitionProvider for RawStore {
    fn survey_definitions(
        &self,
        survey_key: &str,
    ) -> Result<Vec<(SurveyVersion, SurveyDefinition)>, StoreError> {
        if !table_exists(&self.conn, "survey_info")? {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare("SELECT version, data FROM survey_info WHERE survey = ?1")?;
        let rows = stmt
            .query_map([survey_key], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(version, data)| -> Result<(SurveyVersion, SurveyDefinition), StoreError> {
                let invalid = |reason: String| StoreError::InvalidDefinition {
                    version: version.clone(),
                    reason,
                };
                let parsed: SurveyVersion = version.parse().map_err(|e| invalid(format!("{}", e)))?;
                let definition: SurveyDefinition =
                    serde_json::from_str(&data).map_err(|e| invalid(e.to_string()))?;
                Ok((parsed, definition))
            })
            .collect()
    }
}
