//! Raw store loading for analytics builds

use crate::debug::{DebugFlag, Debugger};
use crate::store::{quote_ident, RawStore, StoreError};
use crate::version::VersionSelector;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::params_from_iter;
use serde_json::Value as JsonValue;
use tracing::warn;

/// Records of one `load` call grouped by version, in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedRecords {
    /// Rows read, including the ones whose payload could not be parsed
    pub fetched: usize,
    pub groups: Vec<(String, Vec<JsonValue>)>,
}

impl LoadedRecords {
    pub fn push(&mut self, version: String, payload: JsonValue) {
        match self.groups.iter_mut().find(|(v, _)| *v == version) {
            Some((_, rows)) => rows.push(payload),
            None => self.groups.push((version, vec![payload])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Paged access to raw records
pub trait RecordLoader {
    /// Rows matched by the loader criteria
    fn total_rows(&self) -> Result<usize, StoreError>;

    /// Load `limit` rows starting at `offset`
    fn load(&mut self, limit: usize, offset: usize) -> Result<LoadedRecords, StoreError>;
}

/// Criteria on the raw table
#[derive(Debug, Clone)]
pub struct SourceQuery {
    pub table: String,
    pub from_time: Option<DateTime<Utc>>,
    pub to_time: Option<DateTime<Utc>>,
    /// Versions to load, `None` for all
    pub versions: Option<Vec<String>>,
}

impl SourceQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            from_time: None,
            to_time: None,
            versions: None,
        }
    }

    /// Restrict to the versions of the table accepted by `selector`.
    /// Version tags that do not parse are never selected.
    pub fn resolve_versions(
        mut self,
        store: &RawStore,
        selector: &VersionSelector,
    ) -> Result<Self, StoreError> {
        let versions = store
            .response_versions(&self.table)?
            .into_iter()
            .filter(|v| selector.is_version_str(v))
            .collect();
        self.versions = Some(versions);
        Ok(self)
    }

    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if let Some(from) = self.from_time {
            conditions.push("submitted >= ?".to_string());
            params.push(SqlValue::Integer(from.timestamp()));
        }
        if let Some(to) = self.to_time {
            conditions.push("submitted <= ?".to_string());
            params.push(SqlValue::Integer(to.timestamp()));
        }
        if let Some(versions) = &self.versions {
            if versions.is_empty() {
                conditions.push("0".to_string());
            } else {
                conditions.push(format!("version IN ({})", vec!["?"; versions.len()].join(", ")));
                params.extend(versions.iter().cloned().map(SqlValue::Text));
            }
        }
        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }

    /// Data query, with its parameters
    pub fn data_query(&self, limit: usize, offset: usize) -> (String, Vec<SqlValue>) {
        let (where_clause, mut params) = self.where_clause();
        params.push(SqlValue::Integer(limit as i64));
        params.push(SqlValue::Integer(offset as i64));
        (
            format!(
                "SELECT json(data), version, id FROM {}{} ORDER BY version, submitted, id LIMIT ? OFFSET ?",
                quote_ident(&self.table),
                where_clause
            ),
            params,
        )
    }

    pub fn count_query(&self) -> (String, Vec<SqlValue>) {
        let (where_clause, params) = self.where_clause();
        (
            format!("SELECT count(*) FROM {}{}", quote_ident(&self.table), where_clause),
            params,
        )
    }
}

/// Loader reading the raw table of a [`RawStore`]
pub struct RawStoreLoader<'a> {
    store: &'a RawStore,
    query: SourceQuery,
    trace: Debugger,
}

impl<'a> RawStoreLoader<'a> {
    pub fn new(store: &'a RawStore, query: SourceQuery, trace: Debugger) -> Self {
        Self {
            store,
            query,
            trace,
        }
    }
}

impl RecordLoader for RawStoreLoader<'_> {
    fn total_rows(&self) -> Result<usize, StoreError> {
        let (sql, params) = self.query.count_query();
        let count: i64 = self
            .store
            .connection()
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    fn load(&mut self, limit: usize, offset: usize) -> Result<LoadedRecords, StoreError> {
        let (sql, params) = self.query.data_query(limit, offset);
        self.trace
            .trace(DebugFlag::QuerySource, || format!("{} -- {:?}", sql, params));

        let mut stmt = self.store.connection().prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut loaded = LoadedRecords::default();

        while let Some(row) = rows.next()? {
            loaded.fetched += 1;
            let data: Option<String> = row.get(0)?;
            let version: Option<String> = row.get(1)?;
            let id: String = row.get(2)?;

            match data.as_deref().map(serde_json::from_str::<JsonValue>) {
                Some(Ok(payload)) => {
                    self.trace.trace(DebugFlag::Json, || {
                        format!("row {} (offset {}): {}", id, offset + loaded.fetched - 1, payload)
                    });
                    loaded.push(version.unwrap_or_default(), payload);
                },
                Some(Err(e)) => warn!(id = %id, error = %e, "Unable to parse raw payload, row skipped"),
                None => warn!(id = %id, "Empty raw payload, row skipped"),
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::source::RawRecord;
    use serde_json::json;

    fn store() -> RawStore {
        let mut store = RawStore::open_in_memory().unwrap();
        let meta = store.setup_meta("|").unwrap();
        let table = store.ensure_response_table("weekly").unwrap();
        let records: Vec<RawRecord> = [("a", 10, "2-0"), ("b", 20, "1-0"), ("c", 30, "2-0"), ("d", 40, "1-1")]
            .iter()
            .map(|(id, ts, v)| RawRecord {
                id: id.to_string(),
                submitted: ifn_common::time::from_epoch(*ts).unwrap(),
                version: v.to_string(),
                payload: json!({"ID": id, "version": v}),
            })
            .collect();
        store.insert_records(&table, &records, meta.use_jsonb).unwrap();
        store
    }

    fn ids(loaded: &LoadedRecords) -> Vec<(String, Vec<String>)> {
        loaded
            .groups
            .iter()
            .map(|(v, rows)| {
                (
                    v.clone(),
                    rows.iter().map(|r| r["ID"].as_str().unwrap().to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_load_orders_by_version_and_pages() {
        let store = store();
        let mut loader =
            RawStoreLoader::new(&store, SourceQuery::new("responses_weekly"), Debugger::default());
        assert_eq!(loader.total_rows().unwrap(), 4);

        let first = loader.load(3, 0).unwrap();
        assert_eq!(first.fetched, 3);
        assert_eq!(
            ids(&first),
            vec![
                ("1-0".to_string(), vec!["b".to_string()]),
                ("1-1".to_string(), vec!["d".to_string()]),
                ("2-0".to_string(), vec!["a".to_string()]),
            ]
        );
        let rest = loader.load(3, 3).unwrap();
        assert_eq!(ids(&rest), vec![("2-0".to_string(), vec!["c".to_string()])]);
        assert!(loader.load(3, 6).unwrap().is_empty());
    }

    #[test]
    fn test_time_bounds_and_versions() {
        let store = store();
        let selector: VersionSelector = "1-0:1-9".parse().unwrap();
        let mut query = SourceQuery::new("responses_weekly")
            .resolve_versions(&store, &selector)
            .unwrap();
        query.from_time = Some(ifn_common::time::from_epoch(15).unwrap());
        query.to_time = Some(ifn_common::time::from_epoch(35).unwrap());
        let mut loader = RawStoreLoader::new(&store, query, Debugger::default());

        assert_eq!(loader.total_rows().unwrap(), 1);
        assert_eq!(ids(&loader.load(10, 0).unwrap()), vec![("1-0".to_string(), vec!["b".to_string()])]);
    }

    #[test]
    fn test_no_matching_version_loads_nothing() {
        let store = store();
        let selector: VersionSelector = "9-0".parse().unwrap();
        let query = SourceQuery::new("responses_weekly")
            .resolve_versions(&store, &selector)
            .unwrap();
        let (sql, _) = query.count_query();
        assert!(sql.ends_with(" WHERE 0"));
        let loader = RawStoreLoader::new(&store, query, Debugger::default());
        assert_eq!(loader.total_rows().unwrap(), 0);
    }
}
