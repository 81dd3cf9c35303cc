//! Incremental synchronization of survey responses into the raw store

use crate::catalog::{CatalogEntry, ExportCatalog};
use crate::error::{ExportError, Result, ResultExt};
use crate::source::{PageQuery, RecordSource, SurveyInfoSource};
use crate::store::{ExportMeta, RawStore};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Identity and paging of one survey export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    pub study_key: String,
    pub survey_key: String,
    pub key_separator: String,
    pub page_size: usize,
}

/// Counts of one exported window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowExport {
    pub pages: usize,
    pub fetched: usize,
    pub inserted: usize,
}

/// Summary of an `export_all` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub survey: String,
    #[serde(with = "ifn_common::time::iso_format_opt")]
    pub resumed_at: Option<DateTime<Utc>>,
    /// Windows with at least one page
    pub windows: usize,
    pub empty_windows: usize,
    pub fetched: usize,
    pub inserted: usize,
}

/// Exporter from a [`RecordSource`] into a [`RawStore`], tracking progress
/// in an [`ExportCatalog`]
pub struct DbExporter<'a, S: ?Sized> {
    store: &'a mut RawStore,
    source: &'a mut S,
    catalog: &'a mut ExportCatalog,
    settings: ExportSettings,
    table: String,
    meta: ExportMeta,
}

impl<'a, S: RecordSource + ?Sized> DbExporter<'a, S> {
    /// Prepare the raw store for the survey.
    ///
    /// The key separator is recorded at the first sync; later syncs must use
    /// the same one.
    pub fn new(
        store: &'a mut RawStore,
        source: &'a mut S,
        catalog: &'a mut ExportCatalog,
        settings: ExportSettings,
    ) -> Result<Self> {
        let meta = store.setup_meta(&settings.key_separator)?;
        if meta.key_separator != settings.key_separator {
            return Err(ExportError::SeparatorMismatch {
                stored: meta.key_separator,
                configured: settings.key_separator,
            });
        }
        let table = store.ensure_response_table(&settings.survey_key)?;
        Ok(Self {
            store,
            source,
            catalog,
            settings,
            table,
            meta,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn catalog(&self) -> &ExportCatalog {
        self.catalog
    }

    /// Export the window `[start, end)`.
    ///
    /// Returns `None` when the source has no page for the window.
    pub fn export(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Option<WindowExport>> {
        let mut query = PageQuery {
            study_key: self.settings.study_key.clone(),
            survey_key: self.settings.survey_key.clone(),
            start,
            end,
            page_size: self.settings.page_size,
            page_token: None,
        };
        let mut window = WindowExport::default();

        loop {
            let Some(page) = self.source.fetch_page(&query)? else {
                break;
            };
            window.pages += 1;
            window.fetched += page.records.len();
            window.inserted += self
                .store
                .insert_records(&self.table, &page.records, self.meta.use_jsonb)?;
            debug!(
                survey = %self.settings.survey_key,
                page = window.pages,
                records = page.records.len(),
                "Page stored"
            );
            match page.next_page_token {
                Some(token) => query.page_token = Some(token),
                None => break,
            }
        }

        if window.pages == 0 {
            return Ok(None);
        }
        if window.inserted > 0 {
            self.store
                .register_import(&self.settings.survey_key, start, end)?;
        }
        Ok(Some(window))
    }

    /// Export every window from the resume point up to `min(now, max_time)`
    pub fn export_all(&mut self, force_start: Option<DateTime<Utc>>) -> Result<SyncReport> {
        self.export_until(force_start, Utc::now())
    }

    /// [`Self::export_all`] with an explicit current time
    pub fn export_until(
        &mut self,
        force_start: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let max_time = self.catalog.max_time();
        let limit = now.min(max_time);
        let period = Duration::days(i64::from(self.catalog.period()));
        let mut start = force_start.unwrap_or_else(|| self.catalog.resume_point());

        let mut report = SyncReport {
            survey: self.settings.survey_key.clone(),
            resumed_at: Some(start),
            ..Default::default()
        };
        info!(survey = %self.settings.survey_key, start = %start, limit = %limit, "Starting sync");

        while start < limit {
            let end = (start + period).min(max_time);
            let window = self
                .export(start, end)
                .context(|| format!("Survey '{}', window {} - {}", self.settings.survey_key, start, end))?;

            match window {
                None => {
                    debug!(survey = %self.settings.survey_key, window_start = %start, window_end = %end, "No data");
                    report.empty_windows += 1;
                },
                Some(window) => {
                    report.windows += 1;
                    report.fetched += window.fetched;
                    report.inserted += window.inserted;
                    info!(
                        survey = %self.settings.survey_key,
                        window_start = %start,
                        window_end = %end,
                        fetched = window.fetched,
                        inserted = window.inserted,
                        "Window synchronized"
                    );
                    if window.inserted == 0 && self.catalog.contains_window(start, end) {
                        debug!(window_start = %start, "Window already cataloged");
                    } else {
                        self.catalog.append(CatalogEntry {
                            start,
                            end,
                            batch_ref: format!("{}@{}-{}", self.table, start.timestamp(), end.timestamp()),
                            updated: Some(Utc::now()),
                        })?;
                        self.catalog.save()?;
                    }
                },
            }
            start = end;
        }

        Ok(report)
    }
}

impl<S: RecordSource + SurveyInfoSource + ?Sized> DbExporter<'_, S> {
    /// Store the survey definitions of every version.
    ///
    /// With `replace` false, versions already stored are kept. Returns the
    /// number of stored versions.
    pub fn export_info(&mut self, lang: &str, replace: bool) -> Result<usize> {
        let versions = self.source.survey_versions(
            &self.settings.study_key,
            &self.settings.survey_key,
            lang,
        )?;
        let mut stored = 0;
        for document in &versions {
            let Some(version) = document.get("versionId").and_then(|v| v.as_str()) else {
                warn!(survey = %self.settings.survey_key, "Survey definition without versionId, skipped");
                continue;
            };
            stored += self
                .store
                .store_survey_info(&self.settings.survey_key, version, document, replace)?;
        }
        info!(
            survey = %self.settings.survey_key,
            versions = versions.len(),
            stored,
            "Survey definitions synchronized"
        );
        Ok(stored)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;
    use ifn_common::time::from_iso_time;
    use serde_json::json;
    use tempfile::TempDir;

    fn t(s: &str) -> DateTime<Utc> {
        from_iso_time(s).unwrap()
    }

    fn response(id: &str, submitted: &str, version: &str) -> serde_json::Value {
        json!({"ID": id, "submitted": t(submitted).timestamp(), "version": version, "Q1": "1"})
    }

    fn settings() -> ExportSettings {
        ExportSettings {
            study_key: "ifn".into(),
            survey_key: "weekly".into(),
            key_separator: "|".into(),
            page_size: 2,
        }
    }

    fn source() -> MemorySource {
        MemorySource::from_documents(vec![
            response("a", "2024-01-01T10:00:00", "1-0"),
            response("b", "2024-01-03T10:00:00", "1-0"),
            response("c", "2024-01-05T10:00:00", "1-1"),
            response("d", "2024-01-09T10:00:00", "1-1"),
        ])
        .unwrap()
    }

    fn catalog(dir: &TempDir) -> ExportCatalog {
        ExportCatalog::open(
            dir.path().join("weekly.catalog.json"),
            t("2024-01-01T00:00:00"),
            t("2024-01-15T00:00:00"),
            7,
        )
        .unwrap()
    }

    fn count(store: &RawStore) -> i64 {
        store
            .connection()
            .query_row("SELECT count(*) FROM responses_weekly", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_export_window_pages() {
        let dir = TempDir::new().unwrap();
        let mut store = RawStore::open_in_memory().unwrap();
        let mut source = source();
        let mut catalog = catalog(&dir);
        let mut exporter = DbExporter::new(&mut store, &mut source, &mut catalog, settings()).unwrap();

        let window = exporter
            .export(t("2024-01-01T00:00:00"), t("2024-01-08T00:00:00"))
            .unwrap()
            .unwrap();
        assert_eq!(window, WindowExport { pages: 2, fetched: 3, inserted: 3 });

        let empty = exporter
            .export(t("2024-02-01T00:00:00"), t("2024-02-08T00:00:00"))
            .unwrap();
        assert!(empty.is_none());
        assert_eq!(store.import_count("weekly").unwrap(), 1);
    }

    #[test]
    fn test_export_all_two_windows() {
        let dir = TempDir::new().unwrap();
        let mut store = RawStore::open_in_memory().unwrap();
        let mut source = source();
        let mut catalog = catalog(&dir);
        let now = t("2024-03-01T00:00:00");

        let report = DbExporter::new(&mut store, &mut source, &mut catalog, settings())
            .unwrap()
            .export_until(None, now)
            .unwrap();
        assert_eq!(report.windows, 2);
        assert_eq!(report.inserted, 4);
        assert_eq!(count(&store), 4);

        let entries: Vec<_> = catalog.entries().map(|e| (e.start, e.end)).collect();
        assert_eq!(
            entries,
            vec![
                (t("2024-01-01T00:00:00"), t("2024-01-08T00:00:00")),
                (t("2024-01-08T00:00:00"), t("2024-01-15T00:00:00")),
            ]
        );
        assert_eq!(
            catalog.entries().next().unwrap().batch_ref,
            "responses_weekly@1704067200-1704672000"
        );

        // Persisted after each window
        let reloaded = ExportCatalog::open(
            dir.path().join("weekly.catalog.json"),
            t("2024-01-01T00:00:00"),
            t("2024-01-15T00:00:00"),
            7,
        )
        .unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_export_all_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = RawStore::open_in_memory().unwrap();
        let mut source = source();
        let mut catalog = catalog(&dir);
        let now = t("2024-03-01T00:00:00");

        DbExporter::new(&mut store, &mut source, &mut catalog, settings())
            .unwrap()
            .export_until(None, now)
            .unwrap();
        let before: Vec<CatalogEntry> = catalog.entries().cloned().collect();

        let report = DbExporter::new(&mut store, &mut source, &mut catalog, settings())
            .unwrap()
            .export_until(None, now)
            .unwrap();
        assert_eq!(report.resumed_at, Some(t("2024-01-08T00:00:00")));
        assert_eq!(report.inserted, 0);
        assert_eq!(count(&store), 4);
        assert_eq!(catalog.entries().cloned().collect::<Vec<_>>(), before);
    }

    #[test]
    fn test_resume_picks_up_new_records() {
        let dir = TempDir::new().unwrap();
        let mut store = RawStore::open_in_memory().unwrap();
        let mut source = source();
        let mut catalog = catalog(&dir);

        DbExporter::new(&mut store, &mut source, &mut catalog, settings())
            .unwrap()
            .export_until(None, t("2024-01-10T00:00:00"))
            .unwrap();
        assert_eq!(count(&store), 4);

        source.push(crate::source::RawRecord::from_document(response("e", "2024-01-12T08:00:00", "1-1")).unwrap());
        let report = DbExporter::new(&mut store, &mut source, &mut catalog, settings())
            .unwrap()
            .export_until(None, t("2024-03-01T00:00:00"))
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(count(&store), 5);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_separator_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut store = RawStore::open_in_memory().unwrap();
        let mut source = source();
        let mut catalog = catalog(&dir);
        DbExporter::new(&mut store, &mut source, &mut catalog, settings()).unwrap();

        let mut other = settings();
        other.key_separator = ".".into();
        let err = DbExporter::new(&mut store, &mut source, &mut catalog, other)
            .err()
            .unwrap();
        assert!(matches!(err, ExportError::SeparatorMismatch { .. }));
    }

    #[test]
    fn test_export_info() {
        let dir = TempDir::new().unwrap();
        let mut store = RawStore::open_in_memory().unwrap();
        let mut source = source().with_survey_versions(vec![
            json!({"versionId": "1-0", "questions": []}),
            json!({"versionId": "1-1", "questions": []}),
            json!({"questions": []}),
        ]);
        let mut catalog = catalog(&dir);
        let mut exporter = DbExporter::new(&mut store, &mut source, &mut catalog, settings()).unwrap();

        assert_eq!(exporter.export_info("en", false).unwrap(), 2);
        assert_eq!(exporter.export_info("en", false).unwrap(), 0);
        assert_eq!(exporter.export_info("en", true).unwrap(), 2);
        assert_eq!(store.survey_versions("weekly").unwrap(), vec!["1-0", "1-1"]);
    }
}
