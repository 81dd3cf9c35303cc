//! Analytics table builder
//!
//! Reads the raw store in fixed-size batches, groups each batch by survey
//! version, runs the processors applicable to the version and appends the
//! result to the analytics table.

pub mod loader;

pub use loader::{LoadedRecords, RawStoreLoader, RecordLoader, SourceQuery};

use crate::batch::Batch;
use crate::debug::{DebugFlag, Debugger};
use crate::error::{Result, ResultExt};
use crate::processor::Pipeline;
use crate::schema::SchemaProblem;
use crate::store::TableWriter;
use crate::version::SurveyVersion;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Counters of an import run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub survey: String,
    /// Rows matched by the loader when the run started
    pub total_rows: usize,
    pub fetched: usize,
    /// Loaded rows per version
    pub per_version: BTreeMap<String, usize>,
    /// Rows written per version
    pub appended: BTreeMap<String, usize>,
    /// Schema conflicts found while preparing the run
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<SchemaProblem>,
}

impl ImportReport {
    pub fn appended_total(&self) -> usize {
        self.appended.values().sum()
    }
}

/// Batch importer from a [`RecordLoader`] to a [`TableWriter`]
pub struct Importer {
    survey: String,
    pipeline: Pipeline,
    batch_size: usize,
    starting_offset: usize,
    trace: Debugger,
}

impl Importer {
    pub fn new(survey: impl Into<String>, pipeline: Pipeline) -> Self {
        Self {
            survey: survey.into(),
            pipeline,
            batch_size: 5000,
            starting_offset: 0,
            trace: Debugger::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_starting_offset(mut self, offset: usize) -> Self {
        self.starting_offset = offset;
        self
    }

    pub fn with_debugger(mut self, trace: Debugger) -> Self {
        self.trace = trace;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn run(
        &self,
        loader: &mut dyn RecordLoader,
        writer: &mut dyn TableWriter,
    ) -> Result<ImportReport> {
        let mut report = ImportReport {
            survey: self.survey.clone(),
            total_rows: loader.total_rows()?,
            ..Default::default()
        };
        writer.register_survey(&self.survey)?;

        info!(
            survey = %self.survey,
            total_rows = report.total_rows,
            batch_size = self.batch_size,
            offset = self.starting_offset,
            "Starting import"
        );

        let mut offset = self.starting_offset;
        loop {
            let loaded = loader
                .load(self.batch_size, offset)
                .context(|| format!("Loading batch at offset {}", offset))?;
            if loaded.fetched == 0 {
                break;
            }
            report.fetched += loaded.fetched;

            for (version, rows) in loaded.groups {
                let appended = self.import_group(&version, &rows, writer)?;
                *report.per_version.entry(version.clone()).or_default() += rows.len();
                *report.appended.entry(version).or_default() += appended;
            }

            offset += self.batch_size;
            if report.total_rows > 0 {
                info!(
                    survey = %self.survey,
                    offset,
                    progress = format!("{:.1}%", (report.fetched as f64 / report.total_rows as f64) * 100.0),
                    "Batch imported"
                );
            }
        }

        match serde_json::to_string(&report) {
            Ok(json) => info!(survey = %self.survey, report = %json, "Import finished"),
            Err(e) => debug!(error = %e, "Unable to serialize import report"),
        }
        Ok(report)
    }

    fn import_group(
        &self,
        version: &str,
        rows: &[serde_json::Value],
        writer: &mut dyn TableWriter,
    ) -> Result<usize> {
        let parsed: SurveyVersion = version
            .parse()
            .context(|| format!("Survey '{}', response version", self.survey))?;
        self.trace.trace(DebugFlag::Version, || {
            format!("version {} ({} rows), {} processor(s)", parsed, rows.len(), self.pipeline.select(&parsed).len())
        });

        let batch = Batch::from_records(rows);
        let batch = self
            .pipeline
            .apply(&parsed, batch, &self.trace)
            .context(|| format!("Survey '{}', version {}", self.survey, parsed))?;
        let appended = writer
            .append(&batch, &self.trace)
            .context(|| format!("Survey '{}', version {}", self.survey, parsed))?;
        debug!(survey = %self.survey, version = %parsed, rows = rows.len(), appended, "Version group appended");
        Ok(appended)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::processor::{ProcessorContext, ProcessorConfig};
    use crate::schema::{ColumnSchema, ValueKind};
    use crate::store::{DryRunWriter, StoreError};
    use serde_json::{json, Value as JsonValue};
    use std::sync::Arc;

    /// Loader serving fixed batches, recording requested offsets
    struct FixedLoader {
        rows: Vec<(String, JsonValue)>,
        offsets: Vec<usize>,
    }

    impl RecordLoader for FixedLoader {
        fn total_rows(&self) -> std::result::Result<usize, StoreError> {
            Ok(self.rows.len())
        }

        fn load(&mut self, limit: usize, offset: usize) -> std::result::Result<LoadedRecords, StoreError> {
            self.offsets.push(offset);
            let mut loaded = LoadedRecords::default();
            for (version, payload) in self.rows.iter().skip(offset).take(limit) {
                loaded.fetched += 1;
                loaded.push(version.clone(), payload.clone());
            }
            Ok(loaded)
        }
    }

    fn loader(rows: Vec<(&str, JsonValue)>) -> FixedLoader {
        FixedLoader {
            rows: rows.into_iter().map(|(v, p)| (v.to_string(), p)).collect(),
            offsets: Vec::new(),
        }
    }

    fn pipeline(configs: &[ProcessorConfig]) -> Pipeline {
        let mut columns = ColumnSchema::default_overrides();
        columns.insert("Q1".into(), ValueKind::Bool);
        let ctx = ProcessorContext {
            schema: Arc::new(ColumnSchema::new(columns)),
            separator: "|".into(),
        };
        ctx.build_pipeline(configs).unwrap()
    }

    #[test]
    fn test_run_batches_and_counts() {
        let mut loader = loader(vec![
            ("1-0", json!({"ID": "a", "Q1": "1"})),
            ("1-0", json!({"ID": "b", "Q1": "0"})),
            ("2-0", json!({"ID": "c", "Q1": "true"})),
        ]);
        let importer = Importer::new("weekly", Pipeline::default()).with_batch_size(2);
        let mut writer = DryRunWriter::default();

        let report = importer.run(&mut loader, &mut writer).unwrap();
        assert_eq!(loader.offsets, vec![0, 2, 4]);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.per_version.get("1-0"), Some(&2));
        assert_eq!(report.appended.get("2-0"), Some(&1));
        assert_eq!(report.appended_total(), 3);
        assert_eq!(writer.rows, 3);
    }

    #[test]
    fn test_starting_offset() {
        let mut loader = loader(vec![
            ("1-0", json!({"ID": "a"})),
            ("1-0", json!({"ID": "b"})),
            ("1-0", json!({"ID": "c"})),
        ]);
        let importer = Importer::new("weekly", Pipeline::default())
            .with_batch_size(10)
            .with_starting_offset(1);
        let report = importer.run(&mut loader, &mut DryRunWriter::default()).unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(loader.offsets, vec![1, 11]);
    }

    #[test]
    fn test_pipeline_is_applied_per_version() {
        let configs: Vec<ProcessorConfig> = serde_yaml::from_str(
            r#"
            - default_casting
            - { name: rename_fixed, renames: { ID: id }, version: "2-0:" }
            "#,
        )
        .unwrap();
        let mut loader = loader(vec![
            ("1-0", json!({"ID": "a", "Q1": "1"})),
            ("2-1", json!({"ID": "b", "Q1": "0"})),
        ]);
        let importer = Importer::new("weekly", pipeline(&configs));
        let mut writer = DryRunWriter::default();
        importer.run(&mut loader, &mut writer).unwrap();

        assert!(writer.columns.contains("ID"));
        assert!(writer.columns.contains("id"));
    }

    #[test]
    fn test_invalid_version_aborts_with_context() {
        let mut loader = loader(vec![("v1", json!({"ID": "a"}))]);
        let importer = Importer::new("weekly", Pipeline::default());
        let err = importer
            .run(&mut loader, &mut DryRunWriter::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("Survey 'weekly', response version: "));
    }
}
