//! `ifn-export build` command implementation
//!
//! Builds (or extends) the analytics table of a survey from its raw store.

use crate::debug::DebugFlag;
use crate::error::{Result, ResultExt};
use crate::importer::{ImportReport, Importer, RawStoreLoader, SourceQuery};
use crate::processor::ProcessorContext;
use crate::profile::{AnalyticsConfig, Profile};
use crate::schema::{ColumnSchema, SchemaBuilder, SchemaProblem};
use crate::store::raw::SurveyDefinitionProvider;
use crate::store::{DryRunWriter, RawStore, SqliteWriter, TableWriter};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Schema used by the casting processors, with the conflicts met while
/// inferring it
pub fn resolve_schema(
    store: &RawStore,
    survey: &str,
    separator: &str,
    config: &AnalyticsConfig,
) -> Result<(ColumnSchema, Vec<SchemaProblem>)> {
    let (inferred, problems) = if config.infer_schema {
        let outcome = SchemaBuilder::new(separator)
            .with_selector(config.versions.clone())
            .build(store.survey_definitions(survey)?);
        (outcome.schema, outcome.problems)
    } else {
        (ColumnSchema::default(), Vec::new())
    };
    let schema = inferred
        .with_overrides(&ColumnSchema::default_overrides())
        .with_overrides(&config.schema);
    Ok((schema, problems))
}

/// Run the analytics build of one profile
pub fn build_profile(profile: &Profile, store: &RawStore) -> Result<ImportReport> {
    let config = profile.analytics_config()?;
    build_with_config(profile, &config, store)
}

/// Run the analytics build with already resolved settings
pub fn build_with_config(
    profile: &Profile,
    config: &AnalyticsConfig,
    store: &RawStore,
) -> Result<ImportReport> {
    let trace = config.debugger.clone();

    let meta = store.require_meta()?;
    if meta.key_separator != profile.key_separator {
        warn!(
            stored = %meta.key_separator,
            configured = %profile.key_separator,
            "Key separator differs from the raw store, using the stored one"
        );
    }
    let separator = meta.key_separator;

    let (schema, problems) = resolve_schema(store, &profile.survey, &separator, config)?;
    trace.trace(DebugFlag::Schema, || {
        serde_yaml::to_string(&schema).unwrap_or_else(|e| e.to_string())
    });

    let pipeline = ProcessorContext {
        schema: Arc::new(schema),
        separator,
    }
    .build_pipeline(&config.processors)
    .context(|| format!("Survey '{}', processors", profile.survey))?;
    trace.trace(DebugFlag::Processors, || format!("pipeline:\n{}", pipeline));

    let mut query = SourceQuery::new(config.source_table.clone());
    query.from_time = config.from_time;
    query.to_time = config.to_time;
    if let Some(selector) = &config.versions {
        query = query.resolve_versions(store, selector)?;
    }
    trace.trace(DebugFlag::Query, || format!("{:?}", query));

    let importer = Importer::new(profile.survey.clone(), pipeline)
        .with_batch_size(config.batch_size)
        .with_starting_offset(config.starting_offset)
        .with_debugger(trace.clone());
    let mut loader = RawStoreLoader::new(store, query, trace);

    let mut writer: Box<dyn TableWriter> = if config.dry_run {
        Box::new(DryRunWriter::default())
    } else {
        info!(target_db = %config.target_db.display(), table = %config.target_table, "Opening analytics table");
        Box::new(SqliteWriter::open(
            &config.target_db,
            config.target_table.clone(),
            config.insert_mode,
        )?)
    };
    let mut report = importer.run(&mut loader, writer.as_mut())?;
    if !problems.is_empty() {
        warn!(survey = %profile.survey, problems = problems.len(), "Schema problems, the latest version won");
    }
    report.problems = problems;
    Ok(report)
}

pub fn run(profile: &Path, only_show: bool, dry_run: bool, overrides: &[String]) -> Result<()> {
    let mut overrides = overrides.to_vec();
    if dry_run {
        overrides.push("analytics.dry_run=true".to_string());
    }
    let profile = Profile::load(profile, &overrides)?;

    if only_show {
        print!("{}", profile.to_yaml()?);
        return Ok(());
    }

    // settings and processors are checked before the raw store is touched
    let config = profile.analytics_config()?;
    let store = RawStore::open_read_only(&profile.raw_db)?;
    let report = build_with_config(&profile, &config, &store)?;

    println!(
        "{} {}: {} row(s) read, {} appended",
        "✓".green(),
        report.survey.bold(),
        report.fetched,
        report.appended_total()
    );
    for (version, rows) in &report.per_version {
        println!("  {} {:>8}", version, rows);
    }
    if !report.problems.is_empty() {
        eprintln!("{} {} schema problem(s), the latest version won:", "⚠".yellow(), report.problems.len());
        for problem in &report.problems {
            eprintln!("  - {}", problem);
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_profile(dir: &Path, raw_db: &Path, analytics: &str) -> std::path::PathBuf {
        let path = dir.join("weekly.yaml");
        let yaml = format!(
            "survey: weekly\nraw_db: {}\nanalytics:\n  target_db: {}\n{}",
            raw_db.display(),
            dir.join("analytics.db").display(),
            analytics
        );
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn test_unknown_processor_fails_before_opening_stores() {
        let dir = TempDir::new().unwrap();
        let raw_db = dir.path().join("typo").join("raw.db");
        let profile = write_profile(dir.path(), &raw_db, "  processors: [no_such_processor]\n");

        let err = run(&profile, false, false, &[]).unwrap_err();
        assert!(err.to_string().contains("unknown processor name 'no_such_processor'"));
        assert!(!raw_db.exists());
        assert!(!dir.path().join("typo").exists());
        assert!(!dir.path().join("analytics.db").exists());
    }

    #[test]
    fn test_missing_raw_store_is_not_created() {
        let dir = TempDir::new().unwrap();
        let raw_db = dir.path().join("typo").join("raw.db");
        let profile = write_profile(dir.path(), &raw_db, "");

        let err = run(&profile, false, false, &[]).unwrap_err();
        assert!(err.to_string().starts_with("Unable to open database"));
        assert!(!dir.path().join("typo").exists());
    }
}
