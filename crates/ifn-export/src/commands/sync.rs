//! `ifn-export sync` command implementation
//!
//! Synchronizes the raw store of each profile, window by window, from the
//! management API or from a JSON dump of responses.

use crate::catalog::ExportCatalog;
use crate::error::{ExportError, Result, ResultExt};
use crate::exporter::{DbExporter, ExportSettings, SyncReport};
use crate::profile::Profile;
use crate::source::http::ManagementApiSource;
use crate::source::memory::MemorySource;
use crate::source::{RecordSource, SurveyInfoSource};
use crate::store::RawStore;
use colored::Colorize;
use ifn_common::time::from_iso_time;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use tracing::info;

/// Synchronize every profile in order
pub fn run(
    profiles: &[PathBuf],
    restart: bool,
    start_from: Option<&str>,
    input: Option<&Path>,
    overrides: &[String],
) -> Result<()> {
    let start_from = start_from.map(from_iso_time).transpose()?;

    for path in profiles {
        println!("{} Processing {}", "→".cyan(), path.display());
        let profile = Profile::load(path, overrides)?;

        let report = match input {
            Some(input) => {
                let mut source = load_dump(input)?;
                sync_profile(&profile, &mut source, restart, start_from)?
            },
            None => {
                let mut source = ManagementApiSource::from_env(profile.key_separator.clone())?;
                sync_profile(&profile, &mut source, restart, start_from)?
            },
        };

        println!(
            "{} {}: {} window(s), {} fetched, {} new",
            "✓".green(),
            report.survey.bold(),
            report.windows,
            report.fetched,
            report.inserted
        );
    }
    Ok(())
}

/// Responses dumped as a JSON array
fn load_dump(path: &Path) -> Result<MemorySource> {
    let content = std::fs::read_to_string(path).context(|| format!("Reading '{}'", path.display()))?;
    let documents: Vec<JsonValue> =
        serde_json::from_str(&content).context(|| format!("Parsing '{}'", path.display()))?;
    Ok(MemorySource::from_documents(documents)?)
}

/// Synchronize the raw store of one profile from `source`
pub fn sync_profile<S>(
    profile: &Profile,
    source: &mut S,
    restart: bool,
    start_from: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<SyncReport>
where
    S: RecordSource + SurveyInfoSource,
{
    let config = profile.sync_config()?;
    let mut store = RawStore::open(&profile.raw_db)?;
    let mut catalog = ExportCatalog::open(&config.catalog, config.from_time, config.max_time, config.period_days)?;

    let force_start = match (start_from, restart) {
        (Some(start), _) => Some(start),
        (None, true) => Some(config.from_time),
        (None, false) => None,
    };
    if let Some(start) = force_start {
        if start < catalog.min_time() {
            return Err(ExportError::config(format!(
                "start {} is before from_time {}",
                start,
                catalog.min_time()
            )));
        }
    }

    let settings = ExportSettings {
        study_key: config.study_key.clone(),
        survey_key: profile.survey.clone(),
        key_separator: profile.key_separator.clone(),
        page_size: config.page_size,
    };

    // Survey definitions before responses
    let mut exporter = DbExporter::new(&mut store, source, &mut catalog, settings)?;
    if let Some(survey_info) = &config.survey_info {
        let stored = exporter.export_info(&survey_info.lang, survey_info.replace)?;
        info!(survey = %profile.survey, lang = %survey_info.lang, stored, "Survey definitions stored");
    }
    exporter.export_all(force_start)
}
