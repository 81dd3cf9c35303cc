//! `ifn-export schema` command implementation
//!
//! Infers the column schema of a survey from the definitions stored in the
//! raw store and prints it as YAML, optionally merged with a previous
//! schema file.

use crate::error::{ExportError, Result, ResultExt};
use crate::profile::Profile;
use crate::schema::{ColumnSchema, SchemaBuilder};
use crate::store::raw::SurveyDefinitionProvider;
use crate::store::RawStore;
use crate::version::VersionSelector;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Schema file layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaFile {
    pub columns: ColumnSchema,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

impl SchemaFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(|| format!("Reading schema '{}'", path.display()))?;
        serde_yaml::from_str(&content).context(|| format!("Schema '{}'", path.display()))
    }
}

/// Infer the schema, merge it with `previous` and collect every problem
pub fn build_schema_file(
    store: &RawStore,
    survey: &str,
    separator: &str,
    versions: Option<VersionSelector>,
    previous: Option<SchemaFile>,
) -> Result<SchemaFile> {
    let definitions = store.survey_definitions(survey)?;
    if definitions.is_empty() {
        warn!(survey, "No survey definition in the raw store, run a sync with survey_info first");
    }
    let outcome = SchemaBuilder::new(separator)
        .with_selector(versions)
        .build(definitions);

    let mut problems: Vec<String> = outcome.problems.iter().map(|p| p.to_string()).collect();
    let columns = match previous {
        Some(previous) => {
            problems.extend(previous.problems);
            let (merged, merge_problems) = outcome.schema.merge_previous(&previous.columns);
            problems.extend(merge_problems.iter().map(|p| p.to_string()));
            merged
        },
        None => outcome.schema,
    };
    Ok(SchemaFile { columns, problems })
}

pub fn run(
    profile: &Path,
    versions: Option<&str>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let profile = Profile::load(profile, &[])?;
    let selector = match versions {
        Some(expr) => Some(expr.parse::<VersionSelector>()?),
        None => profile.version_selector()?,
    };
    let previous = input.as_deref().map(SchemaFile::load).transpose()?;

    let store = RawStore::open_read_only(&profile.raw_db)?;
    let separator = match store.meta()? {
        Some(meta) => meta.key_separator,
        None => profile.key_separator.clone(),
    };

    let file = build_schema_file(&store, &profile.survey, &separator, selector, previous)?;

    if !file.problems.is_empty() {
        eprintln!("{} Problems found in schema:", "⚠".yellow());
        for problem in &file.problems {
            eprintln!("  - {}", problem);
        }
    }

    let yaml = serde_yaml::to_string(&file)?;
    match output {
        Some(path) if file.problems.is_empty() || force => {
            std::fs::write(&path, yaml).context(|| format!("Writing schema '{}'", path.display()))?;
            println!("{} Schema written to {}", "✓".green(), path.display());
        },
        Some(_) => {
            print!("{}", yaml);
            return Err(ExportError::SchemaProblems(file.problems.len()));
        },
        None => print!("{}", yaml),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::ValueKind;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn store() -> RawStore {
        let store = RawStore::open_in_memory().unwrap();
        let v1 = json!({"versionId": "1-0", "questions": [
            {"key": "weekly.Q1", "type": "multiple_choice", "responses": [{"key": "1", "type": "option"}]},
            {"key": "weekly.Q3", "type": "text"}
        ]});
        let v2 = json!({"versionId": "2-0", "questions": [
            {"key": "weekly.Q3", "type": "date"}
        ]});
        store.store_survey_info("weekly", "1-0", &v1, false).unwrap();
        store.store_survey_info("weekly", "2-0", &v2, false).unwrap();
        store
    }

    #[test]
    fn test_build_reports_version_conflicts() {
        let file = build_schema_file(&store(), "weekly", "|", None, None).unwrap();
        assert_eq!(file.columns.get("weekly.Q1|1"), Some(ValueKind::Bool));
        assert_eq!(file.columns.get("weekly.Q3"), Some(ValueKind::Date));
        assert_eq!(file.problems, vec!["column 'weekly.Q3' changed from text to date in version 2-0"]);
    }

    #[test]
    fn test_selector_restricts_versions() {
        let selector: VersionSelector = "1-0".parse().unwrap();
        let file = build_schema_file(&store(), "weekly", "|", Some(selector), None).unwrap();
        assert!(file.problems.is_empty());
        assert_eq!(file.columns.get("weekly.Q3"), Some(ValueKind::Text));
    }

    #[test]
    fn test_invalid_profile_selector_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let raw_db = dir.path().join("raw.db");
        let profile = dir.path().join("weekly.yaml");
        std::fs::write(
            &profile,
            format!("survey: weekly\nraw_db: {}\nanalytics:\n  versions: '1-x:'\n", raw_db.display()),
        )
        .unwrap();

        let err = run(&profile, None, None, None, false).unwrap_err();
        assert!(matches!(err, ExportError::Profile(_)));
        assert!(err.to_string().starts_with("Invalid 'analytics.versions'"));
        assert!(!raw_db.exists());

        // a command-line selector is checked as well
        let err = run(&profile, Some("1:2:3"), None, None, false).unwrap_err();
        assert!(matches!(err, ExportError::Selector(_)));
    }

    #[test]
    fn test_merge_with_previous_file() {
        let previous: SchemaFile = serde_yaml::from_str("columns:\n  weekly.Q3: text\n  legacy: int\n").unwrap();
        let selector: VersionSelector = "2-0".parse().unwrap();
        let file = build_schema_file(&store(), "weekly", "|", Some(selector), Some(previous)).unwrap();

        assert_eq!(file.columns.get("legacy"), Some(ValueKind::Int));
        assert_eq!(file.columns.get("weekly.Q3"), Some(ValueKind::Text));
        assert_eq!(file.problems.len(), 1);

        let yaml = serde_yaml::to_string(&file).unwrap();
        let back: SchemaFile = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.columns, ColumnSchema::new(BTreeMap::from([
            ("legacy".to_string(), ValueKind::Int),
            ("weekly.Q3".to_string(), ValueKind::Text),
        ])));
    }
}
