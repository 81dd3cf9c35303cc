//! Export profile (YAML)
//!
//! A profile describes one survey: where the raw store lives, how to
//! synchronize it and how to build its analytics table. Values can be
//! overridden from the command line with dotted keys
//! (`analytics.batch_size=10`); an override always beats the file, which
//! beats the default.

use crate::debug::{DebugFlag, Debugger};
use crate::processor::{default_processors, ProcessorConfig, ProcessorContext};
use crate::schema::ValueKind;
use crate::store::analytics::InsertMode;
use crate::store::raw::response_table;
use crate::version::{SelectorSpec, VersionSelector};
use chrono::{DateTime, Duration, Utc};
use ifn_common::time::from_iso_time;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where a profile value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    File(PathBuf),
    Override,
    Default,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::File(path) => write!(f, "profile '{}'", path.display()),
            Origin::Override => write!(f, "command-line override"),
            Origin::Default => write!(f, "default"),
        }
    }
}

/// Profile errors
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Unable to read profile '{path}': {source}. Verify the file path exists.")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profile '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid override '{expr}': {reason}. Expected key.path=value.")]
    Override { expr: String, reason: String },

    #[error("'{field}' is required ({origin})")]
    Missing { field: String, origin: Origin },

    #[error("Invalid '{field}' from {origin}: {reason}")]
    Invalid {
        field: String,
        origin: Origin,
        reason: String,
    },
}

fn default_separator() -> String {
    "|".to_string()
}

fn default_period_days() -> u32 {
    7
}

fn default_page_size() -> usize {
    1000
}

fn default_batch_size() -> usize {
    5000
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

/// Survey definition synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurveyInfoSection {
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Replace versions already stored
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSection {
    pub from_time: Option<String>,
    /// ISO time or `now`
    pub max_time: Option<String>,
    #[serde(default = "default_period_days")]
    pub period_days: u32,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub catalog: Option<PathBuf>,
    pub survey_info: Option<SurveyInfoSection>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            from_time: None,
            max_time: None,
            period_days: default_period_days(),
            page_size: default_page_size(),
            catalog: None,
            survey_info: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsSection {
    pub target_db: Option<PathBuf>,
    pub target_table: Option<String>,
    pub source_table: Option<String>,
    pub from_time: Option<String>,
    pub to_time: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub starting_offset: usize,
    pub versions: Option<SelectorSpec>,
    #[serde(default)]
    pub insert_mode: InsertMode,
    #[serde(default = "default_true")]
    pub infer_schema: bool,
    /// Kind overrides applied after inference
    #[serde(default)]
    pub schema: BTreeMap<String, ValueKind>,
    pub processors: Option<Vec<ProcessorConfig>>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub debug: Vec<DebugFlag>,
}

impl Default for AnalyticsSection {
    fn default() -> Self {
        Self {
            target_db: None,
            target_table: None,
            source_table: None,
            from_time: None,
            to_time: None,
            batch_size: default_batch_size(),
            starting_offset: 0,
            versions: None,
            insert_mode: InsertMode::default(),
            infer_schema: true,
            schema: BTreeMap::new(),
            processors: None,
            dry_run: false,
            debug: Vec::new(),
        }
    }
}

/// Export profile of one survey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub survey: String,
    pub study_key: Option<String>,
    #[serde(default = "default_separator")]
    pub key_separator: String,
    pub raw_db: PathBuf,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub analytics: AnalyticsSection,

    #[serde(skip)]
    sources: ProfileSources,
}

/// Where the file and the overridden keys come from
#[derive(Debug, Clone, Default, PartialEq)]
struct ProfileSources {
    path: PathBuf,
    file_keys: BTreeSet<String>,
    overrides: BTreeSet<String>,
}

/// Resolved synchronization settings
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub study_key: String,
    pub from_time: DateTime<Utc>,
    pub max_time: DateTime<Utc>,
    pub period_days: u32,
    pub page_size: usize,
    pub catalog: PathBuf,
    pub survey_info: Option<SurveyInfoSection>,
}

/// Resolved analytics build settings
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    pub target_db: PathBuf,
    pub target_table: String,
    pub source_table: String,
    pub from_time: Option<DateTime<Utc>>,
    pub to_time: Option<DateTime<Utc>>,
    pub batch_size: usize,
    pub starting_offset: usize,
    pub versions: Option<VersionSelector>,
    pub insert_mode: InsertMode,
    pub infer_schema: bool,
    pub schema: BTreeMap<String, ValueKind>,
    pub processors: Vec<ProcessorConfig>,
    pub dry_run: bool,
    pub debugger: Debugger,
}

/// Collect the dotted keys present in a YAML document
fn collect_keys(value: &YamlValue, prefix: &str, keys: &mut BTreeSet<String>) {
    if let YamlValue::Mapping(map) = value {
        for (k, v) in map {
            let Some(k) = k.as_str() else { continue };
            let key = if prefix.is_empty() {
                k.to_string()
            } else {
                format!("{}.{}", prefix, k)
            };
            collect_keys(v, &key, keys);
            keys.insert(key);
        }
    }
}

/// Apply `key.path=value` on a YAML document. The value uses YAML scalar
/// syntax; anything that does not parse is taken as a string.
fn apply_override(doc: &mut YamlValue, expr: &str) -> Result<String, ProfileError> {
    let invalid = |reason: &str| ProfileError::Override {
        expr: expr.to_string(),
        reason: reason.to_string(),
    };
    let (key, raw) = expr.split_once('=').ok_or_else(|| invalid("missing '='"))?;
    let key = key.trim();
    if key.is_empty() || key.split('.').any(str::is_empty) {
        return Err(invalid("empty key"));
    }
    let value = serde_yaml::from_str::<YamlValue>(raw).unwrap_or_else(|_| YamlValue::String(raw.to_string()));

    let mut parts: Vec<&str> = key.split('.').collect();
    let last = parts.pop().ok_or_else(|| invalid("empty key"))?;
    let mut current = doc;
    for part in parts {
        if current.is_null() {
            *current = YamlValue::Mapping(Mapping::new());
        }
        let map = current
            .as_mapping_mut()
            .ok_or_else(|| invalid(&format!("'{}' is not a section", part)))?;
        current = map
            .entry(YamlValue::String(part.to_string()))
            .or_insert(YamlValue::Null);
    }
    if current.is_null() {
        *current = YamlValue::Mapping(Mapping::new());
    }
    current
        .as_mapping_mut()
        .ok_or_else(|| invalid("parent is not a section"))?
        .insert(YamlValue::String(last.to_string()), value);
    Ok(key.to_string())
}

impl Profile {
    /// Load a profile file and apply the overrides
    pub fn load(path: impl AsRef<Path>, overrides: &[String]) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content, path, overrides)
    }

    /// Parse a profile document; `path` is only used to report origins
    pub fn from_yaml(content: &str, path: impl Into<PathBuf>, overrides: &[String]) -> Result<Self, ProfileError> {
        let path = path.into();
        let parse_err = |source| ProfileError::Parse {
            path: path.display().to_string(),
            source,
        };
        let mut doc: YamlValue = serde_yaml::from_str(content).map_err(parse_err)?;
        if doc.is_null() {
            doc = YamlValue::Mapping(Mapping::new());
        }

        let mut file_keys = BTreeSet::new();
        collect_keys(&doc, "", &mut file_keys);
        let mut overridden = BTreeSet::new();
        for expr in overrides {
            overridden.insert(apply_override(&mut doc, expr)?);
        }

        let mut profile: Profile = serde_yaml::from_value(doc).map_err(parse_err)?;
        profile.sources = ProfileSources {
            path,
            file_keys,
            overrides: overridden,
        };
        profile.validate()?;
        profile.fill_defaults();
        Ok(profile)
    }

    /// Origin of a dotted key
    pub fn origin(&self, key: &str) -> Origin {
        if self.sources.overrides.contains(key) {
            Origin::Override
        } else if self.sources.file_keys.contains(key) {
            Origin::File(self.sources.path.clone())
        } else {
            Origin::Default
        }
    }

    pub fn path(&self) -> &Path {
        &self.sources.path
    }

    fn invalid(&self, field: &str, reason: impl fmt::Display) -> ProfileError {
        ProfileError::Invalid {
            field: field.to_string(),
            origin: self.origin(field),
            reason: reason.to_string(),
        }
    }

    fn missing(&self, field: &str) -> ProfileError {
        ProfileError::Missing {
            field: field.to_string(),
            origin: self.origin(field),
        }
    }

    fn validate(&self) -> Result<(), ProfileError> {
        if self.survey.trim().is_empty() {
            return Err(self.invalid("survey", "must not be empty"));
        }
        if self.key_separator.is_empty() {
            return Err(self.invalid("key_separator", "must not be empty"));
        }
        if self.sync.period_days == 0 {
            return Err(self.invalid("sync.period_days", "must be at least 1"));
        }
        if self.sync.page_size == 0 {
            return Err(self.invalid("sync.page_size", "must be at least 1"));
        }
        if self.analytics.batch_size == 0 {
            return Err(self.invalid("analytics.batch_size", "must be at least 1"));
        }
        Ok(())
    }

    /// Resolve derived paths and table names
    fn fill_defaults(&mut self) {
        if self.sync.catalog.is_none() {
            let dir = self.raw_db.parent().map(Path::to_path_buf).unwrap_or_default();
            self.sync.catalog = Some(dir.join(format!("{}.catalog.json", self.survey)));
        }
        if self.analytics.target_table.is_none() {
            self.analytics.target_table = Some(format!("pollster_results_{}", self.survey));
        }
        if self.analytics.source_table.is_none() {
            self.analytics.source_table = Some(response_table(&self.survey));
        }
    }

    fn time(&self, field: &str, value: &Option<String>) -> Result<Option<DateTime<Utc>>, ProfileError> {
        value
            .as_deref()
            .map(|v| from_iso_time(v).map_err(|e| self.invalid(field, e)))
            .transpose()
    }

    /// Synchronization settings, failing on a missing or invalid field
    pub fn sync_config(&self) -> Result<SyncConfig, ProfileError> {
        let study_key = self
            .study_key
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| self.missing("study_key"))?;
        let from_time = self
            .time("sync.from_time", &self.sync.from_time)?
            .ok_or_else(|| self.missing("sync.from_time"))?;
        let max_time = match self.sync.max_time.as_deref() {
            Some("now") => Utc::now(),
            Some(_) => self
                .time("sync.max_time", &self.sync.max_time)?
                .unwrap_or(from_time),
            None => from_time + Duration::days(365),
        };
        if max_time <= from_time {
            return Err(self.invalid("sync.max_time", format!("must be after from_time ({})", from_time)));
        }

        Ok(SyncConfig {
            study_key,
            from_time,
            max_time,
            period_days: self.sync.period_days,
            page_size: self.sync.page_size,
            catalog: self.sync.catalog.clone().unwrap_or_default(),
            survey_info: self.sync.survey_info.clone(),
        })
    }

    /// Analytics build settings, failing on a missing or invalid field
    pub fn analytics_config(&self) -> Result<AnalyticsConfig, ProfileError> {
        let a = &self.analytics;
        let target_db = match (&a.target_db, a.dry_run) {
            (Some(db), _) => db.clone(),
            (None, true) => PathBuf::from(":memory:"),
            (None, false) => return Err(self.missing("analytics.target_db")),
        };
        let versions = self.version_selector()?;
        let processors = a.processors.clone().unwrap_or_else(default_processors);
        ProcessorContext::validate(&processors, &self.key_separator)
            .map_err(|e| self.invalid("analytics.processors", e))?;

        Ok(AnalyticsConfig {
            target_db,
            target_table: a.target_table.clone().unwrap_or_default(),
            source_table: a.source_table.clone().unwrap_or_default(),
            from_time: self.time("analytics.from_time", &a.from_time)?,
            to_time: self.time("analytics.to_time", &a.to_time)?,
            batch_size: a.batch_size,
            starting_offset: a.starting_offset,
            versions,
            insert_mode: a.insert_mode,
            infer_schema: a.infer_schema,
            schema: a.schema.clone(),
            processors,
            dry_run: a.dry_run,
            debugger: Debugger::new(a.debug.iter().copied()),
        })
    }

    /// Version selector of the analytics build, `None` when not configured
    pub fn version_selector(&self) -> Result<Option<VersionSelector>, ProfileError> {
        self.analytics
            .versions
            .as_ref()
            .map(VersionSelector::from_spec)
            .transpose()
            .map_err(|e| self.invalid("analytics.versions", e))
    }

    /// Resolved profile as YAML
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
survey: weekly
study_key: ifn
raw_db: data/raw.db
sync:
  from_time: 2024-01-01T00:00:00
analytics:
  target_db: data/analytics.db
  versions: "1-0:1-9;!1-5"
  schema: { Q10: int }
  debug: [processors]
"#;

    fn overrides(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let profile = Profile::from_yaml(PROFILE, "weekly.yaml", &[]).unwrap();
        assert_eq!(profile.key_separator, "|");
        assert_eq!(profile.sync.catalog, Some(PathBuf::from("data/weekly.catalog.json")));
        assert_eq!(profile.analytics.target_table.as_deref(), Some("pollster_results_weekly"));

        let sync = profile.sync_config().unwrap();
        assert_eq!(sync.period_days, 7);
        assert_eq!(sync.page_size, 1000);
        assert_eq!(sync.max_time - sync.from_time, Duration::days(365));

        let analytics = profile.analytics_config().unwrap();
        assert_eq!(analytics.batch_size, 5000);
        assert_eq!(analytics.source_table, "responses_weekly");
        assert_eq!(analytics.insert_mode, InsertMode::Ignore);
        assert_eq!(analytics.processors, default_processors());
        assert!(analytics.debugger.enabled(DebugFlag::Processors));
        assert!(!analytics.versions.unwrap().is_version(&"1-5".parse().unwrap()));
        assert_eq!(analytics.schema.get("Q10"), Some(&ValueKind::Int));
    }

    #[test]
    fn test_override_beats_file() {
        let profile = Profile::from_yaml(
            PROFILE,
            "weekly.yaml",
            &overrides(&["analytics.batch_size=10", "sync.max_time=now", "analytics.insert_mode=replace"]),
        )
        .unwrap();
        assert_eq!(profile.analytics.batch_size, 10);
        assert_eq!(profile.analytics.insert_mode, InsertMode::Replace);
        assert_eq!(profile.origin("analytics.batch_size"), Origin::Override);
        assert_eq!(profile.origin("sync.from_time"), Origin::File(PathBuf::from("weekly.yaml")));
        assert_eq!(profile.origin("sync.page_size"), Origin::Default);
    }

    #[test]
    fn test_override_creates_sections() {
        let profile = Profile::from_yaml(
            "survey: intake\nraw_db: raw.db\n",
            "intake.yaml",
            &overrides(&["sync.survey_info.lang=fr"]),
        )
        .unwrap();
        assert_eq!(profile.sync.survey_info.unwrap().lang, "fr");
    }

    #[test]
    fn test_invalid_override() {
        let err = Profile::from_yaml(PROFILE, "weekly.yaml", &overrides(&["analytics.batch_size"])).unwrap_err();
        assert!(matches!(err, ProfileError::Override { .. }));
        let err = Profile::from_yaml(PROFILE, "weekly.yaml", &overrides(&["survey.name=x"])).unwrap_err();
        assert!(matches!(err, ProfileError::Override { .. }));
    }

    #[test]
    fn test_errors_report_origin() {
        let profile = Profile::from_yaml(
            PROFILE,
            "weekly.yaml",
            &overrides(&["sync.from_time=yesterday"]),
        )
        .unwrap();
        let err = profile.sync_config().unwrap_err();
        assert!(err.to_string().starts_with("Invalid 'sync.from_time' from command-line override"));

        let profile = Profile::from_yaml("survey: weekly\nraw_db: raw.db\n", "weekly.yaml", &[]).unwrap();
        let err = profile.sync_config().unwrap_err();
        assert_eq!(err.to_string(), "'study_key' is required (default)");

        let err = Profile::from_yaml("survey: weekly\nraw_db: raw.db\nsync: { period_days: 0 }\n", "w.yaml", &[])
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid 'sync.period_days' from profile 'w.yaml': must be at least 1");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = Profile::from_yaml("survey: weekly\nraw_db: raw.db\nbatch: 3\n", "w.yaml", &[]).unwrap_err();
        assert!(matches!(err, ProfileError::Parse { .. }));
    }

    #[test]
    fn test_target_db_required_unless_dry_run() {
        let profile = Profile::from_yaml("survey: weekly\nraw_db: raw.db\n", "w.yaml", &[]).unwrap();
        assert!(matches!(profile.analytics_config(), Err(ProfileError::Missing { .. })));

        let profile = Profile::from_yaml(
            "survey: weekly\nraw_db: raw.db\n",
            "w.yaml",
            &overrides(&["analytics.dry_run=true"]),
        )
        .unwrap();
        assert!(profile.analytics_config().unwrap().dry_run);
    }

    #[test]
    fn test_invalid_selector_and_processor_are_reported() {
        let profile = Profile::from_yaml(
            PROFILE,
            "weekly.yaml",
            &overrides(&["analytics.versions='1-x:'"]),
        )
        .unwrap();
        let err = profile.version_selector().unwrap_err();
        assert!(err.to_string().starts_with("Invalid 'analytics.versions' from command-line override"));
        assert!(profile.analytics_config().is_err());

        let profile = Profile::from_yaml(
            "survey: weekly\nraw_db: raw.db\nanalytics:\n  target_db: a.db\n  processors: [default_casting, no_such_processor]\n",
            "w.yaml",
            &[],
        )
        .unwrap();
        let err = profile.analytics_config().unwrap_err();
        assert!(matches!(&err, ProfileError::Invalid { field, .. } if field == "analytics.processors"));
        assert!(err.to_string().contains("unknown processor name 'no_such_processor'"));
    }

    #[test]
    fn test_to_yaml_shows_resolved_values() {
        let profile = Profile::from_yaml(PROFILE, "weekly.yaml", &[]).unwrap();
        let yaml = profile.to_yaml().unwrap();
        assert!(yaml.contains("target_table: pollster_results_weekly"));
        assert!(yaml.contains("catalog: data/weekly.catalog.json"));
    }
}
