//! Catalog of synchronized time windows
//!
//! The catalog is a JSON file next to the raw store listing the half-open
//! windows `[start, end)` already fetched from the record source. It is the
//! only record of synchronization progress and is written after every
//! window, so an interrupted sync resumes where it stopped.
//!
//! Entries never overlap and stay inside `[midnight(from_time), max_time]`;
//! both are checked again every time the file is opened.

use chrono::{DateTime, Duration, Utc};
use ifn_common::time::{iso_format, iso_format_opt, midnight};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog '{path}' was created for a {found} day period, profile uses {expected}. Use another catalog file or the original period.")]
    PeriodMismatch {
        path: String,
        expected: u32,
        found: u32,
    },

    #[error("Catalog entry {index} is invalid: {reason}")]
    Invariant { index: usize, reason: String },

    #[error("Unable to read catalog '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to write catalog '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid catalog '{path}': {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CatalogError {
    fn invariant(index: usize, reason: impl Into<String>) -> Self {
        Self::Invariant {
            index,
            reason: reason.into(),
        }
    }
}

/// One synchronized window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(with = "iso_format")]
    pub start: DateTime<Utc>,
    #[serde(with = "iso_format")]
    pub end: DateTime<Utc>,
    /// Reference of the stored data (`<table>@<start>-<end>`)
    #[serde(rename = "file")]
    pub batch_ref: String,
    #[serde(with = "iso_format_opt", default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    period: u32,
    files: Vec<CatalogEntry>,
}

/// Persisted list of synchronized windows
#[derive(Debug, Clone)]
pub struct ExportCatalog {
    path: PathBuf,
    min_time: DateTime<Utc>,
    max_time: DateTime<Utc>,
    period: u32,
    entries: BTreeMap<DateTime<Utc>, CatalogEntry>,
}

impl ExportCatalog {
    /// Open the catalog at `path`, loading and validating it if it exists
    pub fn open(
        path: impl Into<PathBuf>,
        from_time: DateTime<Utc>,
        max_time: DateTime<Utc>,
        period: u32,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self {
            path: path.into(),
            min_time: midnight(from_time),
            max_time,
            period,
            entries: BTreeMap::new(),
        };
        if catalog.path.exists() {
            catalog.load()?;
        }
        Ok(catalog)
    }

    fn path_str(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&mut self) -> Result<(), CatalogError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| CatalogError::Read {
            path: self.path_str(),
            source,
        })?;
        let file: CatalogFile =
            serde_json::from_str(&content).map_err(|source| CatalogError::Format {
                path: self.path_str(),
                source,
            })?;

        if file.period != self.period {
            return Err(CatalogError::PeriodMismatch {
                path: self.path_str(),
                expected: self.period,
                found: file.period,
            });
        }

        let mut previous_end: Option<DateTime<Utc>> = None;
        for (index, entry) in file.files.into_iter().enumerate() {
            self.check_entry(index, &entry)?;
            if let Some(prev) = previous_end {
                if entry.start < prev {
                    return Err(CatalogError::invariant(
                        index,
                        format!("starts at {} before the previous entry ends ({})", entry.start, prev),
                    ));
                }
            }
            previous_end = Some(entry.end);
            self.entries.insert(entry.start, entry);
        }
        debug!(path = %self.path.display(), entries = self.entries.len(), "Catalog loaded");
        Ok(())
    }

    fn check_entry(&self, index: usize, entry: &CatalogEntry) -> Result<(), CatalogError> {
        if entry.start >= entry.end {
            return Err(CatalogError::invariant(
                index,
                format!("start {} is not before end {}", entry.start, entry.end),
            ));
        }
        for (name, time) in [("start", entry.start), ("end", entry.end)] {
            if time < self.min_time {
                return Err(CatalogError::invariant(
                    index,
                    format!("{} {} is before min time {}", name, time, self.min_time),
                ));
            }
            if time > self.max_time {
                return Err(CatalogError::invariant(
                    index,
                    format!("{} {} is after max time {}", name, time, self.max_time),
                ));
            }
        }
        Ok(())
    }

    /// Write the catalog, replacing the file atomically
    pub fn save(&self) -> Result<(), CatalogError> {
        let write_err = |source: std::io::Error| CatalogError::Write {
            path: self.path_str(),
            source,
        };
        let file = CatalogFile {
            period: self.period,
            files: self.entries.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|source| CatalogError::Format {
            path: self.path_str(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }

    /// Record a synchronized window.
    ///
    /// Entries starting at or after the new start are dropped and a preceding
    /// entry overlapping the new window is cut at its start.
    pub fn append(&mut self, entry: CatalogEntry) -> Result<(), CatalogError> {
        self.check_entry(self.entries.len(), &entry)?;

        let replaced: Vec<DateTime<Utc>> = self.entries.range(entry.start..).map(|(k, _)| *k).collect();
        for start in replaced {
            self.entries.remove(&start);
        }
        if let Some((_, previous)) = self.entries.range_mut(..entry.start).next_back() {
            if previous.end > entry.start {
                info!(
                    previous_start = %previous.start,
                    previous_end = %previous.end,
                    new_start = %entry.start,
                    "Truncating overlapping catalog entry"
                );
                previous.end = entry.start;
            }
        }
        self.entries.insert(entry.start, entry);
        Ok(())
    }

    /// True if the exact window is already recorded
    pub fn contains_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.entries.get(&start).is_some_and(|e| e.end == end)
    }

    /// Where an incremental sync starts.
    ///
    /// The day of the last synchronized instant, moved back to the start of
    /// the entry containing it so the next window lines up with that entry.
    pub fn resume_point(&self) -> DateTime<Utc> {
        let Some(last) = self.entries.values().next_back() else {
            return self.min_time;
        };
        let day = midnight(last.end - Duration::seconds(1));
        let start = self
            .entries
            .values()
            .find(|e| e.start <= day && day < e.end)
            .map_or(day, |e| e.start);
        start.max(self.min_time)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn min_time(&self) -> DateTime<Utc> {
        self.min_time
    }

    pub fn max_time(&self) -> DateTime<Utc> {
        self.max_time
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
