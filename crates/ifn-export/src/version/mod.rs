//! Survey versions
//!
//! A survey version is a `-` separated list of non-negative integers
//! (`25-10-1`). Versions compare component-wise, missing trailing components
//! count as zero, so `1-2` and `1-2-0` are the same version.

pub mod selector;

pub use selector::{SelectorError, SelectorSpec, VersionRule, VersionSelector};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Version parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Unable to parse version '{input}': integer expected at position {position}")]
    Parse { input: String, position: usize },
}

/// Dotted-integer survey version
#[derive(Debug, Clone)]
pub struct SurveyVersion {
    items: Vec<u32>,
}

impl SurveyVersion {
    pub fn new(items: Vec<u32>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[u32] {
        &self.items
    }

    /// Items without trailing zeros, the canonical form used for hashing
    fn significant(&self) -> &[u32] {
        let len = self
            .items
            .iter()
            .rposition(|&x| x != 0)
            .map_or(0, |idx| idx + 1);
        &self.items[..len]
    }

    /// Component-wise comparison, the shorter version padded with zeros
    pub fn compare(&self, other: &SurveyVersion) -> Ordering {
        let len = self.items.len().max(other.items.len());
        for i in 0..len {
            let x = self.items.get(i).copied().unwrap_or(0);
            let y = other.items.get(i).copied().unwrap_or(0);
            match x.cmp(&y) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl FromStr for SurveyVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let items = s
            .trim()
            .split('-')
            .enumerate()
            .map(|(position, part)| {
                part.trim().parse::<u32>().map_err(|_| VersionError::Parse {
                    input: s.to_string(),
                    position,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { items })
    }
}

impl PartialEq for SurveyVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for SurveyVersion {}

impl PartialOrd for SurveyVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SurveyVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl Hash for SurveyVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl fmt::Display for SurveyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.items.iter().map(|x| x.to_string()).collect();
        write!(f, "{}", parts.join("-"))
    }
}

impl Serialize for SurveyVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SurveyVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
