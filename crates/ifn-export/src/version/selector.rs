//! Version selectors
//!
//! A selector is a predicate over [`SurveyVersion`] made of inclusion and
//! exclusion rules. A version is selected when no exclusion rule matches and
//! at least one inclusion rule matches (a selector without inclusion rules
//! includes every version).
//!
//! String grammar, items separated by `;`:
//!
//! | item            | meaning                          |
//! |-----------------|----------------------------------|
//! | `25-10-1`       | exactly this version             |
//! | `25-0-0:25-12-99` | inclusive range                |
//! | `25-0-0:` / `:24-12` | range open on one side      |
//! | `1-0,1-2,2-0`   | any version of the set           |
//! | `!<item>`       | exclusion                        |
//!
//! The list form (YAML sequence) parses every element, string or nested
//! list, into the same selector.

use super::{SurveyVersion, VersionError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Selector parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Invalid version in selector item '{item}': {source}")]
    Version {
        item: String,
        #[source]
        source: VersionError,
    },

    #[error("Invalid range '{0}': a range must have exactly one ':'")]
    Range(String),

    #[error("Version selector element {index}: {source}")]
    Element {
        index: usize,
        #[source]
        source: Box<SelectorError>,
    },
}

/// One selection rule
#[derive(Debug, Clone, PartialEq)]
pub enum VersionRule {
    /// Exactly this version
    Eq(SurveyVersion),
    /// Inclusive range, `None` bounds are unbounded
    Range {
        min: Option<SurveyVersion>,
        max: Option<SurveyVersion>,
    },
    /// Any version of the set
    In(HashSet<SurveyVersion>),
}

impl VersionRule {
    pub fn matches(&self, version: &SurveyVersion) -> bool {
        match self {
            VersionRule::Eq(candidate) => version == candidate,
            VersionRule::Range { min, max } => {
                min.as_ref().map_or(true, |min| version >= min)
                    && max.as_ref().map_or(true, |max| version <= max)
            },
            VersionRule::In(candidates) => candidates.contains(version),
        }
    }
}

impl fmt::Display for VersionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRule::Eq(v) => write!(f, "{}", v),
            VersionRule::Range { min, max } => {
                if let Some(min) = min {
                    write!(f, "{}", min)?;
                }
                write!(f, ":")?;
                if let Some(max) = max {
                    write!(f, "{}", max)?;
                }
                Ok(())
            },
            VersionRule::In(candidates) => {
                let mut items: Vec<&SurveyVersion> = candidates.iter().collect();
                items.sort();
                let items: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", items.join(","))
            },
        }
    }
}

/// Selector configuration as found in profiles: a string or a (nested) list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorSpec {
    Expr(String),
    List(Vec<SelectorSpec>),
}

/// Predicate over survey versions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionSelector {
    including: Vec<VersionRule>,
    excluding: Vec<VersionRule>,
}

impl VersionSelector {
    pub fn new(including: Vec<VersionRule>, excluding: Vec<VersionRule>) -> Self {
        Self {
            including,
            excluding,
        }
    }

    /// Parse a selector from its profile form
    pub fn from_spec(spec: &SelectorSpec) -> Result<Self, SelectorError> {
        let mut selector = Self::default();
        selector.add_spec(spec)?;
        Ok(selector)
    }

    fn add_spec(&mut self, spec: &SelectorSpec) -> Result<(), SelectorError> {
        match spec {
            SelectorSpec::Expr(expr) => self.add_expr(expr),
            SelectorSpec::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.add_spec(item).map_err(|e| SelectorError::Element {
                        index,
                        source: Box::new(e),
                    })?;
                }
                Ok(())
            },
        }
    }

    fn add_expr(&mut self, expr: &str) -> Result<(), SelectorError> {
        for item in expr.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            self.add_item(item)?;
        }
        Ok(())
    }

    fn add_item(&mut self, item: &str) -> Result<(), SelectorError> {
        let (excluding, spec) = match item.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, item),
        };
        if spec.is_empty() {
            return Ok(());
        }

        let version = |s: &str| {
            s.parse::<SurveyVersion>()
                .map_err(|source| SelectorError::Version {
                    item: item.to_string(),
                    source,
                })
        };

        let rule = if spec.contains(':') {
            let bounds: Vec<&str> = spec.split(':').map(str::trim).collect();
            if bounds.len() != 2 {
                return Err(SelectorError::Range(item.to_string()));
            }
            let min = (!bounds[0].is_empty()).then(|| version(bounds[0])).transpose()?;
            let max = (!bounds[1].is_empty()).then(|| version(bounds[1])).transpose()?;
            VersionRule::Range { min, max }
        } else if spec.contains(',') {
            let set = spec
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(version)
                .collect::<Result<HashSet<_>, _>>()?;
            VersionRule::In(set)
        } else {
            VersionRule::Eq(version(spec)?)
        };

        if excluding {
            self.excluding.push(rule);
        } else {
            self.including.push(rule);
        }
        Ok(())
    }

    /// True when an inclusion rule matches and no exclusion rule does.
    /// A selector without inclusion rules selects nothing.
    pub fn is_version(&self, version: &SurveyVersion) -> bool {
        if self.excluding.iter().any(|r| r.matches(version)) {
            return false;
        }
        self.including.iter().any(|r| r.matches(version))
    }

    /// Same as [`is_version`](Self::is_version) for a raw version tag.
    /// Unparsable tags are never selected.
    pub fn is_version_str(&self, version: &str) -> bool {
        version
            .parse::<SurveyVersion>()
            .map(|v| self.is_version(&v))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.including.is_empty() && self.excluding.is_empty()
    }
}

impl FromStr for VersionSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut selector = Self::default();
        selector.add_expr(s)?;
        Ok(selector)
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .including
            .iter()
            .map(|r| r.to_string())
            .chain(self.excluding.iter().map(|r| format!("!{}", r)))
            .collect();
        write!(f, "{}", items.join(";"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn check(selector: &VersionSelector, cases: &[(&str, bool)]) {
        for (version, expected) in cases {
            assert_eq!(
                selector.is_version_str(version),
                *expected,
                "selector '{}' on version {}",
                selector,
                version
            );
        }
    }

    #[test]
    fn test_eq_selector() {
        let s: VersionSelector = "25-10-1".parse().unwrap();
        check(&s, &[("24-1-12", false), ("25-10-2", false), ("25-10-1", true), ("25-10-1-0", true)]);
    }

    #[test]
    fn test_range_selector() {
        let s: VersionSelector = "25-0-0:25-12-99".parse().unwrap();
        check(
            &s,
            &[
                ("24-1-12", false),
                ("25-10-2", true),
                ("25-10-1", true),
                ("23-10-12", false),
                ("25-2-2", true),
            ],
        );
    }

    #[test]
    fn test_open_ranges() {
        let from: VersionSelector = "25-0-0:".parse().unwrap();
        check(&from, &[("24-12-99", false), ("25", true), ("99-0-0", true)]);

        let until: VersionSelector = ":24-12".parse().unwrap();
        check(&until, &[("1-0", true), ("24-12-0", true), ("24-12-1", false)]);
    }

    #[test]
    fn test_exclusion_combined_with_inclusion() {
        let s: VersionSelector = "25-0-0:25-12-99;!25-10-1".parse().unwrap();
        check(&s, &[("25-10-1", false), ("25-10-2", true), ("24-0-0", false)]);
    }

    #[test]
    fn test_exclusion_only_selects_nothing() {
        let s: VersionSelector = "!25-10-1".parse().unwrap();
        check(&s, &[("25-10-1", false), ("25-10-2", false), ("1-0", false)]);
    }

    #[test]
    fn test_set_selector() {
        let s: VersionSelector = "1-0, 1-2 ,2-0;!1-2".parse().unwrap();
        check(&s, &[("1-0", true), ("1-2", false), ("2", true), ("1-1", false)]);
    }

    #[test]
    fn test_empty_items_are_skipped() {
        let s: VersionSelector = " ; 1-0 ;; ".parse().unwrap();
        check(&s, &[("1-0", true), ("1-1", false)]);
        assert!("".parse::<VersionSelector>().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_items() {
        assert!(matches!(
            "1:2:3".parse::<VersionSelector>(),
            Err(SelectorError::Range(_))
        ));
        assert!(matches!(
            "1-a".parse::<VersionSelector>(),
            Err(SelectorError::Version { .. })
        ));
    }

    #[test]
    fn test_list_form_accumulates_rules() {
        let spec: SelectorSpec =
            serde_yaml::from_str("['25-0-0:25-12-99', ['!25-10-1', '26-1-0']]").unwrap();
        let s = VersionSelector::from_spec(&spec).unwrap();
        check(&s, &[("25-10-1", false), ("25-3-0", true), ("26-1-0", true), ("26-2-0", false)]);
    }

    #[test]
    fn test_list_form_reports_index() {
        let spec: SelectorSpec = serde_yaml::from_str("['1-0', 'x']").unwrap();
        let err = VersionSelector::from_spec(&spec).unwrap_err();
        assert!(matches!(err, SelectorError::Element { index: 1, .. }));
    }

    #[test]
    fn test_display_round_trip() {
        let s: VersionSelector = "25-0-0:;!25-10-1;1-0".parse().unwrap();
        let again: VersionSelector = s.to_string().parse().unwrap();
        assert_eq!(s, again);
    }

    #[test]
    fn test_unparsable_tag_never_selected() {
        let s: VersionSelector = "1-0:".parse().unwrap();
        assert!(s.is_version_str("3-1"));
        assert!(!s.is_version_str("beta"));
        assert!(!VersionSelector::default().is_version_str("3-1"));
    }
}
