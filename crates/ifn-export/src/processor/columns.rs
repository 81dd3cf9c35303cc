//! Column selection for rule-based processors
//!
//! Profile form, a list whose entries are a column name, a list of names, or
//! a map with `glob` and/or `re` patterns:
//!
//! ```yaml
//! columns:
//!   - intake.Q1
//!   - [intake.Q2, intake.Q3]
//!   - glob: "weekly.Q1|*"
//!   - re: ["weekly\\.Q(10|11)"]
//! ```

use super::ProcessorError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One name or several
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Profile entry of a column selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnEntry {
    Names(OneOrMany),
    Patterns {
        #[serde(default)]
        glob: Option<OneOrMany>,
        #[serde(default)]
        re: Option<OneOrMany>,
    },
}

#[derive(Debug, Clone)]
enum Matcher {
    Fixed(Vec<String>),
    Glob { pattern: String, regex: Regex },
    Re { pattern: String, regex: Regex },
}

impl Matcher {
    fn matches(&self, column: &str) -> bool {
        match self {
            Matcher::Fixed(names) => names.iter().any(|n| n == column),
            Matcher::Glob { regex, .. } | Matcher::Re { regex, .. } => regex.is_match(column),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Fixed(names) => write!(f, "fixed({})", names.join(",")),
            Matcher::Glob { pattern, .. } => write!(f, "glob({})", pattern),
            Matcher::Re { pattern, .. } => write!(f, "re({})", pattern),
        }
    }
}

/// Translate a shell glob into an anchored regex (`*`, `?`, `[...]`, `[!...]`)
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if closed {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    out.push_str(&regex::escape(&format!("[{}", class)));
                }
            },
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

fn compile(pattern: &str) -> Result<Regex, ProcessorError> {
    RegexBuilder::new(pattern)
        .build()
        .map_err(|e| ProcessorError::invalid_pattern(pattern, e))
}

/// Selects batch columns by name, glob or regex
#[derive(Debug, Clone, Default)]
pub struct ColumnSelector {
    matchers: Vec<Matcher>,
}

impl ColumnSelector {
    pub fn from_entries(entries: Vec<ColumnEntry>) -> Result<Self, ProcessorError> {
        let mut matchers = Vec::new();
        for entry in entries {
            match entry {
                ColumnEntry::Names(names) => matchers.push(Matcher::Fixed(names.into_vec())),
                ColumnEntry::Patterns { glob, re } => {
                    for pattern in glob.map(OneOrMany::into_vec).unwrap_or_default() {
                        let regex = compile(&glob_to_regex(&pattern))?;
                        matchers.push(Matcher::Glob { pattern, regex });
                    }
                    for pattern in re.map(OneOrMany::into_vec).unwrap_or_default() {
                        // anchored at the start of the column name
                        let regex = compile(&format!("^(?:{})", pattern))?;
                        matchers.push(Matcher::Re { pattern, regex });
                    }
                },
            }
        }
        Ok(Self { matchers })
    }

    pub fn names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            matchers: vec![Matcher::Fixed(names.into_iter().map(Into::into).collect())],
        }
    }

    /// Columns matched by any entry, deduplicated, in `columns` order
    pub fn select<'a>(&self, columns: &[&'a str]) -> Vec<&'a str> {
        let mut seen = HashSet::new();
        columns
            .iter()
            .copied()
            .filter(|c| self.matchers.iter().any(|m| m.matches(c)))
            .filter(|c| seen.insert(*c))
            .collect()
    }
}

impl fmt::Display for ColumnSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.matchers.iter().map(|m| m.to_string()).collect();
        write!(f, "{}", items.join(","))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn selector(yaml: &str) -> ColumnSelector {
        let entries: Vec<ColumnEntry> = serde_yaml::from_str(yaml).unwrap();
        ColumnSelector::from_entries(entries).unwrap()
    }

    const COLUMNS: &[&str] = &["Q1|1", "Q1|2", "Q10", "Q2", "Q1_extra", "timestamp"];

    #[test]
    fn test_fixed_names() {
        let s = selector("[Q2, [timestamp, missing]]");
        assert_eq!(s.select(COLUMNS), vec!["Q2", "timestamp"]);
    }

    #[test]
    fn test_glob() {
        let s = selector("[{glob: 'Q1|*'}]");
        assert_eq!(s.select(COLUMNS), vec!["Q1|1", "Q1|2"]);

        let s = selector("[{glob: ['Q?', 'Q1[!|]*']}]");
        assert_eq!(s.select(COLUMNS), vec!["Q10", "Q2", "Q1_extra"]);
    }

    #[test]
    fn test_regex_anchored_at_start() {
        let s = selector(r"[{re: 'Q1\d'}]");
        assert_eq!(s.select(COLUMNS), vec!["Q10"]);

        let s = selector(r"[{re: '1'}]");
        assert!(s.select(COLUMNS).is_empty());
    }

    #[test]
    fn test_union_is_deduplicated_in_batch_order() {
        let s = selector("[timestamp, {glob: 'Q*', re: 'time'}]");
        assert_eq!(
            s.select(COLUMNS),
            vec!["Q1|1", "Q1|2", "Q10", "Q2", "Q1_extra", "timestamp"]
        );
    }

    #[test]
    fn test_invalid_regex() {
        let entries: Vec<ColumnEntry> = serde_yaml::from_str("[{re: '('}]").unwrap();
        assert!(matches!(
            ColumnSelector::from_entries(entries),
            Err(ProcessorError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_glob_translation() {
        assert_eq!(glob_to_regex("a.b*"), r"^a\.b.*$");
        assert_eq!(glob_to_regex("[ab"), r"^\[ab$");
    }
}
