//! Column renaming processors
//!
//! In patterns and replacements `<$>` stands for the question/response key
//! separator. Replacements use Python-style group references (`\1`).

use super::{Processor, ProcessorError, Stage};
use crate::batch::Batch;
use crate::debug::{DebugFlag, Debugger};
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

const SEPARATOR_PLACEHOLDER: &str = "<$>";

/// Columns never renamed by the default renaming
pub const DEFAULT_EXCLUDED_COLUMNS: &[&str] = &[
    "submitted",
    "language",
    "participantID",
    "engineVersion",
    "opened",
    "ID",
];

/// Renames applied after the default rules
pub const DEFAULT_RENAMED_COLUMNS: &[(&str, &str)] = &[
    ("participantID", "global_id"),
    ("submitted", "timestamp"),
    ("ID", "id"),
];

const DEFAULT_REGEX_RULES: &[(&str, &str)] = &[
    // legacy naming of matrix responses
    (r"<$>mat\.row(\d+)\.col(\d+)", r"<$>multi_row\1_col\2"),
    (r"<$>likert_(\d+)", r"<$>lk_\1"),
    ("<$>", "_"),
];

/// Convert a Python `re.sub` replacement into `regex` syntax
fn python_replacement(replace: &str) -> String {
    let mut out = String::with_capacity(replace.len());
    let mut chars = replace.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                        group.push(*d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", group));
                },
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                },
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

/// One renaming step
#[derive(Debug, Clone)]
pub enum RenameRule {
    /// Keep only the last `.` segment of the question key
    RemovePrefix { separator: String },
    /// Case-insensitive regex substitution
    Regex {
        source: String,
        pattern: Regex,
        replace: String,
    },
    /// Dictionary lookup
    Fixed(BTreeMap<String, String>),
}

impl RenameRule {
    pub fn remove_prefix(separator: impl Into<String>) -> Self {
        Self::RemovePrefix {
            separator: separator.into(),
        }
    }

    pub fn regex(separator: &str, pattern: &str, replace: &str) -> Result<Self, ProcessorError> {
        let source = pattern.replace(SEPARATOR_PLACEHOLDER, &regex::escape(separator));
        let compiled = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| ProcessorError::invalid_pattern(&source, e))?;
        let replace = python_replacement(&replace.replace(SEPARATOR_PLACEHOLDER, separator));
        Ok(Self::Regex {
            source,
            pattern: compiled,
            replace,
        })
    }

    pub fn fixed(renames: BTreeMap<String, String>) -> Self {
        Self::Fixed(renames)
    }

    pub fn apply(&self, column: &str) -> String {
        match self {
            RenameRule::RemovePrefix { separator } => {
                let (question, response) = match column.split_once(separator.as_str()) {
                    Some((q, r)) => (q, Some(r)),
                    None => (column, None),
                };
                let question = question.rsplit('.').next().unwrap_or(question);
                match response {
                    Some(r) => format!("{}{}{}", question, separator, r),
                    None => question.to_string(),
                }
            },
            RenameRule::Regex {
                pattern, replace, ..
            } => pattern.replace_all(column, replace.as_str()).into_owned(),
            RenameRule::Fixed(renames) => renames
                .get(column)
                .cloned()
                .unwrap_or_else(|| column.to_string()),
        }
    }
}

impl fmt::Display for RenameRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenameRule::RemovePrefix { .. } => write!(f, "remove_prefix"),
            RenameRule::Regex {
                source, replace, ..
            } => write!(f, "`{}`:`{}`", source, replace),
            RenameRule::Fixed(renames) => write!(f, "fixed({} names)", renames.len()),
        }
    }
}

/// One rule application, as reported by [`RenamingProcessor::explain`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameStep {
    pub rule: String,
    pub before: String,
    pub after: String,
}

/// Applies rename rules in order to every non-excluded column
#[derive(Debug, Clone)]
pub struct RenamingProcessor {
    rules: Vec<RenameRule>,
    excluded: HashSet<String>,
}

impl RenamingProcessor {
    pub fn new(rules: Vec<RenameRule>, excluded: impl IntoIterator<Item = String>) -> Self {
        Self {
            rules,
            excluded: excluded.into_iter().collect(),
        }
    }

    fn rename_one(&self, column: &str) -> String {
        if self.excluded.contains(column) {
            return column.to_string();
        }
        self.rules
            .iter()
            .fold(column.to_string(), |name, rule| rule.apply(&name))
    }

    /// Rule by rule trace for one column
    pub fn explain(&self, column: &str) -> Vec<RenameStep> {
        if self.excluded.contains(column) {
            return Vec::new();
        }
        let mut name = column.to_string();
        let mut steps = Vec::new();
        for rule in &self.rules {
            let after = rule.apply(&name);
            steps.push(RenameStep {
                rule: rule.to_string(),
                before: std::mem::replace(&mut name, after.clone()),
                after,
            });
        }
        steps
    }

    /// New name of every column. Fails when two columns get the same name.
    pub fn rename_list(&self, columns: &[&str]) -> Result<Vec<(String, String)>, ProcessorError> {
        let renamed: Vec<(String, String)> = columns
            .iter()
            .map(|c| (c.to_string(), self.rename_one(c)))
            .collect();
        check_unique(&renamed)?;
        Ok(renamed)
    }
}

/// SQLite column names are case-insensitive, so are the targets here
fn check_unique(renamed: &[(String, String)]) -> Result<(), ProcessorError> {
    let mut targets: BTreeMap<String, (&str, Vec<String>)> = BTreeMap::new();
    for (source, target) in renamed {
        targets
            .entry(target.to_lowercase())
            .or_insert_with(|| (target.as_str(), Vec::new()))
            .1
            .push(source.clone());
    }
    match targets.into_values().find(|(_, sources)| sources.len() > 1) {
        Some((target, sources)) => Err(ProcessorError::DuplicateColumn {
            target: target.to_string(),
            sources,
        }),
        None => Ok(()),
    }
}

fn apply_renames(
    batch: &mut Batch,
    renamed: Vec<(String, String)>,
    trace: &Debugger,
) {
    let renames: HashMap<String, String> = renamed
        .into_iter()
        .filter(|(from, to)| from != to)
        .collect();
    trace.trace(DebugFlag::Processors, || {
        format!("renaming {} column(s)", renames.len())
    });
    batch.rename_columns(&renames);
}

impl Processor for RenamingProcessor {
    fn apply(&self, mut batch: Batch, trace: &Debugger) -> Result<Batch, ProcessorError> {
        let renamed = self.rename_list(&batch.column_names())?;
        apply_renames(&mut batch, renamed, trace);
        Ok(batch)
    }

    fn stage(&self) -> Stage {
        Stage::End
    }
}

impl fmt::Display for RenamingProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<String> = self.rules.iter().map(|r| r.to_string()).collect();
        let mut excluded: Vec<&String> = self.excluded.iter().collect();
        excluded.sort();
        write!(f, "rename<rules: {}, excluded: {:?}>", rules.join(","), excluded)
    }
}

/// Standard renaming of survey columns to analytics names
#[derive(Debug, Clone)]
pub struct DefaultRenamingProcessor {
    inner: RenamingProcessor,
    defaults: BTreeMap<String, String>,
}

impl DefaultRenamingProcessor {
    pub fn new(separator: &str) -> Result<Self, ProcessorError> {
        let mut rules = vec![RenameRule::remove_prefix(separator)];
        for (pattern, replace) in DEFAULT_REGEX_RULES {
            rules.push(RenameRule::regex(separator, pattern, replace)?);
        }
        Ok(Self {
            inner: RenamingProcessor::new(
                rules,
                DEFAULT_EXCLUDED_COLUMNS.iter().map(|c| c.to_string()),
            ),
            defaults: DEFAULT_RENAMED_COLUMNS
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        })
    }

    pub fn explain(&self, column: &str) -> Vec<RenameStep> {
        let mut steps = self.inner.explain(column);
        if let Some(target) = self.defaults.get(column) {
            steps.push(RenameStep {
                rule: "default".to_string(),
                before: column.to_string(),
                after: target.clone(),
            });
        }
        steps
    }

    pub fn rename_list(&self, columns: &[&str]) -> Result<Vec<(String, String)>, ProcessorError> {
        let renamed: Vec<(String, String)> = self
            .inner
            .rename_list(columns)?
            .into_iter()
            .map(|(from, to)| {
                let to = self.defaults.get(&from).cloned().unwrap_or(to);
                (from, to)
            })
            .collect();
        check_unique(&renamed)?;
        Ok(renamed)
    }
}

impl Processor for DefaultRenamingProcessor {
    fn apply(&self, mut batch: Batch, trace: &Debugger) -> Result<Batch, ProcessorError> {
        let renamed = self.rename_list(&batch.column_names())?;
        apply_renames(&mut batch, renamed, trace);
        Ok(batch)
    }

    fn stage(&self) -> Stage {
        Stage::DefaultRenaming
    }
}

impl fmt::Display for DefaultRenamingProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<String> = self.inner.rules.iter().map(|r| r.to_string()).collect();
        write!(f, "default_renaming<{}>", rules.join(","))
    }
}
