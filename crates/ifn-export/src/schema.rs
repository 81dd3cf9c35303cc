//! Column schema inference
//!
//! The analytics table gets one column per question and per typed response
//! of the survey definitions. [`SchemaBuilder`] folds the definitions of the
//! selected versions, oldest first, into a frozen [`ColumnSchema`].

use crate::version::{SurveyVersion, VersionSelector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Declared value kind of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Date,
    Json,
    Text,
    Int,
}

impl ValueKind {
    /// Kind of a question column from the question type
    pub fn from_question_type(question_type: &str) -> Self {
        match question_type.to_lowercase().as_str() {
            "date" => ValueKind::Date,
            "numeric" | "number" | "int" => ValueKind::Int,
            "json" | "matrix" | "responses" => ValueKind::Json,
            "bool" | "boolean" => ValueKind::Bool,
            _ => ValueKind::Text,
        }
    }

    /// Kind of a response column, `None` when the response has no column
    fn from_response_type(question_type: &str, response_type: &str) -> Option<Self> {
        match response_type.to_lowercase().as_str() {
            "option" if question_type.eq_ignore_ascii_case("multiple_choice") => {
                Some(ValueKind::Bool)
            },
            "input" | "text" => Some(ValueKind::Text),
            "date" => Some(ValueKind::Date),
            "numeric" | "number" => Some(ValueKind::Int),
            "json" => Some(ValueKind::Json),
            "bool" => Some(ValueKind::Bool),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Date => "date",
            ValueKind::Json => "json",
            ValueKind::Text => "text",
            ValueKind::Int => "int",
        };
        write!(f, "{}", name)
    }
}

/// Survey definition document as stored in `survey_info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyDefinition {
    #[serde(rename = "versionId", default)]
    pub version_id: String,
    #[serde(default)]
    pub questions: Vec<QuestionDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDef {
    pub key: String,
    #[serde(rename = "type", default)]
    pub question_type: String,
    #[serde(default)]
    pub responses: Vec<ResponseDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDef {
    pub key: String,
    #[serde(rename = "type", default)]
    pub response_type: String,
}

/// A column whose kind changed between two versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaProblem {
    pub column: String,
    pub previous: ValueKind,
    pub current: ValueKind,
    /// Version introducing the new kind, `None` when merging with a schema file
    pub version: Option<SurveyVersion>,
}

impl fmt::Display for SchemaProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "column '{}' changed from {} to {}",
            self.column, self.previous, self.current
        )?;
        if let Some(version) = &self.version {
            write!(f, " in version {}", version)?;
        }
        Ok(())
    }
}

/// Frozen mapping column -> kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSchema {
    columns: BTreeMap<String, ValueKind>,
}

impl ColumnSchema {
    pub fn new(columns: BTreeMap<String, ValueKind>) -> Self {
        Self { columns }
    }

    /// Columns always cast as dates, whatever the definitions say
    pub fn default_overrides() -> BTreeMap<String, ValueKind> {
        BTreeMap::from([
            ("opened".to_string(), ValueKind::Date),
            ("submitted".to_string(), ValueKind::Date),
        ])
    }

    /// New schema where `overrides` win over inferred kinds
    pub fn with_overrides(self, overrides: &BTreeMap<String, ValueKind>) -> Self {
        let mut columns = self.columns;
        for (name, kind) in overrides {
            columns.insert(name.clone(), *kind);
        }
        Self { columns }
    }

    /// Merge with a previously written schema. Kinds of `previous` are kept,
    /// so manual edits survive; kind changes are reported.
    pub fn merge_previous(self, previous: &ColumnSchema) -> (Self, Vec<SchemaProblem>) {
        let mut problems = Vec::new();
        let mut columns = previous.columns.clone();
        for (name, kind) in self.columns {
            match columns.get(&name) {
                Some(old) if *old != kind => problems.push(SchemaProblem {
                    column: name,
                    previous: *old,
                    current: kind,
                    version: None,
                }),
                Some(_) => {},
                None => {
                    columns.insert(name, kind);
                },
            }
        }
        (Self { columns }, problems)
    }

    pub fn get(&self, column: &str) -> Option<ValueKind> {
        self.columns.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ValueKind)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Column names declared with `kind`, in name order
    pub fn columns_of(&self, kind: ValueKind) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Inferred schema and the conflicts met while folding
#[derive(Debug, Clone, Default)]
pub struct SchemaOutcome {
    pub schema: ColumnSchema,
    pub problems: Vec<SchemaProblem>,
}

/// Folds survey definitions into a [`ColumnSchema`]
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    separator: String,
    selector: Option<VersionSelector>,
}

impl SchemaBuilder {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            selector: None,
        }
    }

    pub fn with_selector(mut self, selector: Option<VersionSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn build(&self, mut definitions: Vec<(SurveyVersion, SurveyDefinition)>) -> SchemaOutcome {
        definitions.sort_by(|a, b| a.0.cmp(&b.0));

        let mut columns: BTreeMap<String, ValueKind> = BTreeMap::new();
        let mut problems = Vec::new();

        for (version, definition) in &definitions {
            if let Some(selector) = &self.selector {
                if !selector.is_version(version) {
                    debug!(version = %version, "Survey version skipped by selector");
                    continue;
                }
            }
            for (column, kind) in self.definition_columns(definition) {
                if let Some(previous) = columns.insert(column.clone(), kind) {
                    if previous != kind {
                        problems.push(SchemaProblem {
                            column,
                            previous,
                            current: kind,
                            version: Some(version.clone()),
                        });
                    }
                }
            }
        }

        SchemaOutcome {
            schema: ColumnSchema::new(columns),
            problems,
        }
    }

    fn definition_columns(&self, definition: &SurveyDefinition) -> Vec<(String, ValueKind)> {
        let mut out = Vec::new();
        for question in &definition.questions {
            out.push((
                question.key.clone(),
                ValueKind::from_question_type(&question.question_type),
            ));
            for response in &question.responses {
                if let Some(kind) =
                    ValueKind::from_response_type(&question.question_type, &response.response_type)
                {
                    out.push((
                        format!("{}{}{}", question.key, self.separator, response.key),
                        kind,
                    ));
                }
            }
        }
        out
    }
}
