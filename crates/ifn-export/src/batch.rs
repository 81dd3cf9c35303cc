//! Tabular batch model
//!
//! A [`Batch`] is a set of named columns of equal length, built from the JSON
//! payloads of one version group and transformed in place by the processors
//! before it reaches the analytics writer.

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// Cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL column type able to hold this value, `None` for nulls
    pub fn sql_type(&self) -> Option<&'static str> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some("BOOLEAN"),
            Value::Int(_) => Some("INTEGER"),
            Value::Float(_) => Some("REAL"),
            Value::Text(_) => Some("TEXT"),
            Value::Timestamp(_) => Some("TIMESTAMP"),
            Value::Json(_) => Some("JSON"),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map_or(Value::Null, Value::Float),
            },
            JsonValue::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", ifn_common::time::to_iso_time(t)),
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Int(i) => SqlValue::Integer(*i),
            Value::Float(x) => SqlValue::Real(*x),
            Value::Text(s) => return Ok(ToSqlOutput::from(s.as_str())),
            Value::Timestamp(t) => SqlValue::Text(ifn_common::time::to_iso_time(t)),
            Value::Json(v) => SqlValue::Text(v.to_string()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

/// Named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

/// Column-oriented batch of rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    columns: Vec<Column>,
    rows: usize,
}

impl Batch {
    /// Build a batch from JSON objects. Columns appear in first-seen order,
    /// keys missing from a record are null. Non-object records are skipped.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a JsonValue>) -> Self {
        let mut batch = Batch::default();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in records {
            let Some(object) = record.as_object() else {
                continue;
            };
            let row = batch.rows;
            for (key, value) in object {
                let idx = match index.get(key) {
                    Some(&idx) => idx,
                    None => {
                        batch.columns.push(Column {
                            name: key.clone(),
                            values: vec![Value::Null; row],
                        });
                        index.insert(key.clone(), batch.columns.len() - 1);
                        batch.columns.len() - 1
                    },
                };
                batch.columns[idx].values.push(Value::from(value.clone()));
            }
            batch.rows += 1;
            for column in &mut batch.columns {
                if column.values.len() < batch.rows {
                    column.values.push(Value::Null);
                }
            }
        }
        batch
    }

    /// Build a batch from columns, all of the same length
    pub fn from_columns(columns: Vec<Column>) -> Self {
        let rows = columns.first().map_or(0, |c| c.values.len());
        debug_assert!(columns.iter().all(|c| c.values.len() == rows));
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Apply `f` to every value of the named column, if present
    pub fn map_column(&mut self, name: &str, f: impl FnMut(Value) -> Value) {
        if let Some(column) = self.column_mut(name) {
            let values = std::mem::take(&mut column.values);
            column.values = values.into_iter().map(f).collect();
        }
    }

    /// Rename columns. Names absent from `renames` are kept.
    pub fn rename_columns(&mut self, renames: &HashMap<String, String>) {
        for column in &mut self.columns {
            if let Some(target) = renames.get(&column.name) {
                column.name = target.clone();
            }
        }
    }

    /// Row `idx` as values in column order
    pub fn row(&self, idx: usize) -> Vec<&Value> {
        self.columns.iter().map(|c| &c.values[idx]).collect()
    }

    /// SQL type for a column: the type of its first non-null value
    pub fn sql_type(&self, name: &str) -> Option<&'static str> {
        self.column(name)?.values.iter().find_map(Value::sql_type)
    }
}
