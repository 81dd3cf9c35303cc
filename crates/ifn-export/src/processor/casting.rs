//! Value casting processors

use super::{ColumnSelector, Processor, ProcessorError, Stage};
use crate::batch::{Batch, Value};
use crate::debug::{DebugFlag, Debugger};
use crate::schema::{ColumnSchema, ValueKind};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Cast a value to a tri-state boolean.
///
/// Returns `None` when the value is not a recognized boolean representation.
pub fn to_bool(value: &Value) -> Option<Value> {
    match value {
        Value::Null => Some(Value::Null),
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::Int(0) => Some(Value::Bool(false)),
        Value::Int(1) => Some(Value::Bool(true)),
        Value::Float(x) if *x == 0.0 => Some(Value::Bool(false)),
        Value::Float(x) if *x == 1.0 => Some(Value::Bool(true)),
        Value::Text(s) => match s.trim().to_lowercase().as_str() {
            "" => Some(Value::Null),
            "0" | "false" => Some(Value::Bool(false)),
            "1" | "true" => Some(Value::Bool(true)),
            _ => None,
        },
        _ => None,
    }
}

/// Cast epoch seconds to a timestamp, null when not a number of seconds
pub fn to_date(value: &Value) -> Value {
    let seconds = match value {
        Value::Timestamp(_) => return value.clone(),
        Value::Int(i) => Some(*i),
        Value::Float(x) if x.is_finite() => Some(x.trunc() as i64),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|x| x.is_finite())
                    .map(|x| x.trunc() as i64)
            })
        },
        _ => None,
    };
    seconds
        .and_then(|s| ifn_common::time::from_epoch(s).ok())
        .map_or(Value::Null, Value::Timestamp)
}

fn item_keys(object: &serde_json::Map<String, JsonValue>) -> Option<String> {
    let items = object.get("items")?.as_array()?;
    let keys: Vec<String> = items
        .iter()
        .filter_map(|item| match item.get("key")? {
            JsonValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .collect();
    Some(keys.join(","))
}

/// Replace a JSON response object by the comma-joined keys of its items.
/// Objects without `items` and non-JSON text are left unchanged.
pub fn unjson(value: Value) -> Value {
    match value {
        Value::Json(JsonValue::Object(ref object)) => {
            item_keys(object).map_or(value, Value::Text)
        },
        Value::Text(ref text) if !text.trim().is_empty() => {
            match serde_json::from_str::<JsonValue>(text) {
                Ok(JsonValue::Object(object)) => item_keys(&object).map_or(value, Value::Text),
                Ok(_) => value,
                Err(e) => {
                    warn!(error = %e, "Unable to parse JSON response value");
                    value
                },
            }
        },
        other => other,
    }
}

/// A cast applied to a list of columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastRule {
    Boolean,
    Date,
    UnJson,
}

impl CastRule {
    /// Apply to the listed columns present in the batch
    pub fn apply(&self, batch: &mut Batch, columns: &[String]) {
        for column in columns {
            match self {
                CastRule::Boolean => {
                    let mut invalid = 0usize;
                    batch.map_column(column, |v| {
                        to_bool(&v).unwrap_or_else(|| {
                            invalid += 1;
                            Value::Null
                        })
                    });
                    if invalid > 0 {
                        warn!(column = %column, invalid, "Values not castable to boolean set to null");
                    }
                },
                CastRule::Date => batch.map_column(column, |v| to_date(&v)),
                CastRule::UnJson => batch.map_column(column, unjson),
            }
        }
    }
}

impl fmt::Display for CastRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CastRule::Boolean => "to_bool",
            CastRule::Date => "to_date",
            CastRule::UnJson => "unjson",
        };
        write!(f, "{}", name)
    }
}

/// Casts every column according to its declared kind:
/// booleans first, then JSON responses, then dates.
#[derive(Debug, Clone)]
pub struct SchemaCastingProcessor {
    bool_columns: Vec<String>,
    json_columns: Vec<String>,
    date_columns: Vec<String>,
}

impl SchemaCastingProcessor {
    pub fn new(schema: Arc<ColumnSchema>) -> Self {
        Self {
            bool_columns: schema.columns_of(ValueKind::Bool),
            json_columns: schema.columns_of(ValueKind::Json),
            date_columns: schema.columns_of(ValueKind::Date),
        }
    }
}

impl Processor for SchemaCastingProcessor {
    fn apply(&self, mut batch: Batch, trace: &Debugger) -> Result<Batch, ProcessorError> {
        for (rule, columns) in [
            (CastRule::Boolean, &self.bool_columns),
            (CastRule::UnJson, &self.json_columns),
            (CastRule::Date, &self.date_columns),
        ] {
            trace.trace(DebugFlag::Processors, || {
                let present = columns.iter().filter(|c| batch.has_column(c)).count();
                format!("{}: {} column(s) present", rule, present)
            });
            rule.apply(&mut batch, columns);
        }
        Ok(batch)
    }

    fn stage(&self) -> Stage {
        Stage::DefaultCasting
    }
}

impl fmt::Display for SchemaCastingProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "schema_casting<bool:{}, json:{}, date:{}>",
            self.bool_columns.len(),
            self.json_columns.len(),
            self.date_columns.len()
        )
    }
}

/// Applies one cast rule to the columns picked by a selector
#[derive(Debug, Clone)]
pub struct RuleBasedProcessor {
    rule: CastRule,
    columns: ColumnSelector,
}

impl RuleBasedProcessor {
    pub fn new(rule: CastRule, columns: ColumnSelector) -> Self {
        Self { rule, columns }
    }
}

impl Processor for RuleBasedProcessor {
    fn apply(&self, mut batch: Batch, trace: &Debugger) -> Result<Batch, ProcessorError> {
        let selected: Vec<String> = self
            .columns
            .select(&batch.column_names())
            .into_iter()
            .map(String::from)
            .collect();
        trace.trace(DebugFlag::Processors, || {
            format!("{}: columns {:?}", self.rule, selected)
        });
        self.rule.apply(&mut batch, &selected);
        Ok(batch)
    }

    fn stage(&self) -> Stage {
        Stage::AfterCasting
    }
}

impl fmt::Display for RuleBasedProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.rule, self.columns)
    }
}
