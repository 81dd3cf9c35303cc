//! Processor definitions from profiles
//!
//! ```yaml
//! processors:
//!   - default_casting
//!   - name: to_bool
//!     columns: [{glob: "Q1|*"}]
//!     version: "2-0:"
//!   - name: rename_regex
//!     pattern: "^Q(\\d+)"
//!     replace: "question_\\1"
//!     position: end
//!   - default_renaming
//! ```

use super::columns::ColumnEntry;
use super::{
    CastRule, ColumnSelector, DefaultRenamingProcessor, Pipeline, Processor, ProcessorError,
    ProcessorSpec, RenameRule, RenamingProcessor, RuleBasedProcessor, SchemaCastingProcessor,
    Stage,
};
use crate::schema::ColumnSchema;
use crate::version::selector::SelectorSpec;
use crate::version::VersionSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_CASTING: &str = "default_casting";
pub const DEFAULT_RENAMING: &str = "default_renaming";

/// Processor list used when a profile does not define one
pub fn default_processors() -> Vec<ProcessorConfig> {
    vec![
        ProcessorConfig::Named(DEFAULT_CASTING.to_string()),
        ProcessorConfig::Named(DEFAULT_RENAMING.to_string()),
    ]
}

/// Rename rule of a `rename` processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenameRuleConfig {
    RemovePrefix,
    Regex { pattern: String, replace: String },
    Fixed { renames: BTreeMap<String, String> },
}

/// Processor entry, a default processor name or a full definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessorConfig {
    Named(String),
    Custom(CustomProcessorConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomProcessorConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<SelectorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Stage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renames: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<RenameRuleConfig>>,
}

/// What processors need from the run to be built
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    pub schema: Arc<ColumnSchema>,
    pub separator: String,
}

impl ProcessorContext {
    fn default_processor(&self, name: &str, index: usize) -> Result<Box<dyn Processor>, ProcessorError> {
        match name {
            DEFAULT_CASTING => Ok(Box::new(SchemaCastingProcessor::new(self.schema.clone()))),
            DEFAULT_RENAMING => Ok(Box::new(DefaultRenamingProcessor::new(&self.separator)?)),
            other => Err(ProcessorError::invalid_definition(
                index,
                format!("unknown processor name '{}'", other),
            )),
        }
    }

    fn rename_rule(&self, rule: &RenameRuleConfig) -> Result<RenameRule, ProcessorError> {
        Ok(match rule {
            RenameRuleConfig::RemovePrefix => RenameRule::remove_prefix(&self.separator),
            RenameRuleConfig::Regex { pattern, replace } => {
                RenameRule::regex(&self.separator, pattern, replace)?
            },
            RenameRuleConfig::Fixed { renames } => RenameRule::fixed(renames.clone()),
        })
    }

    fn custom_processor(
        &self,
        config: &CustomProcessorConfig,
        index: usize,
    ) -> Result<Box<dyn Processor>, ProcessorError> {
        let missing = |field: &str| {
            ProcessorError::invalid_definition(
                index,
                format!("'{}' requires '{}'", config.name, field),
            )
        };
        let cast = |rule: CastRule| -> Result<Box<dyn Processor>, ProcessorError> {
            let entries = config.columns.clone().ok_or_else(|| missing("columns"))?;
            Ok(Box::new(RuleBasedProcessor::new(
                rule,
                ColumnSelector::from_entries(entries)?,
            )))
        };
        let rename = |rules: Vec<RenameRule>| -> Box<dyn Processor> {
            Box::new(RenamingProcessor::new(rules, config.excluded.clone()))
        };

        match config.name.as_str() {
            "to_bool" => cast(CastRule::Boolean),
            "to_date" => cast(CastRule::Date),
            "unjson" => cast(CastRule::UnJson),
            "rename_prefix" => Ok(rename(vec![RenameRule::remove_prefix(&self.separator)])),
            "rename_regex" => {
                let pattern = config.pattern.as_deref().ok_or_else(|| missing("pattern"))?;
                let replace = config.replace.as_deref().ok_or_else(|| missing("replace"))?;
                Ok(rename(vec![RenameRule::regex(&self.separator, pattern, replace)?]))
            },
            "rename_fixed" => {
                let renames = config.renames.clone().ok_or_else(|| missing("renames"))?;
                Ok(rename(vec![RenameRule::fixed(renames)]))
            },
            "rename" => {
                let rules = config
                    .rules
                    .as_ref()
                    .ok_or_else(|| missing("rules"))?
                    .iter()
                    .map(|r| self.rename_rule(r))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rename(rules))
            },
            other => self.default_processor(other, index),
        }
    }

    /// Check definitions without a schema: names, required fields,
    /// patterns and version selectors
    pub fn validate(configs: &[ProcessorConfig], separator: &str) -> Result<(), ProcessorError> {
        let context = ProcessorContext {
            schema: Arc::default(),
            separator: separator.to_string(),
        };
        context.build_pipeline(configs).map(|_| ())
    }

    /// Build the pipeline from profile definitions
    pub fn build_pipeline(&self, configs: &[ProcessorConfig]) -> Result<Pipeline, ProcessorError> {
        let mut specs = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let spec = match config {
                ProcessorConfig::Named(name) => {
                    ProcessorSpec::new(self.default_processor(name, index)?)
                },
                ProcessorConfig::Custom(custom) => {
                    let processor = self.custom_processor(custom, index)?;
                    let versions = custom
                        .version
                        .as_ref()
                        .map(VersionSelector::from_spec)
                        .transpose()
                        .map_err(|e| ProcessorError::invalid_definition(index, e.to_string()))?;
                    let mut spec = ProcessorSpec::new(processor).with_versions(versions);
                    if let Some(stage) = custom.position {
                        spec = spec.with_stage(stage);
                    }
                    spec
                },
            };
            specs.push(spec);
        }
        Ok(Pipeline::new(specs))
    }
}
