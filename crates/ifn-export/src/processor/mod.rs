//! Batch transformation pipeline
//!
//! A pipeline is an ordered list of processors, each bound to a [`Stage`]
//! and optionally to a [`VersionSelector`]. For every version group the
//! importer asks the pipeline which processors apply and runs them in order.
//!
//! ```text
//! before_casting -> default_casting -> after_casting -> default_renaming -> end
//! ```

pub mod casting;
pub mod columns;
pub mod parser;
pub mod renaming;

pub use casting::{CastRule, RuleBasedProcessor, SchemaCastingProcessor};
pub use columns::ColumnSelector;
pub use parser::{default_processors, ProcessorConfig, ProcessorContext};
pub use renaming::{DefaultRenamingProcessor, RenameRule, RenamingProcessor};

use crate::batch::Batch;
use crate::debug::Debugger;
use crate::version::{SurveyVersion, VersionSelector};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Processor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// Two columns end up with the same name after renaming
    #[error("Duplicate column '{target}' after renaming, renamed from {sources:?}. Add an exclusion or a fixed rename for one of them.")]
    DuplicateColumn { target: String, sources: Vec<String> },

    /// A regex in a rename rule or a column selector does not compile
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Processor definition in the profile is invalid
    #[error("Invalid processor definition at index {index}: {reason}")]
    InvalidDefinition { index: usize, reason: String },
}

impl ProcessorError {
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_definition(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            index,
            reason: reason.into(),
        }
    }
}

/// Position of a processor in the pipeline
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BeforeCasting,
    DefaultCasting,
    #[default]
    AfterCasting,
    DefaultRenaming,
    End,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::BeforeCasting => "before_casting",
            Stage::DefaultCasting => "default_casting",
            Stage::AfterCasting => "after_casting",
            Stage::DefaultRenaming => "default_renaming",
            Stage::End => "end",
        };
        write!(f, "{}", name)
    }
}

/// A batch transformation
pub trait Processor: fmt::Display + fmt::Debug {
    fn apply(&self, batch: Batch, trace: &Debugger) -> Result<Batch, ProcessorError>;

    /// Stage the processor runs at when its definition gives no position
    fn stage(&self) -> Stage;
}

/// Processor bound to a stage and an optional version selector
#[derive(Debug)]
pub struct ProcessorSpec {
    pub processor: Box<dyn Processor>,
    pub versions: Option<VersionSelector>,
    pub stage: Stage,
}

impl ProcessorSpec {
    /// Spec at the processor's own stage, for every version
    pub fn new(processor: Box<dyn Processor>) -> Self {
        let stage = processor.stage();
        Self {
            processor,
            versions: None,
            stage,
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_versions(mut self, versions: Option<VersionSelector>) -> Self {
        self.versions = versions;
        self
    }

    pub fn applies_to(&self, version: &SurveyVersion) -> bool {
        self.versions.as_ref().map_or(true, |s| s.is_version(version))
    }
}

impl fmt::Display for ProcessorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.processor)?;
        if let Some(versions) = &self.versions {
            write!(f, " (versions: {})", versions)?;
        }
        Ok(())
    }
}

/// Processors ordered by stage, declaration order kept inside a stage
#[derive(Debug, Default)]
pub struct Pipeline {
    specs: Vec<ProcessorSpec>,
}

impl Pipeline {
    pub fn new(mut specs: Vec<ProcessorSpec>) -> Self {
        // sort_by_key is stable
        specs.sort_by_key(|s| s.stage);
        Self { specs }
    }

    pub fn specs(&self) -> &[ProcessorSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Processors applicable to `version`, in pipeline order
    pub fn select(&self, version: &SurveyVersion) -> Vec<&dyn Processor> {
        self.specs
            .iter()
            .filter(|s| s.applies_to(version))
            .map(|s| s.processor.as_ref())
            .collect()
    }

    /// Run the processors applicable to `version` over `batch`
    pub fn apply(
        &self,
        version: &SurveyVersion,
        mut batch: Batch,
        trace: &Debugger,
    ) -> Result<Batch, ProcessorError> {
        for processor in self.select(version) {
            trace.trace(crate::debug::DebugFlag::Processors, || {
                format!("version {}: applying {}", version, processor)
            });
            batch = processor.apply(batch, trace)?;
        }
        Ok(batch)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for spec in &self.specs {
            writeln!(f, "{}", spec)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Tag(&'static str, Stage);

    impl fmt::Display for Tag {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Processor for Tag {
        fn apply(&self, batch: Batch, _trace: &Debugger) -> Result<Batch, ProcessorError> {
            Ok(batch)
        }

        fn stage(&self) -> Stage {
            self.1
        }
    }

    fn spec(name: &'static str, stage: Stage) -> ProcessorSpec {
        ProcessorSpec::new(Box::new(Tag(name, stage)))
    }

    fn names(pipeline: &Pipeline, version: &str) -> Vec<String> {
        pipeline
            .select(&version.parse().unwrap())
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::BeforeCasting < Stage::DefaultCasting);
        assert!(Stage::DefaultCasting < Stage::AfterCasting);
        assert!(Stage::AfterCasting < Stage::DefaultRenaming);
        assert!(Stage::DefaultRenaming < Stage::End);
    }

    #[test]
    fn test_pipeline_sorts_by_stage_stably() {
        let pipeline = Pipeline::new(vec![
            spec("rename", Stage::DefaultRenaming),
            spec("late_a", Stage::End),
            spec("cast", Stage::DefaultCasting),
            spec("late_b", Stage::End),
            spec("first", Stage::BeforeCasting),
        ]);
        assert_eq!(
            names(&pipeline, "1"),
            vec!["first", "cast", "rename", "late_a", "late_b"]
        );
    }

    #[test]
    fn test_select_by_version() {
        let only_v2 = spec("v2", Stage::AfterCasting).with_versions(Some("2-0:".parse().unwrap()));
        let pipeline = Pipeline::new(vec![spec("all", Stage::DefaultCasting), only_v2]);

        assert_eq!(names(&pipeline, "1-5"), vec!["all"]);
        assert_eq!(names(&pipeline, "2-1"), vec!["all", "v2"]);
    }

    #[test]
    fn test_with_stage_overrides_default() {
        let s = spec("x", Stage::AfterCasting).with_stage(Stage::End);
        assert_eq!(s.stage, Stage::End);
        assert_eq!(s.to_string(), "[end] x");
    }
}
