//! `ifn-export rename-test` command implementation
//!
//! Applies the default renaming to a JSON list of column names, to check
//! the analytics names before a build.

use crate::error::{Result, ResultExt};
use crate::processor::DefaultRenamingProcessor;
use colored::Colorize;
use std::path::Path;

/// Renamed columns as `(original, renamed)`
pub fn rename_columns(columns: &[String], separator: &str) -> Result<Vec<(String, String)>> {
    let processor = DefaultRenamingProcessor::new(separator)?;
    let names: Vec<&str> = columns.iter().map(String::as_str).collect();
    Ok(processor.rename_list(&names)?)
}

pub fn run(file: &Path, separator: &str, verbose: bool) -> Result<()> {
    let content = std::fs::read_to_string(file).context(|| format!("Reading '{}'", file.display()))?;
    let columns: Vec<String> =
        serde_json::from_str(&content).context(|| format!("Column list '{}'", file.display()))?;

    let processor = DefaultRenamingProcessor::new(separator)?;
    for (original, renamed) in rename_columns(&columns, separator)? {
        if verbose {
            for step in processor.explain(&original) {
                println!("  {} '{}' => '{}'", step.rule.dimmed(), step.before, step.after);
            }
        }
        let arrow = if original == renamed { "=".normal() } else { "=>".green() };
        println!("'{}' {} '{}'", original, arrow, renamed);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ExportError;
    use crate::processor::ProcessorError;

    #[test]
    fn test_rename_columns() {
        let columns = vec!["weekly.Q1|1".to_string(), "participantID".to_string()];
        let renamed = rename_columns(&columns, "|").unwrap();
        assert_eq!(renamed[0].1, "Q1_1");
        assert_eq!(renamed[1].1, "global_id");
    }

    #[test]
    fn test_collision_is_reported() {
        let columns = vec!["a.Q1".to_string(), "b.Q1".to_string()];
        let err = rename_columns(&columns, "|").unwrap_err();
        assert!(matches!(
            err,
            ExportError::Processor(ProcessorError::DuplicateColumn { .. })
        ));
    }
}
