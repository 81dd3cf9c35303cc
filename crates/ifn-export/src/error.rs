//! Error types for ifn-export
//!
//! Every module reports its own `thiserror` enum; [`ExportError`] unifies them
//! for the commands and the binary, with messages meant for the operator.

use crate::catalog::CatalogError;
use crate::processor::ProcessorError;
use crate::profile::ProfileError;
use crate::source::SourceError;
use crate::store::StoreError;
use crate::version::{SelectorError, VersionError};
use thiserror::Error;

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, ExportError>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Time(#[from] ifn_common::CommonError),

    /// Schema inference reported conflicts and the caller did not force
    #[error("Schema has {0} problem(s). Fix the definitions or use --force to write it anyway.")]
    SchemaProblems(usize),

    /// Key separator differs from the one the raw store was created with
    #[error("Key separator mismatch: raw store uses '{stored}', profile uses '{configured}'. Keep the separator used at the first sync.")]
    SeparatorMismatch { stored: String, configured: String },

    /// Window or survey context added to a lower-level failure
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ExportError>,
    },

    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}. Check the file syntax.")]
    JsonParse(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}. Check the file syntax at the indicated line/column.")]
    YamlParse(#[from] serde_yaml::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your environment variables or profile.")]
    Config(String),
}

impl ExportError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap this error with run context (survey, window, version)
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Attach context to any error convertible into [`ExportError`]
pub trait ResultExt<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T, E: Into<ExportError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| e.into().context(context()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_context_message() {
        let err = ExportError::config("missing raw_db").context("survey weekly");
        assert_eq!(
            err.to_string(),
            "survey weekly: Configuration error: missing raw_db. Check your environment variables or profile."
        );
    }

    #[test]
    fn test_result_ext() {
        let res: std::result::Result<(), VersionError> = Err(VersionError::Parse {
            input: "x".into(),
            position: 0,
        });
        let err = res.context(|| "version of response 12".to_string()).unwrap_err();
        assert!(err.to_string().starts_with("version of response 12: "));
    }
}
