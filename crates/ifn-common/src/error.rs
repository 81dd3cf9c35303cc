//! Error types for the shared helpers

use thiserror::Error;

/// Result type alias for common helpers
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by shared helpers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid time '{value}': expected format YYYY-MM-DDTHH:MM:SS ({reason})")]
    InvalidTime { value: String, reason: String },

    #[error("Timestamp {0} is out of range")]
    TimestampOutOfRange(i64),
}

impl CommonError {
    /// Create an invalid time error
    pub fn invalid_time(value: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidTime {
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
