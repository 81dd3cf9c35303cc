//! Debug flags for analytics builds
//!
//! Flags only raise the verbosity of specific steps; they never change what
//! gets written.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugFlag {
    /// Analytics writer statements
    Query,
    /// Raw store queries
    QuerySource,
    /// Payloads of loaded records
    Json,
    /// Version grouping
    Version,
    /// Processor application
    Processors,
    /// Resolved schema
    Schema,
}

impl FromStr for DebugFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "query" => Ok(DebugFlag::Query),
            "query_source" => Ok(DebugFlag::QuerySource),
            "json" => Ok(DebugFlag::Json),
            "version" => Ok(DebugFlag::Version),
            "processors" => Ok(DebugFlag::Processors),
            "schema" => Ok(DebugFlag::Schema),
            other => Err(format!("unknown debug flag '{}'", other)),
        }
    }
}

impl fmt::Display for DebugFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebugFlag::Query => "query",
            DebugFlag::QuerySource => "query_source",
            DebugFlag::Json => "json",
            DebugFlag::Version => "version",
            DebugFlag::Processors => "processors",
            DebugFlag::Schema => "schema",
        };
        write!(f, "{}", name)
    }
}

/// Set of enabled debug flags, passed down to processors and stores
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Debugger {
    flags: BTreeSet<DebugFlag>,
}

impl Debugger {
    pub fn new(flags: impl IntoIterator<Item = DebugFlag>) -> Self {
        Self {
            flags: flags.into_iter().collect(),
        }
    }

    pub fn enabled(&self, flag: DebugFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn flags(&self) -> impl Iterator<Item = DebugFlag> + '_ {
        self.flags.iter().copied()
    }

    /// Emit `message` at info level when `flag` is on
    pub fn trace(&self, flag: DebugFlag, message: impl FnOnce() -> String) {
        if self.enabled(flag) {
            tracing::info!(debug = %flag, "{}", message());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        assert_eq!("query_source".parse::<DebugFlag>().unwrap(), DebugFlag::QuerySource);
        assert_eq!(" Processors".parse::<DebugFlag>().unwrap(), DebugFlag::Processors);
        assert!("sql".parse::<DebugFlag>().is_err());
    }

    #[test]
    fn test_trace_only_when_enabled() {
        let debugger = Debugger::new([DebugFlag::Json]);
        let mut called = false;
        debugger.trace(DebugFlag::Query, || {
            called = true;
            String::new()
        });
        assert!(!called);
        assert!(debugger.enabled(DebugFlag::Json));
    }
}
