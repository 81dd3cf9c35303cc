//! Logging configuration and initialization
//!
//! Every binary of the workspace logs through `tracing`. Command output
//! (tables, YAML) goes to stdout; diagnostics go through the subscriber set
//! up here, which writes to stderr, to a daily rolling file, or both.
//!
//! Use structured fields rather than formatted messages:
//!
//! ```rust
//! use tracing::info;
//!
//! let survey = "weekly";
//! info!(survey = %survey, inserted = 42, "Window synchronized");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ifn_common::logging::{init_logging, LogConfig, LogLevel};
//!
//! let config = LogConfig::builder().level(LogLevel::Debug).build();
//! let config = config.merge_env().unwrap();
//! init_logging(&config).unwrap();
//! ```

use anyhow::{Context, Result};
use serde::de::{value::StrDeserializer, DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Minimum level of the records kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Where records are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard error
    #[default]
    #[serde(alias = "stderr")]
    Console,
    /// Daily rolling file in `log_dir`
    File,
    #[serde(alias = "all")]
    Both,
}

impl LogOutput {
    fn to_stderr(self) -> bool {
        self != LogOutput::File
    }

    fn to_file(self) -> bool {
        self != LogOutput::Console
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    #[serde(alias = "pretty")]
    Text,
    Json,
}

/// Parse a setting value with the serde names of `T`, case-insensitively
fn parse_setting<T: DeserializeOwned>(name: &str, value: &str) -> Result<T> {
    let value = value.trim().to_lowercase();
    let deserializer: StrDeserializer<'_, serde::de::value::Error> = value.as_str().into_deserializer();
    T::deserialize(deserializer).with_context(|| format!("Invalid {} '{}'", name, value))
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,

    /// Directory of the rolling files
    pub log_dir: PathBuf,

    /// Rolling file name prefix ("ifn-export" -> "ifn-export.2024-01-18")
    pub log_file_prefix: String,

    /// Extra directives, e.g. "rusqlite=warn,ifn_export::exporter=debug"
    pub filter_directives: Option<String>,

    /// Source file and line in every record
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "ifn".to_string(),
            filter_directives: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    /// Apply the `LOG_*` environment variables on top of this configuration:
    /// `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`, `LOG_FILE_PREFIX`,
    /// `LOG_FILTER` and `LOG_INCLUDE_LOCATION`.
    pub fn merge_env(self) -> Result<Self> {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    fn merge_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = var("LOG_LEVEL") {
            self.level = parse_setting("log level", &value)?;
        }
        if let Some(value) = var("LOG_OUTPUT") {
            self.output = parse_setting("log output", &value)?;
        }
        if let Some(value) = var("LOG_FORMAT") {
            self.format = parse_setting("log format", &value)?;
        }
        if let Some(value) = var("LOG_DIR") {
            self.log_dir = value.into();
        }
        if let Some(value) = var("LOG_FILE_PREFIX") {
            self.log_file_prefix = value;
        }
        if let Some(value) = var("LOG_FILTER") {
            self.filter_directives = Some(value);
        }
        if let Some(value) = var("LOG_INCLUDE_LOCATION") {
            self.include_location = matches!(value.trim(), "1" | "true" | "yes");
        }
        Ok(self)
    }

    /// `RUST_LOG` first, then the level, then the extra directives
    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(Level::from(self.level).into());
        let directives = self.filter_directives.as_deref().unwrap_or_default();
        for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let directive = directive
                .parse()
                .with_context(|| format!("Invalid log filter directive '{}'", directive))?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(self, level: LogLevel) -> Self {
        self.with(|c| c.level = level)
    }

    pub fn output(self, output: LogOutput) -> Self {
        self.with(|c| c.output = output)
    }

    pub fn format(self, format: LogFormat) -> Self {
        self.with(|c| c.format = format)
    }

    pub fn log_dir(self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.with(|c| c.log_dir = dir)
    }

    pub fn log_file_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.with(|c| c.log_file_prefix = prefix)
    }

    pub fn filter_directives(self, directives: impl Into<String>) -> Self {
        let directives = directives.into();
        self.with(|c| c.filter_directives = Some(directives))
    }

    pub fn include_location(self, include: bool) -> Self {
        self.with(|c| c.include_location = include)
    }

    pub fn build(self) -> LogConfig {
        self.config
    }

    fn with(mut self, set: impl FnOnce(&mut LogConfig)) -> Self {
        set(&mut self.config);
        self
    }
}

type SinkLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn sink<W>(config: &LogConfig, writer: W, ansi: bool) -> SinkLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(FmtSpan::CLOSE);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.boxed(),
    }
}

/// Install the global subscriber. Fails when one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let mut sinks: Vec<SinkLayer> = Vec::new();

    if config.output.to_stderr() {
        sinks.push(sink(config, std::io::stderr, true));
    }
    if config.output.to_file() {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("Unable to create log directory '{}'", config.log_dir.display()))?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // flushed on drop, so it lives as long as the process
        std::mem::forget(guard);
        sinks.push(sink(config, writer, false));
    }

    tracing_subscriber::registry()
        .with(sinks)
        .with(config.env_filter()?)
        .try_init()
        .context("A global logger is already installed")
}
