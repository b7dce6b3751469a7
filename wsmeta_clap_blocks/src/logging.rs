//! CLI config for logging.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("cannot install global subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Log message format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable, single line.
    #[default]
    Full,
    /// Human-readable, multi line.
    Pretty,
    /// Machine-parseable.
    Json,
}

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
pub struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,wsmeta_catalog=info` specifies debug logging for all modules except for the
    /// catalog, which will only display info level logging.
    ///
    /// Overridden by `-v`.
    #[clap(long = "log-filter", env = "LOG_FILTER", action)]
    pub log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'info'
    ///
    /// -vv  'debug'
    ///
    /// -vvv 'trace'
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub log_verbose_count: u8,

    /// Logs: message format
    #[clap(
        long = "log-format",
        env = "LOG_FORMAT",
        default_value_t = LogFormat::default(),
        value_enum,
        action
    )]
    pub log_format: LogFormat,
}

impl LoggingConfig {
    pub const DEFAULT_LOG_FILTER: &'static str = "warn";

    /// The filter directive in effect.
    pub fn filter_directive(&self) -> &str {
        match self.log_verbose_count {
            0 => self
                .log_filter
                .as_deref()
                .unwrap_or(Self::DEFAULT_LOG_FILTER),
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    pub fn install_global_subscriber(&self) -> Result<()> {
        let filter = EnvFilter::try_new(self.filter_directive())?;
        let registry = tracing_subscriber::registry().with(filter);
        match self.log_format {
            LogFormat::Full => registry.with(fmt::layer()).try_init()?,
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
            LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
        }
        Ok(())
    }
}
