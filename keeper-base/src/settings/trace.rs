use eyre::Result;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, Registry};

/// Logging level. A "higher level" means more will be logged.
#[derive(Default, Debug, Clone, Copy, serde::Deserialize, PartialOrd, Ord, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    /// Off
    Off = 0,
    /// Error
    Error = 1,
    /// Warn
    Warn = 2,
    /// Debug
    Debug = 3,
    /// Trace
    Trace = 5,
    /// Info
    #[serde(other)]
    #[default]
    Info = 4,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}

/// Stdout log format.
#[derive(Default, Debug, Clone, Copy, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    /// Multi-line human-oriented output
    Pretty,
    /// Single-line condensed output
    Compact,
    /// One JSON object per line, for log collectors
    Json,
    /// The tracing default
    #[serde(other)]
    #[default]
    Full,
}

/// Configuration for the tracing subscribers used by the keeper jobs
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    fmt: Style,
    #[serde(default)]
    level: Level,
}

impl TracingConfig {
    /// Attempt to instantiate and register a tracing subscriber setup from
    /// settings.
    pub fn start_tracing(&self) -> Result<()> {
        let mut target_layer = Targets::new().with_default(self.level);
        if self.level < Level::Trace {
            // only show these debug and trace logs at trace level
            target_layer = target_layer.with_target("hyper", Level::Info);
            target_layer = target_layer.with_target("reqwest", Level::Info);
            target_layer = target_layer.with_target("ethers_providers", Level::Info);
        }
        let err_layer = tracing_error::ErrorLayer::default();
        let registry = Registry::default().with(target_layer).with(err_layer);

        match self.fmt {
            Style::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
            Style::Compact => registry.with(fmt::layer().compact()).try_init()?,
            Style::Json => registry.with(fmt::layer().json()).try_init()?,
            Style::Full => registry.with(fmt::layer()).try_init()?,
        }
        Ok(())
    }
}
