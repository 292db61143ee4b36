//! tracing subscriber setup
//!
//! `RUST_LOG` wins over the `[log]` section, which wins over `info`.

use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// `[log]` table of natgate.toml
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LogConfig {
    /// Configured level, or None if it is not a tracing level name
    pub fn level_filter(&self) -> Option<LevelFilter> {
        self.level.parse().ok()
    }
}

fn env_filter(config: Option<&LogConfig>) -> EnvFilter {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return EnvFilter::from_default_env();
    }
    let level = config
        .and_then(LogConfig::level_filter)
        .unwrap_or(LevelFilter::INFO);
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy("")
}

fn fmt_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Pretty => fmt::layer().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    }
}

/// Install the global subscriber.
///
/// Only the first call takes effect, so `config validate` can log before a
/// config file exists.
pub fn init_logging(config: Option<&LogConfig>) {
    let format = config.map(|c| c.format).unwrap_or_default();
    let _ = tracing_subscriber::registry()
        .with(fmt_layer(format))
        .with(env_filter(config))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_level(level: &str) -> LogConfig {
        LogConfig {
            level: level.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_level_filter() {
        assert_eq!(with_level("debug").level_filter(), Some(LevelFilter::DEBUG));
        assert_eq!(with_level("WARN").level_filter(), Some(LevelFilter::WARN));
        assert_eq!(with_level("off").level_filter(), Some(LevelFilter::OFF));
        assert_eq!(with_level("verbose").level_filter(), None);
    }

    #[test]
    fn test_log_table() {
        let config: LogConfig = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(config, LogConfig {
            level: "info".into(),
            format: LogFormat::Json
        });
        assert!(toml::from_str::<LogConfig>("format = \"syslog\"").is_err());
    }
}
