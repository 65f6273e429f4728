//! Structured logging for the controller.
//!
//! Every switch connection runs inside a `session` span carrying its session id and, once the
//! handshake completes, its datapath id, so each event can be traced back to one switch.
//! `RUST_LOG` overrides `[logging] level` when set.

use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::{Error, Result};

/// How events are rendered on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON, span fields included.
    Json,
}

/// The `[logging]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// A level (`error` through `trace`, or `off`) or any `EnvFilter` directive list.
    pub level: String,
    pub format: LogFormat,
    /// Print the thread name; session threads are named `ofp-session`.
    pub thread_names: bool,
    /// Emit an event when a session span closes, with its busy and idle time.
    pub session_events: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            thread_names: false,
            session_events: false,
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<()> {
        self.directives().map(|_| ())
    }

    fn directives(&self) -> Result<EnvFilter> {
        if self.level.parse::<LevelFilter>().is_err() && !self.level.contains('=') {
            return Err(Error::Config(format!("unknown log level {:?}", self.level)));
        }
        EnvFilter::try_new(&self.level)
            .map_err(|e| Error::Config(format!("logging.level {:?}: {}", self.level, e)))
    }

    fn filter(&self) -> Result<EnvFilter> {
        match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(_) => EnvFilter::try_from_default_env()
                .map_err(|e| Error::Config(format!("{}: {}", EnvFilter::DEFAULT_ENV, e))),
            Err(_) => self.directives(),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.session_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber. Fails if the filter does not parse or a subscriber is
/// already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = config.filter()?;
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(config.thread_names)
        .with_span_events(config.span_events());
    let fmt: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt.pretty().boxed(),
        LogFormat::Compact => fmt.compact().boxed(),
        LogFormat::Json => fmt.json().boxed(),
    };
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("cannot install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_and_directives_validate() {
        for level in ["error", "WARN", "info", "debug", "trace", "off", "ofp_firewall=debug,warn"] {
            let config = LogConfig {
                level: level.to_string(),
                ..LogConfig::default()
            };
            assert!(config.validate().is_ok(), "{}", level);
        }
        let config = LogConfig {
            level: "loud".to_string(),
            ..LogConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn format_names() {
        #[derive(Deserialize)]
        struct Doc {
            format: LogFormat,
        }
        let doc: Doc = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(doc.format, LogFormat::Json);
        assert!(toml::from_str::<Doc>("format = \"xml\"").is_err());
    }

    #[test]
    fn session_close_events_are_opt_in() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.span_events(), FmtSpan::NONE);
        let config = LogConfig {
            session_events: true,
            ..config
        };
        assert_eq!(config.span_events(), FmtSpan::CLOSE);
    }
}
