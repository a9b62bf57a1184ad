use std::fmt::{self, Debug, Display};
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Environment variable read by [`LogConfig::from_env`].
pub const LOG_LEVEL_ENV: &str = "PUBSUB_DEMO_LOG";

/// How much the client logs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Nothing is logged.
    #[default]
    Disabled,

    /// Failures only.
    Error,

    /// Failures and state transitions.
    Debug,

    /// Everything, including every operation entry with its arguments.
    Trace,
}

impl LogLevel {
    /// The matching `tracing` filter.
    #[must_use]
    pub const fn as_filter(self) -> LevelFilter {
        match self {
            Self::Disabled => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Error => write!(f, "error"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

/// Returned when a string does not name a [`LogLevel`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown log level {0:?} - expected one of disabled, error, debug, trace")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        [Self::Disabled, Self::Error, Self::Debug, Self::Trace]
            .into_iter()
            .find(|level| s.eq_ignore_ascii_case(&level.to_string()))
            .ok_or_else(|| ParseLogLevelError(s.to_string()))
    }
}

/// A byte sink shared between clones, for redirecting log output.
#[derive(Clone)]
pub struct SharedWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl SharedWriter {
    /// Wraps any writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }
}

impl Debug for SharedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedWriter")
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

/// An in-memory log sink. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct LogBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    /// Whether any line written so far contains `text`.
    #[must_use]
    pub fn contains(&self, text: &str) -> bool {
        self.contents().contains(text)
    }

    /// Discards everything written so far.
    pub fn clear(&self) {
        self.bytes.lock().clear();
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Where log lines go.
#[derive(Clone, Debug, Default)]
pub enum LogOutput {
    /// Standard error.
    #[default]
    Stderr,

    /// Standard output.
    Stdout,

    /// Any other byte sink.
    Writer(SharedWriter),
}

impl From<LogBuffer> for LogOutput {
    fn from(buffer: LogBuffer) -> Self {
        Self::Writer(SharedWriter::new(buffer))
    }
}

/// Logging configuration for a client.
#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    /// Maximum level logged.
    pub level: LogLevel,

    /// Destination of log lines.
    pub output: LogOutput,
}

impl LogConfig {
    /// Sets the level.
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the output.
    #[must_use]
    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Default configuration with the level taken from [`LOG_LEVEL_ENV`], if set.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is set to something other than a level name.
    pub fn from_env() -> Result<Self, ParseLogLevelError> {
        match std::env::var(LOG_LEVEL_ENV) {
            Ok(value) => Ok(Self::default().with_level(value.parse()?)),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Per-client log sink.
///
/// Holds its own `tracing` dispatcher so several clients in one process can log
/// at different levels to different places without touching the global
/// subscriber.
#[derive(Clone, Debug)]
pub struct Logger {
    dispatch: Dispatch,
    level: LogLevel,
}

impl Logger {
    /// Builds a logger from its configuration.
    #[must_use]
    pub fn new(config: &LogConfig) -> Self {
        let writer = match &config.output {
            LogOutput::Stderr => BoxMakeWriter::new(io::stderr),
            LogOutput::Stdout => BoxMakeWriter::new(io::stdout),
            LogOutput::Writer(writer) => {
                let writer = writer.clone();
                BoxMakeWriter::new(move || writer.clone())
            }
        };

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(config.level.as_filter())
            .with_ansi(false)
            .with_target(false)
            .with_writer(writer)
            .finish();

        Self {
            dispatch: Dispatch::new(subscriber),
            level: config.level,
        }
    }

    /// A logger that drops everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(&LogConfig::default())
    }

    /// The configured level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }

    /// The dispatcher futures are instrumented with.
    #[must_use]
    pub const fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Runs `f` with this logger as the current dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;
    use tracing::{debug, error, trace};

    #[test]
    fn test_parse_level() {
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!(" TRACE ".parse::<LogLevel>(), Ok(LogLevel::Trace));
        assert_eq!("Disabled".parse::<LogLevel>(), Ok(LogLevel::Disabled));
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_level_serde() {
        assert_eq!(serde_json::to_string(&LogLevel::Error).unwrap(), "\"error\"");

        let level: LogLevel = serde_json::from_str("\"trace\"").unwrap();
        assert_eq!(level, LogLevel::Trace);
    }

    #[test]
    fn test_level_filters_output() {
        let buffer = LogBuffer::new();
        let logger = Logger::new(
            &LogConfig::default()
                .with_level(LogLevel::Debug)
                .with_output(buffer.clone().into()),
        );

        logger.in_scope(|| {
            error!("first line");
            debug!("second line");
            trace!("hidden line");
        });

        let contents = buffer.contents();
        assert!(contents.contains("ERROR"));
        assert!(contents.contains("first line"));
        assert!(contents.contains("second line"));
        assert!(!contents.contains("hidden line"));
    }

    #[test]
    fn test_disabled_logs_nothing() {
        let buffer = LogBuffer::new();
        let logger = Logger::new(&LogConfig::default().with_output(buffer.clone().into()));

        logger.in_scope(|| error!("should not appear"));

        assert!(buffer.contents().is_empty());
        assert_eq!(logger.level(), LogLevel::Disabled);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        // SAFETY: serialised with the other environment tests.
        unsafe { std::env::set_var(LOG_LEVEL_ENV, "trace") };
        assert_eq!(LogConfig::from_env().unwrap().level, LogLevel::Trace);

        unsafe { std::env::set_var(LOG_LEVEL_ENV, "loud") };
        assert!(LogConfig::from_env().is_err());

        unsafe { std::env::remove_var(LOG_LEVEL_ENV) };
        assert_eq!(LogConfig::from_env().unwrap().level, LogLevel::Disabled);
    }
}
