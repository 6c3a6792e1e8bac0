//! Message routing for the encoder library.
//!
//! The library reports progress and diagnostics through a callback. Instead of
//! installing that callback globally, the adapter receives a [`LogSink`] and
//! hands it to the backend wrapped in a [`FilteredSink`] that drops anything
//! louder than the configured [`Verbosity`].

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Verbosity levels understood by the encoder library, quietest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Silent = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Details = 4,
}

/// Host log level, ordered from quietest to most verbose.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HostLogLevel {
    Quiet,
    Error,
    Warning,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

impl From<log::LevelFilter> for HostLogLevel {
    fn from(level: log::LevelFilter) -> Self {
        match level {
            log::LevelFilter::Off => HostLogLevel::Quiet,
            log::LevelFilter::Error => HostLogLevel::Error,
            log::LevelFilter::Warn => HostLogLevel::Warning,
            log::LevelFilter::Info => HostLogLevel::Info,
            log::LevelFilter::Debug => HostLogLevel::Debug,
            log::LevelFilter::Trace => HostLogLevel::Trace,
        }
    }
}

impl HostLogLevel {
    /// Current level of the `log` facade.
    pub fn current() -> Self {
        log::max_level().into()
    }

    /// Library verbosity for this host level. The host's default (`Info`) only
    /// lets warnings through; per-picture info needs `Verbose`.
    pub fn verbosity(self) -> Verbosity {
        if self >= HostLogLevel::Debug {
            Verbosity::Details
        } else if self >= HostLogLevel::Verbose {
            Verbosity::Info
        } else if self >= HostLogLevel::Info {
            Verbosity::Warning
        } else {
            Verbosity::Silent
        }
    }
}

/// Destination for library messages.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Verbosity, message: &str);
}

/// Writes error and warning messages to one stream and everything else to
/// another. [`StdStreamSink::stdio`] uses standard error and standard output.
pub struct StreamSink<E, O> {
    err: Mutex<E>,
    out: Mutex<O>,
}

pub type StdStreamSink = StreamSink<std::io::Stderr, std::io::Stdout>;

impl StdStreamSink {
    pub fn stdio() -> Self {
        Self::new(std::io::stderr(), std::io::stdout())
    }
}

impl<E: Write + Send, O: Write + Send> StreamSink<E, O> {
    pub fn new(err: E, out: O) -> Self {
        Self {
            err: Mutex::new(err),
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> (E, O) {
        let err = self.err.into_inner().unwrap_or_else(|e| e.into_inner());
        let out = self.out.into_inner().unwrap_or_else(|e| e.into_inner());
        (err, out)
    }
}

impl<E: Write + Send, O: Write + Send> LogSink for StreamSink<E, O> {
    fn log(&self, level: Verbosity, message: &str) {
        // a failing stdio write must not fail the encode call
        match level {
            Verbosity::Error | Verbosity::Warning => {
                let mut err = self.err.lock().unwrap_or_else(|e| e.into_inner());
                let _ = err.write_all(message.as_bytes());
            }
            _ => {
                let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
                let _ = out.write_all(message.as_bytes());
            }
        }
    }
}

/// Forwards library messages to the `log` facade under the `vvenc` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn log(&self, level: Verbosity, message: &str) {
        let message = message.trim_end();
        match level {
            Verbosity::Silent => {}
            Verbosity::Error => log::error!(target: "vvenc", "{}", message),
            Verbosity::Warning => log::warn!(target: "vvenc", "{}", message),
            Verbosity::Info => log::info!(target: "vvenc", "{}", message),
            Verbosity::Details => log::debug!(target: "vvenc", "{}", message),
        }
    }
}

/// Drops messages above the configured verbosity before they reach `inner`.
#[derive(Clone)]
pub struct FilteredSink {
    verbosity: Verbosity,
    inner: Arc<dyn LogSink>,
}

impl FilteredSink {
    pub fn new(verbosity: Verbosity, inner: Arc<dyn LogSink>) -> Self {
        Self { verbosity, inner }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn enabled(&self, level: Verbosity) -> bool {
        level != Verbosity::Silent && level <= self.verbosity
    }
}

impl LogSink for FilteredSink {
    fn log(&self, level: Verbosity, message: &str) {
        if self.enabled(level) {
            self.inner.log(level, message);
        }
    }
}
