//! Optional log side channel.
//!
//! A pool logs nothing unless a [`PoolLog`] observer is installed through
//! [`PoolBuilder::log`](crate::PoolBuilder::log). Messages are passed as
//! [`fmt::Arguments`], so nothing is rendered when no observer is present.

use std::fmt;

/// Severity of a pool log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// Per-resource bookkeeping (creation, reuse, reaping).
    Verbose,
    /// Pool-level events (dispensing, draining).
    Info,
    /// Caller bugs such as double release.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Verbose => "verbose",
            Self::Info => "info",
            Self::Error => "error",
        })
    }
}

/// Observer receiving pool log messages.
///
/// Any `Fn(&str, LogLevel)` closure is an observer; it receives the
/// rendered message.
pub trait PoolLog: Send + Sync {
    /// Handle one message from the pool called `pool`.
    fn log(&self, level: LogLevel, pool: Option<&str>, message: fmt::Arguments<'_>);
}

impl<F> PoolLog for F
where
    F: Fn(&str, LogLevel) + Send + Sync,
{
    fn log(&self, level: LogLevel, _pool: Option<&str>, message: fmt::Arguments<'_>) {
        self(&message.to_string(), level);
    }
}

/// Forwards pool messages to `tracing`.
///
/// `Verbose` maps to `TRACE`, `Info` to `INFO` and `Error` to `ERROR`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl PoolLog for TracingLog {
    fn log(&self, level: LogLevel, pool: Option<&str>, message: fmt::Arguments<'_>) {
        let pool = pool.unwrap_or("");
        match level {
            LogLevel::Verbose => tracing::trace!(pool, "{message}"),
            LogLevel::Info => tracing::info!(pool, "{message}"),
            LogLevel::Error => tracing::error!(pool, "{message}"),
        }
    }
}

/// Emit a message through the pool's observer, if any.
macro_rules! pool_log {
    ($shared:expr, $level:expr, $($arg:tt)+) => {
        if let Some(log) = $shared.log.as_deref() {
            log.log($level, $shared.name(), format_args!($($arg)+));
        }
    };
}

pub(crate) use pool_log;
