//! Structured log sink used by the swallow-and-log error envelope.
//!
//! The default implementation forwards to the `log` crate's global facade
//! (the same crate `database/connection_pool.rs` and
//! `database/migrations.rs` log through), so host applications wire up
//! `env_logger`/`fern`/whatever they already use and get cache
//! diagnostics for free.

/// Severity of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// A deserialization failure or similar recoverable anomaly.
    Warn,
    /// A swallowed store/codec error.
    Error,
    /// Routine diagnostic (bootstrap, auto-cleanup runs).
    Info,
}

/// Log sink contract. The engine never panics or prints directly; every
/// diagnostic goes through this trait.
pub trait Log: Send + Sync {
    /// Emit a log line at the given level.
    fn log(&self, level: Level, message: &str);
}

/// Forwards to the `log` crate's global logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalLog;

impl Log for GlobalLog {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::Warn => log::warn!("{message}"),
            Level::Error => log::error!("{message}"),
            Level::Info => log::info!("{message}"),
        }
    }
}

/// Discards everything. Used in tests that don't care about log output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl Log for NullLog {
    fn log(&self, _level: Level, _message: &str) {}
}
