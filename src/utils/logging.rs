//! Conditional logging macros gated on a module-level `ENABLE_LOGS` const.
//!
//! Chatty modules (replication, calls) define `const ENABLE_LOGS: bool` and
//! use these instead of the plain `log` macros, so their output can be
//! silenced per module without touching filter configuration.

/// Info-level logging, compiled against the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn-level logging, compiled against the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}
