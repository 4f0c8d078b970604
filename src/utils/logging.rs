//! Logger setup plus per-module switchable logging macros.
//!
//! Modules opt into the macros by declaring a flag next to their imports:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_debug, log_info};
//!
//! log_info!("session {} started", id);
//! ```
//!
//! Flipping the flag to `false` silences a chatty module without touching the
//! global `RUST_LOG` filter.

use log::LevelFilter;

/// Initializes `env_logger` on *stderr*.
///
/// This crate logs at *debug* level (or *trace* when `GESTUREBRIDGE_DEBUG` is
/// set); everything else stays at *warn*. `RUST_LOG` still overrides both.
/// Calling this more than once is harmless.
pub fn init_logger() {
    let level = if debug_mode() {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };

    env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_CRATE_NAME"), level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Whether `GESTUREBRIDGE_DEBUG` is set to `1` or `true`.
pub fn debug_mode() -> bool {
    std::env::var("GESTUREBRIDGE_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// `log::debug!` gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// `log::info!` gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// `log::warn!` gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// `log::error!` gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
