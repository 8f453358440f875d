#![deny(missing_docs)]
//! Shared logging utilities for the companion workspace.
//!
//! The `companion_*` macros forward to the `log` facade so the store, the task
//! tracker and the CLI all log through one place. Calling crates need `log`
//! in their own dependency table because the macros expand to `log::` paths.

use std::sync::Once;

use log::LevelFilter;

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! companion_trace {
    ($($arg:tt)*) => {{
        log::trace!($($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! companion_debug {
    ($($arg:tt)*) => {{
        log::debug!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! companion_info {
    ($($arg:tt)*) => {{
        log::info!($($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! companion_warn {
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! companion_error {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

static TEST_LOGGER: Once = Once::new();

/// Initializes a terminal logger for tests at the build's default level.
///
/// Debug builds log at `Debug`, release builds at `Info`. Safe to call from
/// every test: only the first call installs a logger.
pub fn initialize_for_tests() {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    initialize_for_tests_at(level);
}

/// Initializes a terminal logger for tests at an explicit level.
///
/// This no-ops if another logger has already been installed, whether by an
/// earlier test or by the binary under test.
pub fn initialize_for_tests_at(level: LevelFilter) {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    TEST_LOGGER.call_once(|| {
        let _ = CombinedLogger::init(vec![TermLogger::new(
            level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )]);
    });
}
