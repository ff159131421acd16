//! Logging bootstrap
//!
//! Every crate logs through the `log` facade. Binaries and tests call
//! [`init`] once to install `env_logger`; `RUST_LOG` still overrides the
//! default filter.

use env_logger::{Builder, Env};

/// Filter used when neither `RUST_LOG` nor an explicit filter is given
pub const DEFAULT_FILTER: &str = "info";

/// Install the global logger with `default_filter` as fallback.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_filter: &str) {
    let result = Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();

    if result.is_ok() {
        log::debug!("Logger initialised (default filter '{}')", default_filter);
    }
}

/// Install a logger for tests, capturing output per test
pub fn init_for_tests() {
    let _ = Builder::from_env(Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}
