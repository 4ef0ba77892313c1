//! Logging utilities

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system.
///
/// `level` is the default filter (`"info"`, `"render_core=debug"`, ...);
/// `RUST_LOG` overrides it. Safe to call more than once.
pub fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init();

    if result.is_ok() {
        log::debug!("Logging initialized (default filter: {level})");
    }
}

/// Logger for unit tests: captured by the test harness, never fails.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
