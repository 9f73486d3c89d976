//! Logging utilities
//!
//! The crate logs through the `log` facade with bracketed subsystem tags
//! (`[SWAPCHAIN]`, `[SYNC]`, ...). Applications install `env_logger` here.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Initialize logging with `default_level` as the filter when `RUST_LOG` is unset
///
/// Safe to call more than once; later calls are ignored.
pub fn init_with_level(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}
