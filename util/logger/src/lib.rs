//! fleetd logging facade.
//!
//! Library crates log through the re-exported [`log`] macros; only the host
//! binary calls [`init`] to install the actual logger backend.

pub use log::{self, debug, error, info, log_enabled, trace, warn, Level};

/// Installs the `env_logger` backend, filtered by `FLEETD_LOG` (default `info`).
///
/// Must be called at most once, by the host binary, before any service starts.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("FLEETD_LOG", "info"))
        .format_timestamp_millis()
        .init();
}
