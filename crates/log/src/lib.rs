//! # keyrotor-log
//!
//! Logging bootstrap shared by the keyrotor binaries. Library crates only
//! emit `tracing` events; the binary installs the subscriber once.
//!
//! ```rust,no_run
//! let _guard = keyrotor_log::init_with_env_override(keyrotor_log::Config::default())?;
//! tracing::info!(interval_hours = 48, "rotation starting");
//! # Ok::<(), keyrotor_log::LogError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
mod error;
mod writer;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, Format, WriterConfig};
pub use error::{LogError, LogResult};

/// Environment variable holding a filter directive that overrides config
pub const ENV_FILTER_VAR: &str = "KEYROTOR_LOG";

/// Install the given configuration, letting `KEYROTOR_LOG` / `RUST_LOG`
/// override its level
pub fn init_with_env_override(mut config: Config) -> LogResult<LoggerGuard> {
    if let Some(filter) = env_filter() {
        config.level = filter;
    }
    LoggerBuilder::from_config(config).build()
}

fn env_filter() -> Option<String> {
    std::env::var(ENV_FILTER_VAR)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .filter(|f| !f.trim().is_empty())
}
