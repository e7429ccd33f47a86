//! Logger builder implementation

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Format};
use crate::error::{LogError, LogResult};
use crate::writer;

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Guard that keeps the logger alive
///
/// Dropping it flushes a non-blocking file writer, so hold it for the
/// lifetime of `main`.
#[derive(Debug)]
pub struct LoggerGuard {
    #[allow(dead_code)]
    file_guard: Option<WorkerGuard>,
}

/// Applies the options shared by all formats
macro_rules! fmt_layer {
    ($layer:expr, $colors:expr, $writer:expr) => {
        $layer.with_writer($writer).with_ansi($colors).with_target(true)
    };
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Build and install the global subscriber
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Filter string cannot be parsed
    /// - File writer cannot be opened
    /// - A global subscriber is already installed
    pub fn build(self) -> LogResult<LoggerGuard> {
        let filter = EnvFilter::try_new(&self.config.level).map_err(|e| LogError::Filter {
            filter: self.config.level.clone(),
            reason: e.to_string(),
        })?;

        let (writer, file_guard) = writer::make_writer(&self.config.writer)?;
        let colors = self.config.colors;
        let registry = Registry::default().with(filter);

        let installed = match self.config.format {
            Format::Pretty => registry
                .with(fmt_layer!(tracing_subscriber::fmt::layer().pretty(), colors, writer))
                .try_init(),
            Format::Compact => registry
                .with(fmt_layer!(tracing_subscriber::fmt::layer().compact(), colors, writer))
                .try_init(),
            Format::Json => registry
                .with(fmt_layer!(
                    tracing_subscriber::fmt::layer().json().with_current_span(true),
                    false,
                    writer
                ))
                .try_init(),
        };
        installed.map_err(|e| LogError::Init(e.to_string()))?;

        tracing::debug!(
            level = %self.config.level,
            format = ?self.config.format,
            "logger initialized"
        );

        Ok(LoggerGuard { file_guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected_before_install() {
        let config = Config {
            level: "keyrotor=notalevel".to_string(),
            ..Config::default()
        };

        let err = LoggerBuilder::from_config(config).build().unwrap_err();
        assert!(matches!(err, LogError::Filter { .. }));
    }
}
