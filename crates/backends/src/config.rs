//! Backend configuration contract

/// Invalid backend settings, caught before anything connects
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("missing required configuration: {field}")]
    MissingRequired { field: String },
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing(field: &str) -> Self {
        Self::MissingRequired {
            field: field.to_string(),
        }
    }
}

/// Implemented by every backend's settings
///
/// `validate()` runs before the backend is constructed and must name the
/// offending field.
pub trait BackendConfig: Send + Sync + Clone {
    fn validate(&self) -> Result<(), ConfigError>;

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::missing(field));
    }
    Ok(())
}

pub(crate) fn require_timeout(
    field: &str,
    timeout: std::time::Duration,
) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}
