//! Logging section of the keyrotor configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filter directive, e.g. `info` or `keyrotor=debug,kube=warn`
    pub level: String,

    /// Output format
    pub format: Format,

    /// Where events go
    pub writer: WriterConfig,

    /// ANSI colors; ignored for JSON
    pub colors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Compact,
            writer: WriterConfig::Stderr,
            colors: true,
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, indented
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event, with the current span
    Json,
}

/// Where formatted events are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WriterConfig {
    /// Standard error
    Stderr,
    /// Standard output
    Stdout,
    /// Append to a file through a non-blocking worker
    File {
        /// Log file path; the parent directory must exist
        path: PathBuf,
    },
}
