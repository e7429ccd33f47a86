//! Writer construction

use std::io;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::WriterConfig;
use crate::error::{LogError, LogResult};

/// Create a writer from configuration, plus the guard that flushes it
pub(crate) fn make_writer(
    config: &WriterConfig,
) -> LogResult<(BoxMakeWriter, Option<WorkerGuard>)> {
    match config {
        WriterConfig::Stderr => Ok((BoxMakeWriter::new(io::stderr), None)),
        WriterConfig::Stdout => Ok((BoxMakeWriter::new(io::stdout), None)),
        WriterConfig::File { path } => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().ok_or_else(|| LogError::Writer {
                writer: path.display().to_string(),
                reason: "path has no file name".to_string(),
            })?;
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                return Err(LogError::Writer {
                    writer: path.display().to_string(),
                    reason: format!("directory {} does not exist", dir.display()),
                });
            }

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            Ok((BoxMakeWriter::new(non_blocking), Some(guard)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.log");

        let err = make_writer(&WriterConfig::File { path }).err().unwrap();
        assert!(matches!(err, LogError::Writer { .. }));
    }

    #[test]
    fn test_file_writer_returns_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");

        let (_writer, guard) = make_writer(&WriterConfig::File { path }).unwrap();
        assert!(guard.is_some());
    }
}
