//! Deployment target port

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Suffix appended to a remote path to name its backup copy
pub const BACKUP_SUFFIX: &str = ".backup";

/// `path` + `.backup`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Errors from discovering or operating on running instances
#[derive(Debug, Error)]
pub enum DeployError {
    /// The runtime API or CLI could not be reached
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// A command inside the instance failed
    #[error("{operation} on {target} failed: {reason}")]
    Command {
        target: String,
        operation: &'static str,
        reason: String,
    },

    /// A local artifact could not be read
    #[error("cannot read local artifact {path}: {source}")]
    LocalArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    pub fn command(
        target: impl Into<String>,
        operation: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Command {
            target: target.into(),
            operation,
            reason: reason.into(),
        }
    }
}

/// A running server instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetHandle {
    /// Runtime identifier (container id, pod uid)
    pub id: String,
    /// Human-readable name (container name, pod name)
    pub name: String,
}

impl TargetHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Running instances that receive key artifacts
///
/// Every operation addresses exactly one handle; fan-out and per-handle
/// ordering belong to the caller.
#[async_trait]
pub trait DeploymentTarget: Send + Sync {
    /// Running instances matching a label selector; empty when none match
    async fn discover(&self, selector: &str) -> Result<Vec<TargetHandle>, DeployError>;

    /// Copy `path` to `path.backup` inside the instance, overwriting any
    /// previous backup
    async fn backup(&self, handle: &TargetHandle, path: &Path) -> Result<(), DeployError>;

    /// Copy a local file into the instance, replacing `remote_path`
    async fn push(
        &self,
        handle: &TargetHandle,
        local: &Path,
        remote_path: &Path,
    ) -> Result<(), DeployError>;

    /// Copy `path.backup` back over `path`
    async fn restore(&self, handle: &TargetHandle, path: &Path) -> Result<(), DeployError>;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/etc/certs/oxauth-keys.jks")),
            PathBuf::from("/etc/certs/oxauth-keys.jks.backup")
        );
    }
}
