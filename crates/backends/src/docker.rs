//! Plain-container deployment target
//!
//! Drives the `docker` CLI through a [`ProcessRunner`]; containers are
//! selected by label.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keyrotor_core::ports::{
    CommandSpec, DeployError, DeploymentTarget, ProcessOutput, ProcessRunner, TargetHandle,
    backup_path,
};
use serde::{Deserialize, Serialize};

use crate::config::{BackendConfig, ConfigError, require_non_empty, require_timeout};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub docker_bin: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl BackendConfig for DockerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("targets.docker.docker_bin", &self.docker_bin)?;
        require_timeout("targets.docker.timeout", self.timeout)
    }

    fn backend_name(&self) -> &'static str {
        "docker"
    }
}

pub struct DockerTarget {
    config: DockerConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl std::fmt::Debug for DockerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerTarget")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DockerTarget {
    pub fn new(config: DockerConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    fn docker(&self) -> CommandSpec {
        CommandSpec::new(&self.config.docker_bin).timeout(self.config.timeout)
    }

    async fn run(
        &self,
        handle: &TargetHandle,
        operation: &'static str,
        command: CommandSpec,
    ) -> Result<ProcessOutput, DeployError> {
        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|e| DeployError::Unavailable(e.to_string()))?;
        if !output.success() {
            return Err(DeployError::command(&handle.name, operation, output.failure_reason()));
        }
        Ok(output)
    }

    /// `docker exec <id> cp <from> <to>`
    async fn copy_inside(
        &self,
        handle: &TargetHandle,
        operation: &'static str,
        from: &Path,
        to: &Path,
    ) -> Result<(), DeployError> {
        let command = self
            .docker()
            .arg("exec")
            .arg(&handle.id)
            .arg("cp")
            .arg(from.display().to_string())
            .arg(to.display().to_string());
        self.run(handle, operation, command).await?;
        Ok(())
    }
}

/// One `{{.ID}} {{.Names}}` line per container
fn parse_ps(stdout: &str) -> Vec<TargetHandle> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let name = parts.next().unwrap_or(id);
            Some(TargetHandle::new(id, name))
        })
        .collect()
}

#[async_trait]
impl DeploymentTarget for DockerTarget {
    async fn discover(&self, selector: &str) -> Result<Vec<TargetHandle>, DeployError> {
        let command = self
            .docker()
            .arg("ps")
            .arg("--filter")
            .arg(format!("label={selector}"))
            .arg("--format")
            .arg("{{.ID}} {{.Names}}");

        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|e| DeployError::Unavailable(e.to_string()))?;
        if !output.success() {
            return Err(DeployError::Unavailable(output.failure_reason()));
        }

        let handles = parse_ps(&output.stdout_lossy());
        tracing::debug!(selector, count = handles.len(), "discovered containers");
        Ok(handles)
    }

    async fn backup(&self, handle: &TargetHandle, path: &Path) -> Result<(), DeployError> {
        self.copy_inside(handle, "backup", path, &backup_path(path)).await
    }

    async fn push(
        &self,
        handle: &TargetHandle,
        local: &Path,
        remote_path: &Path,
    ) -> Result<(), DeployError> {
        let command = self
            .docker()
            .arg("cp")
            .arg(local.display().to_string())
            .arg(format!("{}:{}", handle.id, remote_path.display()));
        self.run(handle, "push", command).await?;
        Ok(())
    }

    async fn restore(&self, handle: &TargetHandle, path: &Path) -> Result<(), DeployError> {
        self.copy_inside(handle, "restore", &backup_path(path), path).await
    }

    fn backend_name(&self) -> &'static str {
        "docker"
    }
}
