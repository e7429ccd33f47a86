//! Kubernetes deployment target and Secret-backed vault
//!
//! Pods are listed by label selector; files are copied with `cp` over exec
//! and pushed by streaming the local file into `sh -c 'cat > <path>'`.
//! Secrets live as data keys of one `Secret` object.
//!
//! # Configuration
//!
//! ```rust,ignore
//! use keyrotor_backends::kubernetes::{KubeConfig, KubeTarget};
//!
//! let config = KubeConfig {
//!     namespace: "auth".into(),
//!     container: Some("oxauth".into()),
//!     ..Default::default()
//! };
//! let target = KubeTarget::new(config).await?;
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use keyrotor_core::ports::{
    DeployError, DeploymentTarget, SecretVault, TargetHandle, VaultError, backup_path,
};
use kube::api::{AttachParams, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::{BackendConfig, ConfigError, require_non_empty, require_timeout};

const FIELD_MANAGER: &str = "keyrotor";

/// Cluster connection settings shared by the target and the vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeConfig {
    pub namespace: String,

    /// Kubeconfig file; in-cluster or default kubeconfig when unset
    pub kubeconfig_path: Option<PathBuf>,

    /// Container to exec into; the pod's default container when unset
    pub container: Option<String>,

    /// Accept invalid/self-signed API server certificates (testing only)
    pub accept_invalid_certs: bool,

    /// Upper bound on one exec in a pod, stdin and status included
    #[serde(with = "humantime_serde")]
    pub exec_timeout: Duration,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            kubeconfig_path: None,
            container: None,
            accept_invalid_certs: false,
            exec_timeout: Duration::from_secs(60),
        }
    }
}

impl BackendConfig for KubeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("kubernetes.namespace", &self.namespace)?;
        if self.namespace.len() > 63 {
            return Err(ConfigError::invalid(
                "kubernetes.namespace",
                format!("exceeds 63 character limit ({})", self.namespace.len()),
            ));
        }
        require_timeout("kubernetes.exec_timeout", self.exec_timeout)
    }

    fn backend_name(&self) -> &'static str {
        "kubernetes"
    }
}

/// Client for the configured kubeconfig, or in-cluster / default config
pub async fn connect(config: &KubeConfig) -> Result<Client, String> {
    let Some(path) = &config.kubeconfig_path else {
        return Client::try_default()
            .await
            .map_err(|e| format!("failed to create kubernetes client: {e}"));
    };

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("failed to read kubeconfig {}: {e}", path.display()))?;
    let kubeconfig = kube::config::Kubeconfig::from_yaml(&content)
        .map_err(|e| format!("failed to parse kubeconfig: {e}"))?;
    let options = kube::config::KubeConfigOptions::default();
    let mut client_config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| format!("failed to load kubeconfig: {e}"))?;
    client_config.accept_invalid_certs = config.accept_invalid_certs;

    Client::try_from(client_config).map_err(|e| format!("failed to create kubernetes client: {e}"))
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

/// Shell-quote a path for `sh -c`
fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

/// Fail the step when `step` outlives `limit`; dropping it closes the exec
async fn within<F>(
    limit: Duration,
    target: &str,
    operation: &'static str,
    step: F,
) -> Result<(), DeployError>
where
    F: Future<Output = Result<(), DeployError>>,
{
    tokio::time::timeout(limit, step).await.unwrap_or_else(|_| {
        Err(DeployError::command(
            target,
            operation,
            format!("timed out after {limit:?}"),
        ))
    })
}

/// Pods matching a label selector
#[derive(Clone)]
pub struct KubeTarget {
    pods: Api<Pod>,
    config: KubeConfig,
}

impl std::fmt::Debug for KubeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTarget")
            .field("namespace", &self.config.namespace)
            .field("container", &self.config.container)
            .finish_non_exhaustive()
    }
}

impl KubeTarget {
    pub async fn new(config: KubeConfig) -> Result<Self, DeployError> {
        config
            .validate()
            .map_err(|e| DeployError::Unavailable(e.to_string()))?;
        let client = connect(&config).await.map_err(DeployError::Unavailable)?;

        tracing::info!(namespace = %config.namespace, "initialized kubernetes deployment target");
        Ok(Self {
            pods: Api::namespaced(client, &config.namespace),
            config,
        })
    }

    fn attach_params(&self, stdin: bool) -> AttachParams {
        let params = AttachParams::default().stdin(stdin).stdout(false).stderr(true);
        match &self.config.container {
            Some(container) => params.container(container.clone()),
            None => params,
        }
    }

    /// Run a command in the pod, optionally feeding stdin, and fail on a
    /// non-success status or after `exec_timeout`
    async fn exec(
        &self,
        handle: &TargetHandle,
        operation: &'static str,
        command: Vec<String>,
        input: Option<Vec<u8>>,
    ) -> Result<(), DeployError> {
        within(
            self.config.exec_timeout,
            &handle.name,
            operation,
            self.exec_attached(handle, operation, command, input),
        )
        .await
    }

    async fn exec_attached(
        &self,
        handle: &TargetHandle,
        operation: &'static str,
        command: Vec<String>,
        input: Option<Vec<u8>>,
    ) -> Result<(), DeployError> {
        let mut attached = self
            .pods
            .exec(&handle.id, command, &self.attach_params(input.is_some()))
            .await
            .map_err(|e| DeployError::command(&handle.name, operation, e.to_string()))?;

        if let (Some(bytes), Some(mut stdin)) = (input, attached.stdin()) {
            stdin
                .write_all(&bytes)
                .await
                .map_err(|e| DeployError::command(&handle.name, operation, e.to_string()))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| DeployError::command(&handle.name, operation, e.to_string()))?;
        }

        let mut stderr = String::new();
        if let Some(mut reader) = attached.stderr() {
            // best effort; the status below is authoritative
            let _ = reader.read_to_string(&mut stderr).await;
        }

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| DeployError::command(&handle.name, operation, e.to_string()))?;

        match status {
            Some(status) if status.status.as_deref() != Some("Success") => {
                let reason = status
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| stderr.trim().to_string());
                Err(DeployError::command(&handle.name, operation, reason))
            }
            _ => Ok(()),
        }
    }

    async fn copy_inside(
        &self,
        handle: &TargetHandle,
        operation: &'static str,
        from: &Path,
        to: &Path,
    ) -> Result<(), DeployError> {
        let command = vec![
            "cp".to_string(),
            from.display().to_string(),
            to.display().to_string(),
        ];
        self.exec(handle, operation, command, None).await
    }
}

#[async_trait]
impl DeploymentTarget for KubeTarget {
    async fn discover(&self, selector: &str) -> Result<Vec<TargetHandle>, DeployError> {
        let pods = self
            .pods
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| DeployError::Unavailable(format!("failed to list pods: {e}")))?;

        let handles: Vec<TargetHandle> = pods
            .items
            .iter()
            .filter(|pod| is_running(pod))
            .filter_map(|pod| pod.metadata.name.as_deref())
            .map(|name| TargetHandle::new(name, name))
            .collect();

        tracing::debug!(selector, count = handles.len(), "discovered running pods");
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
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|source| DeployError::LocalArtifact {
                path: local.to_path_buf(),
                source,
            })?;
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > {}", quote(remote_path)),
        ];
        self.exec(handle, "push", command, Some(bytes)).await
    }

    async fn restore(&self, handle: &TargetHandle, path: &Path) -> Result<(), DeployError> {
        self.copy_inside(handle, "restore", &backup_path(path), path).await
    }

    fn backend_name(&self) -> &'static str {
        "kubernetes"
    }
}

/// Where the vault's Secret lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeVaultConfig {
    #[serde(flatten)]
    pub cluster: KubeConfig,
    pub secret_name: String,
}

impl Default for KubeVaultConfig {
    fn default() -> Self {
        Self {
            cluster: KubeConfig::default(),
            secret_name: "keyrotor".to_string(),
        }
    }
}

impl BackendConfig for KubeVaultConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.cluster.validate()?;
        require_non_empty("vault.secret_name", &self.secret_name)
    }

    fn backend_name(&self) -> &'static str {
        "kubernetes-secret"
    }
}

/// [`SecretVault`] over the data keys of one Kubernetes Secret
#[derive(Clone)]
pub struct KubeSecretVault {
    secrets: Api<Secret>,
    config: KubeVaultConfig,
}

impl std::fmt::Debug for KubeSecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretVault")
            .field("namespace", &self.config.cluster.namespace)
            .field("secret_name", &self.config.secret_name)
            .finish_non_exhaustive()
    }
}

impl KubeSecretVault {
    pub async fn new(config: KubeVaultConfig) -> Result<Self, VaultError> {
        config
            .validate()
            .map_err(|e| VaultError::Unavailable(e.to_string()))?;
        let client = connect(&config.cluster).await.map_err(VaultError::Unavailable)?;

        tracing::info!(
            namespace = %config.cluster.namespace,
            secret = %config.secret_name,
            "initialized kubernetes secret vault"
        );
        Ok(Self {
            secrets: Api::namespaced(client, &config.cluster.namespace),
            config,
        })
    }
}

#[async_trait]
impl SecretVault for KubeSecretVault {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, VaultError> {
        let secret = self
            .secrets
            .get_opt(&self.config.secret_name)
            .await
            .map_err(|e| VaultError::Read {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(secret
            .and_then(|s| s.data)
            .and_then(|mut data| data.remove(name))
            .map(|ByteString(bytes)| bytes))
    }

    async fn set(&self, name: &str, value: &[u8]) -> Result<(), VaultError> {
        let mut data = BTreeMap::new();
        data.insert(name.to_string(), ByteString(value.to_vec()));

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(self.config.secret_name.clone()),
                namespace: Some(self.config.cluster.namespace.clone()),
                ..Default::default()
            },
            data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };

        // server-side apply only touches the keys this manager owns
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.secrets
            .patch(&self.config.secret_name, &params, &Patch::Apply(&secret))
            .await
            .map_err(|e| VaultError::Write {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(secret = %self.config.secret_name, key = name, "stored secret value");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "kubernetes-secret"
    }
}
