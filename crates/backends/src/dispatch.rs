//! Runtime backend selection
//!
//! Each port gets an enum over the backends compiled into this build, so the
//! binary can pick one from configuration and hand it to the orchestrator
//! like any other implementation.
//!
//! | Port | Variants |
//! |------|----------|
//! | [`ConfigStore`] | [`ConfigBackend::Ldap`], [`ConfigBackend::Couchbase`] |
//! | [`DeploymentTarget`] | [`TargetBackend::Docker`], [`TargetBackend::Kubernetes`] |
//! | [`SecretVault`] | [`VaultBackend::File`], [`VaultBackend::Kubernetes`] |

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use keyrotor_core::model::AuthServerConfig;
use keyrotor_core::ports::{
    ConfigStore, ConfigUpdate, DeployError, DeploymentTarget, ProcessRunner, SecretVault,
    StoreError, TargetHandle, UpdateOutcome, VaultError,
};
use serde::{Deserialize, Serialize};

use crate::config::{BackendConfig, ConfigError, require_non_empty};
use crate::docker::{DockerConfig, DockerTarget};
use crate::file_vault::{FileVault, FileVaultConfig};

#[cfg(feature = "couchbase")]
use crate::couchbase::{CouchbaseConfig, CouchbaseConfigStore};
#[cfg(feature = "kubernetes")]
use crate::kubernetes::{KubeConfig, KubeSecretVault, KubeTarget, KubeVaultConfig};
#[cfg(feature = "ldap")]
use crate::ldap::{LdapConfig, LdapConfigStore};

/// Failure to build a backend from settings
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Target(#[from] DeployError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

fn not_compiled(field: &str, backend: impl fmt::Display) -> BackendError {
    ConfigError::invalid(field, format!("{backend} support is not compiled into this build")).into()
}

// ============================================================================
// Config store
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceType {
    #[default]
    Ldap,
    Couchbase,
    /// LDAP when the LDAP mapping is `default`, Couchbase otherwise
    Hybrid,
}

impl fmt::Display for PersistenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ldap => "ldap",
            Self::Couchbase => "couchbase",
            Self::Hybrid => "hybrid",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: PersistenceType,
    pub namespace: String,
    pub ldap_mapping: String,
    #[cfg(feature = "ldap")]
    pub ldap: LdapConfig,
    #[cfg(feature = "couchbase")]
    pub couchbase: CouchbaseConfig,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: PersistenceType::Ldap,
            namespace: "jans".to_string(),
            ldap_mapping: "default".to_string(),
            #[cfg(feature = "ldap")]
            ldap: LdapConfig::default(),
            #[cfg(feature = "couchbase")]
            couchbase: CouchbaseConfig::default(),
        }
    }
}

impl StoreSettings {
    /// The concrete backend, with hybrid persistence resolved
    pub fn effective_backend(&self) -> PersistenceType {
        match self.backend {
            PersistenceType::Hybrid if self.ldap_mapping == "default" => PersistenceType::Ldap,
            PersistenceType::Hybrid => PersistenceType::Couchbase,
            other => other,
        }
    }

    #[cfg(feature = "ldap")]
    pub fn ldap_config(&self) -> LdapConfig {
        LdapConfig {
            namespace: self.namespace.clone(),
            ..self.ldap.clone()
        }
    }

    #[cfg(feature = "couchbase")]
    pub fn couchbase_config(&self) -> CouchbaseConfig {
        CouchbaseConfig {
            bucket: self.namespace.clone(),
            ..self.couchbase.clone()
        }
    }
}

impl BackendConfig for StoreSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("store.namespace", &self.namespace)?;
        match self.effective_backend() {
            #[cfg(feature = "ldap")]
            PersistenceType::Ldap => self.ldap_config().validate(),
            #[cfg(feature = "couchbase")]
            PersistenceType::Couchbase => self.couchbase_config().validate(),
            #[allow(unreachable_patterns)]
            other => Err(ConfigError::invalid(
                "store.backend",
                format!("{other} support is not compiled into this build"),
            )),
        }
    }

    fn backend_name(&self) -> &'static str {
        "store"
    }
}

#[cfg(any(feature = "ldap", feature = "couchbase"))]
#[derive(Debug, Clone)]
pub enum ConfigBackend {
    #[cfg(feature = "ldap")]
    Ldap(LdapConfigStore),
    #[cfg(feature = "couchbase")]
    Couchbase(CouchbaseConfigStore),
}

#[cfg(any(feature = "ldap", feature = "couchbase"))]
impl ConfigBackend {
    pub fn from_settings(settings: &StoreSettings) -> Result<Self, BackendError> {
        let backend = settings.effective_backend();
        if settings.backend == PersistenceType::Hybrid {
            tracing::info!(
                mapping = %settings.ldap_mapping,
                resolved = %backend,
                "resolved hybrid persistence"
            );
        }
        match backend {
            #[cfg(feature = "ldap")]
            PersistenceType::Ldap => Ok(Self::Ldap(LdapConfigStore::new(settings.ldap_config())?)),
            #[cfg(feature = "couchbase")]
            PersistenceType::Couchbase => Ok(Self::Couchbase(CouchbaseConfigStore::new(
                settings.couchbase_config(),
            )?)),
            #[allow(unreachable_patterns)]
            other => Err(not_compiled("store.backend", other)),
        }
    }
}

#[cfg(any(feature = "ldap", feature = "couchbase"))]
#[async_trait]
impl ConfigStore for ConfigBackend {
    async fn read(&self) -> Result<Option<AuthServerConfig>, StoreError> {
        match self {
            #[cfg(feature = "ldap")]
            Self::Ldap(s) => s.read().await,
            #[cfg(feature = "couchbase")]
            Self::Couchbase(s) => s.read().await,
        }
    }

    async fn conditional_update(&self, update: ConfigUpdate) -> UpdateOutcome {
        match self {
            #[cfg(feature = "ldap")]
            Self::Ldap(s) => s.conditional_update(update).await,
            #[cfg(feature = "couchbase")]
            Self::Couchbase(s) => s.conditional_update(update).await,
        }
    }

    fn backend_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "ldap")]
            Self::Ldap(s) => s.backend_name(),
            #[cfg(feature = "couchbase")]
            Self::Couchbase(s) => s.backend_name(),
        }
    }
}

// ============================================================================
// Deployment target
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    Docker,
    Kubernetes,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Docker => "docker",
            Self::Kubernetes => "kubernetes",
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub backend: TargetKind,
    pub docker: DockerConfig,
    #[cfg(feature = "kubernetes")]
    pub kubernetes: KubeConfig,
}

impl BackendConfig for TargetSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            TargetKind::Docker => self.docker.validate(),
            #[cfg(feature = "kubernetes")]
            TargetKind::Kubernetes => self.kubernetes.validate(),
            #[allow(unreachable_patterns)]
            other => Err(ConfigError::invalid(
                "targets.backend",
                format!("{other} support is not compiled into this build"),
            )),
        }
    }

    fn backend_name(&self) -> &'static str {
        "targets"
    }
}

#[derive(Debug)]
pub enum TargetBackend {
    Docker(DockerTarget),
    #[cfg(feature = "kubernetes")]
    Kubernetes(KubeTarget),
}

impl TargetBackend {
    /// Kubernetes connects to the API server here; docker only needs the runner
    pub async fn connect(
        settings: &TargetSettings,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self, BackendError> {
        match settings.backend {
            TargetKind::Docker => {
                Ok(Self::Docker(DockerTarget::new(settings.docker.clone(), runner)?))
            }
            #[cfg(feature = "kubernetes")]
            TargetKind::Kubernetes => {
                Ok(Self::Kubernetes(KubeTarget::new(settings.kubernetes.clone()).await?))
            }
            #[allow(unreachable_patterns)]
            other => Err(not_compiled("targets.backend", other)),
        }
    }
}

#[async_trait]
impl DeploymentTarget for TargetBackend {
    async fn discover(&self, selector: &str) -> Result<Vec<TargetHandle>, DeployError> {
        match self {
            Self::Docker(t) => t.discover(selector).await,
            #[cfg(feature = "kubernetes")]
            Self::Kubernetes(t) => t.discover(selector).await,
        }
    }

    async fn backup(&self, handle: &TargetHandle, path: &Path) -> Result<(), DeployError> {
        match self {
            Self::Docker(t) => t.backup(handle, path).await,
            #[cfg(feature = "kubernetes")]
            Self::Kubernetes(t) => t.backup(handle, path).await,
        }
    }

    async fn push(
        &self,
        handle: &TargetHandle,
        local: &Path,
        remote_path: &Path,
    ) -> Result<(), DeployError> {
        match self {
            Self::Docker(t) => t.push(handle, local, remote_path).await,
            #[cfg(feature = "kubernetes")]
            Self::Kubernetes(t) => t.push(handle, local, remote_path).await,
        }
    }

    async fn restore(&self, handle: &TargetHandle, path: &Path) -> Result<(), DeployError> {
        match self {
            Self::Docker(t) => t.restore(handle, path).await,
            #[cfg(feature = "kubernetes")]
            Self::Kubernetes(t) => t.restore(handle, path).await,
        }
    }

    fn backend_name(&self) -> &'static str {
        match self {
            Self::Docker(t) => t.backend_name(),
            #[cfg(feature = "kubernetes")]
            Self::Kubernetes(t) => t.backend_name(),
        }
    }
}

// ============================================================================
// Secret vault
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultKind {
    #[default]
    File,
    Kubernetes,
}

impl fmt::Display for VaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::Kubernetes => "kubernetes",
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    pub backend: VaultKind,
    pub file: FileVaultConfig,
    #[cfg(feature = "kubernetes")]
    pub kubernetes: KubeVaultConfig,
}

impl BackendConfig for VaultSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            VaultKind::File => self.file.validate(),
            #[cfg(feature = "kubernetes")]
            VaultKind::Kubernetes => self.kubernetes.validate(),
            #[allow(unreachable_patterns)]
            other => Err(ConfigError::invalid(
                "vault.backend",
                format!("{other} support is not compiled into this build"),
            )),
        }
    }

    fn backend_name(&self) -> &'static str {
        "vault"
    }
}

#[derive(Debug)]
pub enum VaultBackend {
    File(FileVault),
    #[cfg(feature = "kubernetes")]
    Kubernetes(KubeSecretVault),
}

impl VaultBackend {
    pub async fn connect(settings: &VaultSettings) -> Result<Self, BackendError> {
        match settings.backend {
            VaultKind::File => Ok(Self::File(FileVault::new(settings.file.clone())?)),
            #[cfg(feature = "kubernetes")]
            VaultKind::Kubernetes => Ok(Self::Kubernetes(
                KubeSecretVault::new(settings.kubernetes.clone()).await?,
            )),
            #[allow(unreachable_patterns)]
            other => Err(not_compiled("vault.backend", other)),
        }
    }
}

#[async_trait]
impl SecretVault for VaultBackend {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, VaultError> {
        match self {
            Self::File(v) => v.get(name).await,
            #[cfg(feature = "kubernetes")]
            Self::Kubernetes(v) => v.get(name).await,
        }
    }

    async fn set(&self, name: &str, value: &[u8]) -> Result<(), VaultError> {
        match self {
            Self::File(v) => v.set(name, value).await,
            #[cfg(feature = "kubernetes")]
            Self::Kubernetes(v) => v.set(name, value).await,
        }
    }

    fn backend_name(&self) -> &'static str {
        match self {
            Self::File(v) => v.backend_name(),
            #[cfg(feature = "kubernetes")]
            Self::Kubernetes(v) => v.backend_name(),
        }
    }
}
