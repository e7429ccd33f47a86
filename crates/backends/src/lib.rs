//! # keyrotor-backends
//!
//! Implementations of the `keyrotor-core` ports against real systems:
//!
//! - config stores: LDAP (`ldap` feature) and Couchbase N1QL (`couchbase`)
//! - deployment targets: docker CLI and Kubernetes pods (`kubernetes`)
//! - secret vaults: local JSON file and Kubernetes Secret (`kubernetes`)
//! - key material: the Java client jar plus `keytool`
//!
//! [`dispatch`] picks one backend per port from settings.

pub mod config;
pub mod dispatch;
pub mod docker;
pub mod file_vault;
pub mod java;

#[cfg(feature = "couchbase")]
pub mod couchbase;
#[cfg(feature = "kubernetes")]
pub mod kubernetes;
#[cfg(feature = "ldap")]
pub mod ldap;
#[cfg(any(feature = "ldap", feature = "couchbase"))]
mod record;

pub use config::{BackendConfig, ConfigError};
#[cfg(any(feature = "ldap", feature = "couchbase"))]
pub use dispatch::ConfigBackend;
pub use dispatch::{
    BackendError, PersistenceType, StoreSettings, TargetBackend, TargetKind, TargetSettings,
    VaultBackend, VaultKind, VaultSettings,
};
pub use docker::{DockerConfig, DockerTarget};
pub use file_vault::{FileVault, FileVaultConfig};
pub use java::{JavaKeyToolchain, JavaToolchainConfig};
