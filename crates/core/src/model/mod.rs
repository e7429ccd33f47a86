//! Data model: keys, key sets, keystore artifacts and the persisted
//! authorization-server configuration record

mod config;
mod jwk;
mod keystore;

pub use config::{AuthServerConfig, DynamicConfig};
pub use jwk::{Algorithm, Jwk, JwkSet};
pub use keystore::KeystoreArtifact;

use thiserror::Error;

/// Errors raised while building or parsing model values
#[derive(Debug, Error)]
pub enum ModelError {
    /// A key set would contain the same `kid` twice
    #[error("duplicate kid in key set: {0}")]
    DuplicateKid(String),

    /// An `alg` outside the supported set
    #[error("unsupported key algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Dynamic configuration is neither a JSON object nor JSON text of one
    #[error("invalid dynamic configuration: {0}")]
    InvalidDynamicConfig(String),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
