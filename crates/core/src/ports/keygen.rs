//! Key material generator port

use std::path::PathBuf;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

use super::ProcessError;
use crate::model::{JwkSet, KeystoreArtifact};

/// Errors from the key toolchain
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The toolchain ran but reported failure
    #[error("{tool} exited with {}: {stderr}", describe_exit(*exit_code))]
    NonZeroExit {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The generated key set could not be parsed
    #[error("generator output is not a key set: {0}")]
    InvalidOutput(String),

    #[error("keystore file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_exit(exit_code: Option<i32>) -> String {
    exit_code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"))
}

/// Parameters of one generation
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub password: SecretString,
    pub distinguished_name: String,
    pub expiration_hours: u64,
    /// Where the new keystore is written; replaced if it exists
    pub output_keystore: PathBuf,
}

/// Fresh key set plus the keystore holding its private material
#[derive(Debug, Clone)]
pub struct GeneratedKeys {
    pub keys: JwkSet,
    pub keystore: KeystoreArtifact,
}

/// Produces key pairs and moves private material between keystores
#[async_trait]
pub trait KeyMaterialGenerator: Send + Sync {
    /// Generate a new key set and keystore
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedKeys, GenerationError>;

    /// Copy one alias from `source` into `destination`, both protected by
    /// `password`
    async fn import_alias(
        &self,
        source: &KeystoreArtifact,
        destination: &KeystoreArtifact,
        alias: &str,
        password: &SecretString,
    ) -> Result<(), GenerationError>;
}
