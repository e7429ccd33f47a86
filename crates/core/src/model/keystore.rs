//! Keystore artifacts

use std::path::{Path, PathBuf};

/// An opaque keystore file on the local filesystem
///
/// Contents are only ever produced and mutated by the
/// [`KeyMaterialGenerator`](crate::ports::KeyMaterialGenerator); this crate
/// moves the bytes around but never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeystoreArtifact {
    path: PathBuf,
}

impl KeystoreArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole keystore
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    /// Replace the keystore with the given bytes
    pub async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::write(&self.path, bytes).await
    }
}
