//! File-backed secret vault
//!
//! All secrets live in one JSON object of `name -> base64(value)`. Writes go
//! through a temp file in the same directory and a rename, so readers see
//! either the old or the new document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use keyrotor_core::ports::{SecretVault, VaultError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{BackendConfig, ConfigError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileVaultConfig {
    pub path: PathBuf,
}

impl Default for FileVaultConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/keyrotor/secrets.json"),
        }
    }
}

impl BackendConfig for FileVaultConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::missing("vault.path"));
        }
        if self.path.file_name().is_none() {
            return Err(ConfigError::invalid("vault.path", "must name a file"));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

type Document = BTreeMap<String, String>;

/// [`SecretVault`] over a local JSON file
#[derive(Debug)]
pub struct FileVault {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileVault {
    pub fn new(config: FileVaultConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!(path = %config.path.display(), "initialized file vault");
        Ok(Self {
            path: config.path,
            lock: Mutex::new(()),
        })
    }

    async fn load(&self) -> Result<Document, String> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Document::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| format!("{}: {e}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(format!("{}: {e}", self.path.display())),
        }
    }
}

async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_file_name(format!(
        "{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("secrets"),
        Uuid::new_v4()
    ));

    tokio::fs::write(&temp_path, data).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl SecretVault for FileVault {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, VaultError> {
        let read_error = |reason: String| VaultError::Read {
            name: name.to_string(),
            reason,
        };

        let document = self.load().await.map_err(read_error)?;
        document
            .get(name)
            .map(|encoded| STANDARD.decode(encoded).map_err(|e| read_error(e.to_string())))
            .transpose()
    }

    async fn set(&self, name: &str, value: &[u8]) -> Result<(), VaultError> {
        let write_error = |reason: String| VaultError::Write {
            name: name.to_string(),
            reason,
        };

        let _guard = self.lock.lock().await;
        let mut document = self.load().await.map_err(write_error)?;
        document.insert(name.to_string(), STANDARD.encode(value));

        let json = serde_json::to_vec_pretty(&document).map_err(|e| write_error(e.to_string()))?;
        atomic_write(&self.path, &json)
            .await
            .map_err(|e| write_error(e.to_string()))?;

        tracing::debug!(path = %self.path.display(), key = name, "stored secret value");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn vault(dir: &TempDir) -> FileVault {
        FileVault::new(FileVaultConfig {
            path: dir.path().join("secrets.json"),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_has_no_secrets() {
        let dir = TempDir::new().unwrap();
        assert_eq!(vault(&dir).get("oxauth_jks_base64").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get_keeps_other_keys() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);

        vault.set("a", b"first").await.unwrap();
        vault.set("b", &[0, 159, 146, 150]).await.unwrap();
        vault.set("a", b"second").await.unwrap();

        assert_eq!(vault.get("a").await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(vault.get("b").await.unwrap(), Some(vec![0, 159, 146, 150]));
    }

    #[tokio::test]
    async fn test_document_is_base64_json() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        vault.set("oxauth_openid_jks_pass", b"s3cret").await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("secrets.json")).unwrap();
        let document: Document = serde_json::from_str(&raw).unwrap();
        assert_eq!(document["oxauth_openid_jks_pass"], "czNjcmV0");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        vault(&dir).set("a", b"x").await.unwrap();

        let mode = std::fs::metadata(dir.path().join("secrets.json")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_read_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("secrets.json"), "not json").unwrap();

        let err = vault(&dir).get("a").await.unwrap_err();
        assert!(matches!(err, VaultError::Read { .. }));
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_write_error() {
        let dir = TempDir::new().unwrap();
        let vault = FileVault::new(FileVaultConfig {
            path: dir.path().join("missing").join("secrets.json"),
        })
        .unwrap();

        let err = vault.set("a", b"x").await.unwrap_err();
        assert!(matches!(err, VaultError::Write { .. }));
    }
}
