//! Java key toolchain
//!
//! Keys are generated by the authorization server's client jar, which
//! prints the JWKS on stdout and writes the private keys into a JKS
//! keystore. Carried-over aliases are copied between keystores with
//! `keytool -importkeystore`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keyrotor_core::model::{Algorithm, JwkSet, KeystoreArtifact};
use keyrotor_core::ports::{
    CommandSpec, GenerateRequest, GeneratedKeys, GenerationError, KeyMaterialGenerator,
    ProcessOutput, ProcessRunner,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::config::{BackendConfig, ConfigError, require_non_empty, require_timeout};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaToolchainConfig {
    pub java_bin: String,
    pub client_jar: PathBuf,
    pub keytool_bin: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub signing_algorithms: Vec<Algorithm>,
    pub encryption_algorithms: Vec<Algorithm>,
}

impl Default for JavaToolchainConfig {
    fn default() -> Self {
        Self {
            java_bin: "java".to_string(),
            client_jar: PathBuf::from("/app/javalibs/oxauth-client.jar"),
            keytool_bin: "keytool".to_string(),
            timeout: Duration::from_secs(300),
            signing_algorithms: Algorithm::SIGNING.to_vec(),
            encryption_algorithms: Algorithm::ENCRYPTION.to_vec(),
        }
    }
}

impl BackendConfig for JavaToolchainConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("generator.java_bin", &self.java_bin)?;
        require_non_empty("generator.keytool_bin", &self.keytool_bin)?;
        require_timeout("generator.timeout", self.timeout)?;
        if self.signing_algorithms.is_empty() && self.encryption_algorithms.is_empty() {
            return Err(ConfigError::invalid("generator", "at least one algorithm is required"));
        }
        if let Some(alg) = self.signing_algorithms.iter().find(|a| !a.is_signing()) {
            return Err(ConfigError::invalid(
                "generator.signing_algorithms",
                format!("{alg} is not a signing algorithm"),
            ));
        }
        if let Some(alg) = self.encryption_algorithms.iter().find(|a| a.is_signing()) {
            return Err(ConfigError::invalid(
                "generator.encryption_algorithms",
                format!("{alg} is not an encryption algorithm"),
            ));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "java"
    }
}

/// [`KeyMaterialGenerator`] backed by the client jar and `keytool`
pub struct JavaKeyToolchain {
    config: JavaToolchainConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl std::fmt::Debug for JavaKeyToolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JavaKeyToolchain")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JavaKeyToolchain {
    pub fn new(
        config: JavaToolchainConfig,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    fn generate_command(&self, request: &GenerateRequest) -> CommandSpec {
        CommandSpec::new(&self.config.java_bin)
            .arg("-Dlog4j.defaultInitOverride=true")
            .arg("-jar")
            .arg(self.config.client_jar.display().to_string())
            .arg("-enc_keys")
            .args(self.config.encryption_algorithms.iter().map(Algorithm::to_string))
            .arg("-sig_keys")
            .args(self.config.signing_algorithms.iter().map(Algorithm::to_string))
            .arg("-dnname")
            .arg(&request.distinguished_name)
            .arg("-expiration_hours")
            .arg(request.expiration_hours.to_string())
            .arg("-keystore")
            .arg(request.output_keystore.display().to_string())
            .arg("-keypasswd")
            .secret_arg(request.password.clone())
            .timeout(self.config.timeout)
    }

    fn import_command(
        &self,
        source: &KeystoreArtifact,
        destination: &KeystoreArtifact,
        alias: &str,
        password: &SecretString,
    ) -> CommandSpec {
        CommandSpec::new(&self.config.keytool_bin)
            .arg("-importkeystore")
            .arg("-srckeystore")
            .arg(source.path().display().to_string())
            .arg("-srcstorepass")
            .secret_arg(password.clone())
            .arg("-srcalias")
            .arg(alias)
            .arg("-destkeystore")
            .arg(destination.path().display().to_string())
            .arg("-deststorepass")
            .secret_arg(password.clone())
            .arg("-destalias")
            .arg(alias)
            .arg("-noprompt")
            .timeout(self.config.timeout)
    }

    async fn run(
        &self,
        tool: &str,
        command: &CommandSpec,
    ) -> Result<ProcessOutput, GenerationError> {
        let output = self.runner.run(command).await?;
        if !output.success() {
            return Err(GenerationError::NonZeroExit {
                tool: tool.to_string(),
                exit_code: output.exit_code,
                stderr: output.failure_reason(),
            });
        }
        Ok(output)
    }
}

/// The JWKS document on stdout, skipping anything logged before it
fn parse_key_set(stdout: &[u8]) -> Result<JwkSet, GenerationError> {
    let start = stdout
        .iter()
        .position(|b| *b == b'{')
        .ok_or_else(|| GenerationError::InvalidOutput("no JSON document on stdout".to_string()))?;
    JwkSet::from_json_slice(&stdout[start..])
        .map_err(|e| GenerationError::InvalidOutput(e.to_string()))
}

#[async_trait]
impl KeyMaterialGenerator for JavaKeyToolchain {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedKeys, GenerationError> {
        let path = &request.output_keystore;
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale keystore"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(GenerationError::Io {
                    path: path.clone(),
                    source,
                });
            }
        }

        let command = self.generate_command(request);
        tracing::info!(command = %command, "generating key material");
        let output = self.run("key generator", &command).await?;

        let keys = parse_key_set(&output.stdout)?;
        Ok(GeneratedKeys {
            keys,
            keystore: KeystoreArtifact::new(path),
        })
    }

    async fn import_alias(
        &self,
        source: &KeystoreArtifact,
        destination: &KeystoreArtifact,
        alias: &str,
        password: &SecretString,
    ) -> Result<(), GenerationError> {
        let command = self.import_command(source, destination, alias, password);
        tracing::debug!(command = %command, "importing key alias");
        self.run("keytool", &command).await?;
        Ok(())
    }
}
