//! Rotation orchestrator
//!
//! Drives one run through [`RotationState`]:
//!
//! 1. read the configuration snapshot; nothing there means nothing to do
//! 2. refuse to run while the server's own key regeneration is on
//! 3. generate fresh keys with the computed expiration horizon
//! 4. merge in surviving keys from the previous rotation, import their
//!    private material, write local artifacts
//! 5. back up and push artifacts to every running instance
//! 6. conditionally update the configuration record; on rejection put
//!    back every file that has a backup
//! 7. persist keystore, timestamp, password and key set in the vault
//!
//! Steps 1 to 4 never mutate shared state, so any failure there leaves
//! the deployment exactly as it was.

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use super::context::RotationContext;
use super::propagation::{self, ArtifactFile};
use super::{RotationReport, RotationState};
use crate::clock::{Clock, SystemClock};
use crate::error::{RotationError, RotationResult};
use crate::merge::KeySetMerger;
use crate::model::{AuthServerConfig, JwkSet, KeystoreArtifact};
use crate::policy::RotationPolicy;
use crate::ports::{
    ConfigStore, ConfigUpdate, DeploymentTarget, GenerateRequest, KeyMaterialGenerator, SecretNames,
    SecretVault, UpdateOutcome, decode_base64, encode_base64,
};

/// Local artifact locations; pushed to the same paths inside each instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    /// New keystore
    pub keystore: PathBuf,
    /// New JWKS document
    pub jwks: PathBuf,
    /// Scratch copy of the previous keystore, source of imports
    pub previous_keystore: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            keystore: PathBuf::from("/etc/certs/oxauth-keys.jks"),
            jwks: PathBuf::from("/etc/certs/oxauth-keys.json"),
            previous_keystore: PathBuf::from("/etc/certs/oxauth-keys.old.jks"),
        }
    }
}

impl ArtifactPaths {
    /// Files pushed to running instances, keystore first
    pub fn propagated(&self) -> Vec<ArtifactFile> {
        vec![
            ArtifactFile::mirrored(&self.keystore),
            ArtifactFile::mirrored(&self.jwks),
        ]
    }
}

/// Plain values the orchestrator runs with
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub policy: RotationPolicy,
    /// Subject of generated certificates
    pub distinguished_name: String,
    /// Falls back to the vault when unset
    pub keystore_password: Option<SecretString>,
    /// Label selector of running instances
    pub selector: String,
    pub push_to_targets: bool,
    /// Stop after the merge, before any mutation
    pub dry_run: bool,
    pub max_parallel_targets: usize,
    pub artifacts: ArtifactPaths,
    pub secrets: SecretNames,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            policy: RotationPolicy::default(),
            distinguished_name: "CN=oxAuth CA Certificates".to_string(),
            keystore_password: None,
            selector: "APP_NAME=oxauth".to_string(),
            push_to_targets: true,
            dry_run: false,
            max_parallel_targets: 4,
            artifacts: ArtifactPaths::default(),
            secrets: SecretNames::default(),
        }
    }
}

/// Rotates key material across store, instances and vault
pub struct RotationOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn ConfigStore>,
    target: Option<Arc<dyn DeploymentTarget>>,
    vault: Arc<dyn SecretVault>,
    generator: Arc<dyn KeyMaterialGenerator>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RotationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationOrchestrator")
            .field("store", &self.store.backend_name())
            .field("target", &self.target.as_ref().map(|t| t.backend_name()))
            .field("vault", &self.vault.backend_name())
            .field("dry_run", &self.config.dry_run)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RotationOrchestrator`]
#[derive(Default)]
pub struct RotationOrchestratorBuilder {
    config: OrchestratorConfig,
    store: Option<Arc<dyn ConfigStore>>,
    target: Option<Arc<dyn DeploymentTarget>>,
    vault: Option<Arc<dyn SecretVault>>,
    generator: Option<Arc<dyn KeyMaterialGenerator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl RotationOrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn target(mut self, target: Arc<dyn DeploymentTarget>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn vault(mut self, vault: Arc<dyn SecretVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn KeyMaterialGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// # Errors
    ///
    /// Returns `RotationError::InvalidConfig` when a required port is
    /// missing or the settings are inconsistent.
    pub fn build(self) -> RotationResult<RotationOrchestrator> {
        let invalid = |reason: &str| RotationError::InvalidConfig {
            reason: reason.to_string(),
        };

        let store = self.store.ok_or_else(|| invalid("a config store is required"))?;
        let vault = self.vault.ok_or_else(|| invalid("a secret vault is required"))?;
        let generator = self
            .generator
            .ok_or_else(|| invalid("a key material generator is required"))?;

        if self.config.push_to_targets {
            if self.target.is_none() {
                return Err(invalid("a deployment target is required when pushing to targets"));
            }
            if self.config.selector.trim().is_empty() {
                return Err(invalid("target selector must not be empty"));
            }
        }
        if self.config.max_parallel_targets == 0 {
            return Err(invalid("max_parallel_targets must be at least 1"));
        }

        Ok(RotationOrchestrator {
            config: self.config,
            store,
            target: self.target,
            vault,
            generator,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        })
    }
}

/// Key set and keystore of the previous rotation
struct PreviousKeys {
    keys: JwkSet,
    keystore: Option<KeystoreArtifact>,
}

impl RotationOrchestrator {
    pub fn builder() -> RotationOrchestratorBuilder {
        RotationOrchestratorBuilder::default()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one rotation to completion
    ///
    /// # Errors
    ///
    /// Any [`RotationError`]; see its classification helpers for whether
    /// anything was mutated.
    pub async fn rotate(&self) -> RotationResult<RotationReport> {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("rotation", id = %id);
        self.run(id).instrument(span).await
    }

    async fn run(&self, id: Uuid) -> RotationResult<RotationReport> {
        let mut ctx = RotationContext::new(id, self.clock.now());
        tracing::info!(
            rotation_id = %id,
            store = self.store.backend_name(),
            dry_run = self.config.dry_run,
            "starting key rotation"
        );

        // Idle -> ConfigLoaded
        let snapshot = match self.store.read().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Err(abort(&mut ctx, RotationError::ConfigNotFound)),
            Err(e) => return Err(abort(&mut ctx, e.into())),
        };
        ctx.advance(RotationState::ConfigLoaded)?;
        tracing::debug!(
            config_id = %snapshot.id,
            revision = snapshot.revision,
            "configuration loaded"
        );

        // ConfigLoaded -> GuardChecked
        if snapshot.dynamic.key_regeneration_enabled() {
            return Err(abort(&mut ctx, RotationError::GuardConflict));
        }
        ctx.advance(RotationState::GuardChecked)?;

        // GuardChecked -> Generated
        let password = match self.resolve_password().await {
            Ok(password) => password,
            Err(e) => return Err(abort(&mut ctx, e)),
        };
        ctx.expiration_hours = self
            .config
            .policy
            .expiration_hours(snapshot.dynamic.id_token_lifetime_secs());

        let request = GenerateRequest {
            password: password.clone(),
            distinguished_name: self.config.distinguished_name.clone(),
            expiration_hours: ctx.expiration_hours,
            output_keystore: self.config.artifacts.keystore.clone(),
        };
        let generated = match self.generator.generate(&request).await {
            Ok(generated) => generated,
            Err(e) => return Err(abort(&mut ctx, RotationError::GenerationFailure(e))),
        };
        tracing::info!(
            keys = generated.keys.len(),
            expiration_hours = ctx.expiration_hours,
            "generated new key material"
        );
        ctx.advance(RotationState::Generated)?;

        // Generated -> Merged
        let merged = self
            .merge_previous(&mut ctx, generated.keys, &generated.keystore, &password)
            .await;
        let keystore_bytes = match merged {
            Ok(bytes) => bytes,
            Err(e) => return Err(abort(&mut ctx, e)),
        };
        ctx.advance(RotationState::Merged)?;

        if self.config.dry_run {
            tracing::info!("dry run, stopping before any mutation");
            return Ok(self.report(ctx, None));
        }

        // Merged -> TargetsPushed
        if let Err(e) = self.propagate(&mut ctx).await {
            return Err(abort(&mut ctx, e));
        }
        ctx.advance(RotationState::TargetsPushed)?;

        // TargetsPushed -> Committed | RolledBack
        let revision = self.commit(&mut ctx, &snapshot, &password).await?;

        // Committed -> Finalized
        self.finalize(&ctx, revision, &keystore_bytes, &password).await?;
        ctx.advance(RotationState::Finalized)?;

        let report = self.report(ctx, Some(revision));
        tracing::info!(revision, keys = report.merged_kids.len(), "key rotation finalized");
        Ok(report)
    }

    async fn resolve_password(&self) -> RotationResult<SecretString> {
        if let Some(password) = &self.config.keystore_password {
            return Ok(password.clone());
        }

        let name = &self.config.secrets.keystore_password;
        let stored = self
            .vault
            .get(name)
            .await
            .map_err(|source| RotationError::VaultRead {
                secret: name.clone(),
                source,
            })?
            .ok_or_else(|| RotationError::MissingKeystorePassword { secret: name.clone() })?;

        let text = String::from_utf8(stored).map_err(|_| RotationError::MalformedSecret {
            secret: name.clone(),
            reason: "keystore password is not UTF-8".to_string(),
        })?;
        Ok(SecretString::from(text.trim_end().to_string()))
    }

    /// Merge the previous key set into the new one and import carried-over
    /// private material; returns the final keystore bytes
    async fn merge_previous(
        &self,
        ctx: &mut RotationContext,
        new_keys: JwkSet,
        keystore: &KeystoreArtifact,
        password: &SecretString,
    ) -> RotationResult<Vec<u8>> {
        let previous = self.load_previous().await?;
        let merger = KeySetMerger::new(self.config.policy.quota_per_alg());
        let outcome = merger.merge(new_keys, &previous.keys, self.clock.now_millis());

        if !outcome.import_requests.is_empty() {
            let Some(source) = previous.keystore.as_ref() else {
                return Err(RotationError::InvalidConfig {
                    reason: "keys to carry over but no previous keystore".to_string(),
                });
            };
            for kid in &outcome.import_requests {
                self.generator
                    .import_alias(source, keystore, kid, password)
                    .await
                    .map_err(|source| RotationError::ImportFailure {
                        kid: kid.clone(),
                        source,
                    })?;
                tracing::debug!(kid = %kid, "carried over key material");
            }
        }

        let jwks_path = &self.config.artifacts.jwks;
        let document = outcome.merged.to_pretty_json()?;
        tokio::fs::write(jwks_path, document)
            .await
            .map_err(|source| RotationError::Artifact {
                path: jwks_path.clone(),
                source,
            })?;

        let keystore_bytes = keystore.read().await.map_err(|source| RotationError::Artifact {
            path: keystore.path().to_path_buf(),
            source,
        })?;

        tracing::info!(
            merged = outcome.merged.len(),
            carried_over = outcome.import_requests.len(),
            "merged key sets"
        );
        ctx.merge = Some(outcome);
        Ok(keystore_bytes)
    }

    /// Previous key set and keystore from the vault
    ///
    /// Either one missing means there is nothing to carry over.
    async fn load_previous(&self) -> RotationResult<PreviousKeys> {
        let names = &self.config.secrets;
        let empty = PreviousKeys {
            keys: JwkSet::default(),
            keystore: None,
        };

        let Some(jwks) = self.read_secret(&names.jwks).await? else {
            tracing::warn!(secret = %names.jwks, "no previous key set, nothing to carry over");
            return Ok(empty);
        };
        let Some(keystore) = self.read_secret(&names.keystore).await? else {
            tracing::warn!(secret = %names.keystore, "no previous keystore, nothing to carry over");
            return Ok(empty);
        };

        let jwks = decode_secret(&names.jwks, &jwks)?;
        let keys = JwkSet::from_json_slice(&jwks)?;
        let keystore_bytes = decode_secret(&names.keystore, &keystore)?;

        let path = &self.config.artifacts.previous_keystore;
        let artifact = KeystoreArtifact::new(path);
        artifact
            .write(&keystore_bytes)
            .await
            .map_err(|source| RotationError::Artifact {
                path: path.clone(),
                source,
            })?;

        Ok(PreviousKeys {
            keys,
            keystore: Some(artifact),
        })
    }

    async fn read_secret(&self, name: &str) -> RotationResult<Option<Vec<u8>>> {
        self.vault.get(name).await.map_err(|source| RotationError::VaultRead {
            secret: name.to_string(),
            source,
        })
    }

    async fn propagate(&self, ctx: &mut RotationContext) -> RotationResult<()> {
        if !self.config.push_to_targets {
            tracing::info!("propagation to running instances disabled");
            return Ok(());
        }
        let Some(target) = self.target.as_deref() else {
            return Err(RotationError::InvalidConfig {
                reason: "no deployment target configured".to_string(),
            });
        };

        let selector = &self.config.selector;
        let handles = target.discover(selector).await.map_err(RotationError::Discovery)?;
        if handles.is_empty() {
            return Err(RotationError::NoTargetsFound {
                selector: selector.clone(),
            });
        }
        tracing::info!(
            targets = handles.len(),
            backend = target.backend_name(),
            "pushing artifacts"
        );

        let (reports, failures) = propagation::push_all(
            target,
            handles,
            &self.config.artifacts.propagated(),
            self.config.max_parallel_targets,
        )
        .await;

        ctx.touched = reports;
        ctx.failures.extend(failures);
        Ok(())
    }

    async fn commit(
        &self,
        ctx: &mut RotationContext,
        snapshot: &AuthServerConfig,
        password: &SecretString,
    ) -> RotationResult<u64> {
        let revision = snapshot.revision.saturating_add(1);
        let merged = ctx
            .merge
            .as_ref()
            .map(|m| m.merged.clone())
            .unwrap_or_default();

        let mut dynamic = snapshot.dynamic.clone();
        dynamic.apply_rotation(self.config.policy.interval_hours(), password.expose_secret());

        let update = ConfigUpdate {
            id: snapshot.id.clone(),
            revision,
            dynamic,
            web_keys: merged,
        };

        match self.store.conditional_update(update).await {
            UpdateOutcome::Committed => {
                ctx.advance(RotationState::Committed)?;
                tracing::info!(revision, "configuration committed");
                Ok(revision)
            }
            UpdateOutcome::Rejected { reason } => {
                tracing::error!(
                    reason = %reason,
                    "configuration update rejected, rolling back targets"
                );
                let restore_failures = match self.target.as_deref() {
                    Some(target) if !ctx.touched.is_empty() => {
                        let limit = self.config.max_parallel_targets;
                        propagation::restore_all(target, &ctx.touched, limit).await
                    }
                    _ => Vec::new(),
                };
                if !restore_failures.is_empty() {
                    tracing::error!(
                        failures = restore_failures.len(),
                        "rollback left some targets unrestored"
                    );
                }
                ctx.advance(RotationState::RolledBack)?;
                Err(RotationError::CommitRejected {
                    reason,
                    restore_failures,
                })
            }
        }
    }

    /// Secrets are written keystore, timestamp, password, key set; the
    /// first failure ends the run
    async fn finalize(
        &self,
        ctx: &RotationContext,
        revision: u64,
        keystore_bytes: &[u8],
        password: &SecretString,
    ) -> RotationResult<()> {
        let names = &self.config.secrets;
        let jwks = ctx
            .merge
            .as_ref()
            .map(|m| m.merged.to_json_vec())
            .transpose()?
            .unwrap_or_default();

        let writes: [(&str, Vec<u8>); 4] = [
            (names.keystore.as_str(), encode_base64(keystore_bytes)),
            (names.rotated_at.as_str(), self.clock.now().timestamp().to_string().into_bytes()),
            (names.keystore_password.as_str(), password.expose_secret().as_bytes().to_vec()),
            (names.jwks.as_str(), encode_base64(&jwks)),
        ];

        for (name, value) in writes {
            if let Err(source) = self.vault.set(name, &value).await {
                tracing::error!(
                    secret = %name,
                    revision,
                    error = %source,
                    "secret write failed after commit; configuration is ahead of the vault"
                );
                return Err(RotationError::FinalizationFailure {
                    revision,
                    secret: name.to_string(),
                    source,
                });
            }
        }
        Ok(())
    }

    fn report(&self, ctx: RotationContext, revision: Option<u64>) -> RotationReport {
        RotationReport {
            rotation_id: ctx.id,
            final_state: ctx.state,
            revision,
            expiration_hours: ctx.expiration_hours,
            merged_kids: ctx.merged_kids(),
            imported_kids: ctx.imported_kids(),
            dry_run: self.config.dry_run,
            started_at: ctx.started_at,
            finished_at: self.clock.now(),
            targets: ctx.touched,
            propagation_failures: ctx.failures,
        }
    }
}

fn decode_secret(name: &str, encoded: &[u8]) -> RotationResult<Vec<u8>> {
    decode_base64(encoded).map_err(|e| RotationError::MalformedSecret {
        secret: name.to_string(),
        reason: e.to_string(),
    })
}

/// Move the run to `Aborted` and log why
fn abort(ctx: &mut RotationContext, err: RotationError) -> RotationError {
    if let Err(e) = ctx.advance(RotationState::Aborted) {
        tracing::error!(error = %e, "abort from unexpected state");
    }
    if err.is_informational() {
        tracing::warn!(rotation_id = %ctx.id, reason = %err, "nothing to rotate");
    } else {
        tracing::warn!(rotation_id = %ctx.id, error = %err, "rotation aborted before any mutation");
    }
    err
}
