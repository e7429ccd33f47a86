//! End-to-end runs of the rotation orchestrator against in-memory ports

use std::path::PathBuf;
use std::sync::Arc;

use keyrotor_core::error::{PropagationOp, RotationError};
use keyrotor_core::model::{Algorithm, AuthServerConfig, DynamicConfig, Jwk, JwkSet};
use keyrotor_core::ports::{SecretNames, decode_base64, encode_base64};
use keyrotor_core::testing::{
    FixedClock, MemoryConfigStore, MemoryTarget, MemoryVault, StubKeyGenerator,
};
use keyrotor_core::{
    ArtifactPaths, OrchestratorConfig, RotationOrchestrator, RotationPolicy, RotationState,
};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000_000;
const FUTURE: i64 = NOW + 86_400_000;
const FUTURE2: i64 = NOW + 2 * 86_400_000;
const PAST: i64 = NOW - 1;

const CONFIG_ID: &str = "ou=oxauth,ou=configuration,o=jans";
const PASSWORD: &str = "s3cret";
const OLD_KEYSTORE: &[u8] = b"old keystore";
const OLD_JWKS: &[u8] = b"{\"keys\":[]}";

struct Harness {
    store: Arc<MemoryConfigStore>,
    vault: Arc<MemoryVault>,
    target: Arc<MemoryTarget>,
    generator: Arc<StubKeyGenerator>,
    config: OrchestratorConfig,
    _dir: TempDir,
}

fn old_keys() -> JwkSet {
    JwkSet::new(vec![
        Jwk::new("k1", Algorithm::Rs256, FUTURE).with_field("kty", "RSA"),
        Jwk::new("k2", Algorithm::Rs256, FUTURE).with_field("kty", "RSA"),
        Jwk::new("k3", Algorithm::Es256, PAST).with_field("kty", "EC"),
    ])
    .unwrap()
}

fn snapshot(guard: bool) -> AuthServerConfig {
    AuthServerConfig {
        id: CONFIG_ID.to_string(),
        revision: 7,
        dynamic: DynamicConfig::from_value(json!({
            "issuer": "https://op.example",
            "keyRegenerationEnabled": guard,
            "idTokenLifetime": 3600
        }))
        .unwrap(),
        web_keys: old_keys(),
    }
}

impl Harness {
    /// Two running instances, a previous rotation in the vault, password in the vault
    fn new() -> Self {
        Self::with_snapshot(Some(snapshot(false)))
    }

    fn with_snapshot(record: Option<AuthServerConfig>) -> Self {
        let dir = TempDir::new().unwrap();
        let artifacts = ArtifactPaths {
            keystore: dir.path().join("keys.jks"),
            jwks: dir.path().join("keys.json"),
            previous_keystore: dir.path().join("keys.old.jks"),
        };

        let store = match record {
            Some(record) => MemoryConfigStore::with_config(record),
            None => MemoryConfigStore::new(),
        };

        let names = SecretNames::default();
        let vault = MemoryVault::new();
        vault.insert(&names.jwks, encode_base64(&old_keys().to_json_vec().unwrap()));
        vault.insert(
            &names.keystore,
            encode_base64(&StubKeyGenerator::keystore_bytes(&["k1", "k2", "k3"])),
        );
        vault.insert(&names.keystore_password, PASSWORD);

        let target = MemoryTarget::new();
        for instance in ["auth-0", "auth-1"] {
            target.add_instance(instance);
            target.put_file(instance, &artifacts.keystore, OLD_KEYSTORE);
            target.put_file(instance, &artifacts.jwks, OLD_JWKS);
        }

        let generator = StubKeyGenerator::new(vec![
            Jwk::new("k4", Algorithm::Rs256, FUTURE2).with_field("kty", "RSA"),
        ]);

        let config = OrchestratorConfig {
            policy: RotationPolicy::new(48, 2).unwrap(),
            artifacts,
            ..OrchestratorConfig::default()
        };

        Self {
            store: Arc::new(store),
            vault: Arc::new(vault),
            target: Arc::new(target),
            generator: Arc::new(generator),
            config,
            _dir: dir,
        }
    }

    fn orchestrator(&self) -> RotationOrchestrator {
        RotationOrchestrator::builder()
            .config(self.config.clone())
            .store(self.store.clone())
            .target(self.target.clone())
            .vault(self.vault.clone())
            .generator(self.generator.clone())
            .clock(Arc::new(FixedClock::from_millis(NOW)))
            .build()
            .unwrap()
    }

    fn names(&self) -> &SecretNames {
        &self.config.secrets
    }

    fn keystore_path(&self) -> PathBuf {
        self.config.artifacts.keystore.clone()
    }

    fn jwks_path(&self) -> PathBuf {
        self.config.artifacts.jwks.clone()
    }

    fn assert_untouched(&self) {
        assert_eq!(self.store.update_count(), 0, "store was written");
        assert_eq!(self.vault.set_count(), 0, "vault was written");
        assert_eq!(self.target.write_count(), 0, "targets were written");
    }

    fn assert_instance_has_old_files(&self, instance: &str) {
        assert_eq!(self.target.file(instance, self.keystore_path()).unwrap(), OLD_KEYSTORE);
        assert_eq!(self.target.file(instance, self.jwks_path()).unwrap(), OLD_JWKS);
    }

    fn vault_jwks_kids(&self) -> Vec<String> {
        let encoded = self.vault.value(&self.names().jwks).unwrap();
        JwkSet::from_json_slice(&decode_base64(&encoded).unwrap())
            .unwrap()
            .kids()
    }
}

#[tokio::test]
async fn test_full_rotation_finalizes() {
    let h = Harness::new();

    let report = h.orchestrator().rotate().await.unwrap();

    assert_eq!(report.final_state, RotationState::Finalized);
    assert_eq!(report.revision, Some(8));
    assert_eq!(report.expiration_hours, 49);
    assert_eq!(report.merged_kids, vec!["k4", "k1"]);
    assert_eq!(report.imported_kids, vec!["k1"]);
    assert_eq!(report.targets.len(), 2);
    assert!(report.propagation_failures.is_empty());

    // generator saw the computed horizon and the vault password
    assert_eq!(h.generator.last_expiration_hours(), Some(49));
    assert_eq!(h.generator.last_password().as_deref(), Some(PASSWORD));
    assert_eq!(h.generator.imported(), vec!["k1"]);

    // configuration advanced by exactly one with both fields replaced
    let stored = h.store.current().unwrap();
    assert_eq!(stored.revision, 8);
    assert_eq!(stored.web_keys.kids(), vec!["k4", "k1"]);
    assert!(!stored.dynamic.key_regeneration_enabled());
    assert_eq!(stored.dynamic.key_regeneration_interval(), Some(48));
    assert_eq!(stored.dynamic.web_keys_storage(), Some("keystore"));
    assert_eq!(stored.dynamic.key_store_secret(), Some(PASSWORD));
    assert_eq!(stored.dynamic.as_map()["issuer"], "https://op.example");

    // every instance got the new artifacts and kept a backup of the old ones
    let local_keystore = std::fs::read(h.keystore_path()).unwrap();
    let local_jwks = std::fs::read(h.jwks_path()).unwrap();
    for instance in ["auth-0", "auth-1"] {
        assert_eq!(h.target.file(instance, h.keystore_path()).unwrap(), local_keystore);
        assert_eq!(h.target.file(instance, h.jwks_path()).unwrap(), local_jwks);
        let backup = PathBuf::from(format!("{}.backup", h.keystore_path().display()));
        assert_eq!(h.target.file(instance, backup).unwrap(), OLD_KEYSTORE);
    }

    // new keystore holds the fresh key and the carried-over one
    assert_eq!(StubKeyGenerator::aliases(&local_keystore), vec!["k1", "k4"]);

    // secrets superseded
    assert_eq!(h.vault_jwks_kids(), vec!["k4", "k1"]);
    let keystore = decode_base64(&h.vault.value(&h.names().keystore).unwrap()).unwrap();
    assert_eq!(keystore, local_keystore);
    assert_eq!(h.vault.value(&h.names().rotated_at).unwrap(), b"1700000000");
    assert_eq!(h.vault.value(&h.names().keystore_password).unwrap(), PASSWORD.as_bytes());
}

#[tokio::test]
async fn test_jwks_artifact_is_pretty_and_ordered() {
    let h = Harness::new();

    h.orchestrator().rotate().await.unwrap();

    let text = std::fs::read_to_string(h.jwks_path()).unwrap();
    assert!(text.contains('\n'));
    assert!(text.find("\"k4\"").unwrap() < text.find("\"k1\"").unwrap());
    assert!(!text.contains("\"k2\""));
    assert!(!text.contains("\"k3\""));
}

#[tokio::test]
async fn test_guard_flag_means_zero_writes() {
    let h = Harness::with_snapshot(Some(snapshot(true)));

    let err = h.orchestrator().rotate().await.unwrap_err();

    assert!(matches!(err, RotationError::GuardConflict));
    assert!(err.is_informational());
    h.assert_untouched();
    assert_eq!(h.generator.generate_count(), 0);
    assert_eq!(h.target.discover_count(), 0);
    assert_eq!(h.store.current().unwrap().revision, 7);
}

#[tokio::test]
async fn test_missing_config_stops_before_any_other_call() {
    let h = Harness::with_snapshot(None);

    let err = h.orchestrator().rotate().await.unwrap_err();

    assert!(matches!(err, RotationError::ConfigNotFound));
    assert!(err.is_informational());
    assert_eq!(h.store.read_count(), 1);
    assert_eq!(h.store.update_count(), 0);
    assert_eq!(h.vault.get_count(), 0);
    assert_eq!(h.vault.set_count(), 0);
    assert_eq!(h.generator.generate_count(), 0);
    assert_eq!(h.target.discover_count(), 0);
}

#[tokio::test]
async fn test_store_read_failure_aborts() {
    let h = Harness::new();
    h.store.fail_next_read();

    let err = h.orchestrator().rotate().await.unwrap_err();

    assert!(matches!(err, RotationError::Store(_)));
    assert!(err.is_abort());
    assert!(!err.is_informational());
    h.assert_untouched();
}

#[tokio::test]
async fn test_generation_failure_touches_nothing() {
    let h = Harness::new();
    h.generator.fail_next_generate();

    let err = h.orchestrator().rotate().await.unwrap_err();

    assert!(matches!(err, RotationError::GenerationFailure(_)));
    assert!(err.is_abort());
    h.assert_untouched();
    assert_eq!(h.target.discover_count(), 0);
}

#[tokio::test]
async fn test_import_failure_aborts_before_mutation() {
    let h = Harness::new();
    h.generator.fail_next_import();

    let err = h.orchestrator().rotate().await.unwrap_err();

    match err {
        RotationError::ImportFailure { ref kid, .. } => assert_eq!(kid, "k1"),
        other => panic!("unexpected error: {other}"),
    }
    h.assert_untouched();
}

#[tokio::test]
async fn test_no_running_instances_aborts() {
    let mut h = Harness::new();
    h.target = Arc::new(MemoryTarget::new());

    let err = h.orchestrator().rotate().await.unwrap_err();

    assert!(matches!(err, RotationError::NoTargetsFound { .. }));
    assert!(err.is_abort());
    assert_eq!(h.store.update_count(), 0);
    assert_eq!(h.vault.set_count(), 0);
    assert_eq!(h.store.current().unwrap().revision, 7);
}

#[tokio::test]
async fn test_rejected_commit_restores_every_target() {
    let h = Harness::new();
    h.store.reject_next_update();

    let err = h.orchestrator().rotate().await.unwrap_err();

    match &err {
        RotationError::CommitRejected {
            restore_failures, ..
        } => assert!(restore_failures.is_empty()),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.mutated());
    for instance in ["auth-0", "auth-1"] {
        h.assert_instance_has_old_files(instance);
    }
    assert_eq!(h.store.current().unwrap().revision, 7);
    assert_eq!(h.vault.set_count(), 0);
}

#[tokio::test]
async fn test_rollback_is_best_effort_per_target() {
    let h = Harness::new();
    h.store.reject_next_update();
    h.target.fail_restore_on("auth-1");

    let err = h.orchestrator().rotate().await.unwrap_err();

    let RotationError::CommitRejected { restore_failures, .. } = err else {
        panic!("expected a rejected commit");
    };
    assert_eq!(restore_failures.len(), 2);
    assert!(
        restore_failures
            .iter()
            .all(|f| f.target == "auth-1" && f.operation == PropagationOp::Restore)
    );
    h.assert_instance_has_old_files("auth-0");
}

#[tokio::test]
async fn test_finalization_failure_leaves_commit_in_place() {
    let h = Harness::new();
    h.vault.fail_set_of(&h.names().rotated_at.clone());

    let err = h.orchestrator().rotate().await.unwrap_err();

    match &err {
        RotationError::FinalizationFailure { revision, secret, .. } => {
            assert_eq!(*revision, 8);
            assert_eq!(secret, &h.names().rotated_at);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.mutated());
    assert_eq!(h.store.current().unwrap().revision, 8);
    // keystore went first, key set was never reached
    assert_eq!(h.vault.set_count(), 2);
    assert_eq!(h.vault_jwks_kids(), vec!["k1", "k2", "k3"]);
}

#[tokio::test]
async fn test_dry_run_has_no_side_effects() {
    let mut h = Harness::new();
    h.config.dry_run = true;

    let report = h.orchestrator().rotate().await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.final_state, RotationState::Merged);
    assert_eq!(report.revision, None);
    assert_eq!(report.merged_kids, vec!["k4", "k1"]);
    h.assert_untouched();
    assert_eq!(h.target.discover_count(), 0);
}

#[tokio::test]
async fn test_push_disabled_commits_without_targets() {
    let mut h = Harness::new();
    h.config.push_to_targets = false;

    let orchestrator = RotationOrchestrator::builder()
        .config(h.config.clone())
        .store(h.store.clone())
        .vault(h.vault.clone())
        .generator(h.generator.clone())
        .clock(Arc::new(FixedClock::from_millis(NOW)))
        .build()
        .unwrap();

    let report = orchestrator.rotate().await.unwrap();

    assert_eq!(report.final_state, RotationState::Finalized);
    assert!(report.targets.is_empty());
    assert_eq!(h.target.discover_count(), 0);
    assert_eq!(h.store.current().unwrap().revision, 8);
}

#[tokio::test]
async fn test_push_failure_is_not_fatal() {
    let h = Harness::new();
    h.target.fail_push_on("auth-1");

    let report = h.orchestrator().rotate().await.unwrap();

    assert_eq!(report.final_state, RotationState::Finalized);
    assert_eq!(report.propagation_failures.len(), 2);
    assert!(
        report
            .propagation_failures
            .iter()
            .all(|f| f.target == "auth-1" && f.operation == PropagationOp::Push)
    );
    let local_keystore = std::fs::read(h.keystore_path()).unwrap();
    assert_eq!(h.target.file("auth-0", h.keystore_path()).unwrap(), local_keystore);
}

#[tokio::test]
async fn test_backup_failure_still_pushes_to_that_target() {
    let h = Harness::new();
    h.target.fail_backup_on("auth-0");

    let report = h.orchestrator().rotate().await.unwrap();

    assert_eq!(report.final_state, RotationState::Finalized);
    assert_eq!(report.propagation_failures.len(), 2);
    assert!(
        report
            .propagation_failures
            .iter()
            .all(|f| f.target == "auth-0" && f.operation == PropagationOp::Backup)
    );
    let auth0 = report.targets.iter().find(|t| t.target.name == "auth-0").unwrap();
    assert!(auth0.backed_up.is_empty());
    assert_eq!(auth0.pushed, vec![h.keystore_path(), h.jwks_path()]);

    let local_keystore = std::fs::read(h.keystore_path()).unwrap();
    assert_eq!(h.target.file("auth-0", h.keystore_path()).unwrap(), local_keystore);
}

#[tokio::test]
async fn test_rollback_skips_files_without_backup() {
    let h = Harness::new();
    h.target.fail_backup_on("auth-0");
    h.store.reject_next_update();

    let err = h.orchestrator().rotate().await.unwrap_err();

    let RotationError::CommitRejected { restore_failures, .. } = err else {
        panic!("expected a rejected commit");
    };
    assert!(restore_failures.is_empty());
    h.assert_instance_has_old_files("auth-1");
    // nothing to put back on auth-0, so it keeps the pushed artifacts
    let local_keystore = std::fs::read(h.keystore_path()).unwrap();
    assert_eq!(h.target.file("auth-0", h.keystore_path()).unwrap(), local_keystore);
}

#[tokio::test]
async fn test_concurrent_writer_wins_the_commit() {
    let h = Harness::new();
    h.store.race_next_read();

    let err = h.orchestrator().rotate().await.unwrap_err();

    match &err {
        RotationError::CommitRejected {
            restore_failures, ..
        } => assert!(restore_failures.is_empty()),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.mutated());
    assert_eq!(h.store.update_count(), 1);

    // the other writer's revision stands and our key set was not written
    let stored = h.store.current().unwrap();
    assert_eq!(stored.revision, 8);
    assert_eq!(stored.web_keys.kids(), vec!["k1", "k2", "k3"]);

    for instance in ["auth-0", "auth-1"] {
        h.assert_instance_has_old_files(instance);
    }
    assert_eq!(h.vault.set_count(), 0);
}

#[tokio::test]
async fn test_first_rotation_has_nothing_to_carry_over() {
    let h = Harness::new();
    let fresh = MemoryVault::new();
    fresh.insert(&h.names().keystore_password, PASSWORD);
    let h = Harness {
        vault: Arc::new(fresh),
        ..h
    };

    let report = h.orchestrator().rotate().await.unwrap();

    assert_eq!(report.merged_kids, vec!["k4"]);
    assert!(report.imported_kids.is_empty());
    assert!(h.generator.imported().is_empty());
    assert_eq!(h.vault_jwks_kids(), vec!["k4"]);
}

#[tokio::test]
async fn test_configured_password_wins_over_vault() {
    let mut h = Harness::new();
    h.config.keystore_password = Some(SecretString::from("from-config"));

    h.orchestrator().rotate().await.unwrap();

    assert_eq!(h.generator.last_password().as_deref(), Some("from-config"));
    assert_eq!(h.vault.value(&h.names().keystore_password).unwrap(), b"from-config");
}

#[tokio::test]
async fn test_missing_password_aborts() {
    let h = Harness::new();
    let h = Harness {
        vault: Arc::new(MemoryVault::new()),
        ..h
    };

    let err = h.orchestrator().rotate().await.unwrap_err();

    assert!(matches!(err, RotationError::MissingKeystorePassword { .. }));
    assert_eq!(h.generator.generate_count(), 0);
    h.assert_untouched();
}

#[tokio::test]
async fn test_malformed_previous_jwks_aborts() {
    let h = Harness::new();
    h.vault.insert(&h.names().jwks, "%%% not base64 %%%");

    let err = h.orchestrator().rotate().await.unwrap_err();

    assert!(matches!(err, RotationError::MalformedSecret { .. }));
    h.assert_untouched();
}

#[tokio::test]
async fn test_each_run_reads_a_fresh_snapshot() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();

    // another writer advances the record between two runs
    orchestrator.rotate().await.unwrap();
    h.store.bump_revision();
    let second = orchestrator.rotate().await.unwrap();

    assert_eq!(second.revision, Some(10));
    assert_eq!(h.store.current().unwrap().revision, 10);
}

#[test]
fn test_builder_requires_target_when_pushing() {
    let h = Harness::new();

    let err = RotationOrchestrator::builder()
        .config(h.config.clone())
        .store(h.store.clone())
        .vault(h.vault.clone())
        .generator(h.generator.clone())
        .build()
        .unwrap_err();

    assert!(matches!(err, RotationError::InvalidConfig { .. }));
}
