//! Rotations through the docker target and the file vault

use std::sync::Arc;

use keyrotor_backends::{DockerConfig, DockerTarget, FileVault, FileVaultConfig};
use keyrotor_core::model::{Algorithm, AuthServerConfig, DynamicConfig, Jwk, JwkSet};
use keyrotor_core::ports::{SecretNames, SecretVault, decode_base64};
use keyrotor_core::testing::{FixedClock, MemoryConfigStore, ScriptedRunner, StubKeyGenerator};
use keyrotor_core::{ArtifactPaths, OrchestratorConfig, RotationOrchestrator, RotationState};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000_000;
const DAY: i64 = 86_400_000;

struct Setup {
    dir: TempDir,
    store: Arc<MemoryConfigStore>,
    vault: Arc<FileVault>,
    config: OrchestratorConfig,
}

impl Setup {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = MemoryConfigStore::with_config(AuthServerConfig {
            id: "configuration_oxauth".to_string(),
            revision: 7,
            dynamic: DynamicConfig::from_value(json!({
                "keyRegenerationEnabled": false,
                "idTokenLifetime": 3600
            }))
            .unwrap(),
            web_keys: JwkSet::default(),
        });
        let vault = FileVault::new(FileVaultConfig {
            path: dir.path().join("secrets.json"),
        })
        .unwrap();
        let config = OrchestratorConfig {
            keystore_password: Some(SecretString::from("pw".to_string())),
            artifacts: ArtifactPaths {
                keystore: dir.path().join("keys.jks"),
                jwks: dir.path().join("keys.json"),
                previous_keystore: dir.path().join("keys.old.jks"),
            },
            ..OrchestratorConfig::default()
        };

        Self {
            dir,
            store: Arc::new(store),
            vault: Arc::new(vault),
            config,
        }
    }

    fn orchestrator(&self, runner: &Arc<ScriptedRunner>, new_key: Jwk) -> RotationOrchestrator {
        let docker = DockerTarget::new(DockerConfig::default(), runner.clone()).unwrap();
        RotationOrchestrator::builder()
            .config(self.config.clone())
            .store(self.store.clone())
            .target(Arc::new(docker))
            .vault(self.vault.clone())
            .generator(Arc::new(StubKeyGenerator::new(vec![new_key])))
            .clock(Arc::new(FixedClock::from_millis(NOW)))
            .build()
            .unwrap()
    }

    async fn secret(&self, name: &str) -> Vec<u8> {
        self.vault.get(name).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_first_rotation_pushes_with_docker_and_persists_to_file() {
    let setup = Setup::new();
    let runner = Arc::new(ScriptedRunner::new());
    runner.push_success("c1 auth-0\n");

    let report = setup
        .orchestrator(&runner, Jwk::new("k1", Algorithm::Rs256, NOW + DAY))
        .rotate()
        .await
        .unwrap();

    assert_eq!(report.final_state, RotationState::Finalized);
    assert_eq!(report.revision, Some(8));
    assert!(report.imported_kids.is_empty());

    let keystore = setup.config.artifacts.keystore.display().to_string();
    let jwks = setup.config.artifacts.jwks.display().to_string();
    let lines: Vec<String> = runner.calls().iter().map(|c| c.line()).collect();
    assert_eq!(
        lines,
        vec![
            "docker ps --filter label=APP_NAME=oxauth --format {{.ID}} {{.Names}}".to_string(),
            format!("docker exec c1 cp {keystore} {keystore}.backup"),
            format!("docker cp {keystore} c1:{keystore}"),
            format!("docker exec c1 cp {jwks} {jwks}.backup"),
            format!("docker cp {jwks} c1:{jwks}"),
        ]
    );

    let names = SecretNames::default();
    let stored_keystore = decode_base64(&setup.secret(&names.keystore).await).unwrap();
    assert_eq!(StubKeyGenerator::aliases(&stored_keystore), vec!["k1"]);
    assert_eq!(setup.secret(&names.keystore_password).await, b"pw");
    assert_eq!(setup.secret(&names.rotated_at).await, b"1700000000");
    assert!(setup.dir.path().join("secrets.json").exists());
}

#[tokio::test]
async fn test_second_rotation_carries_over_from_file_vault() {
    let setup = Setup::new();

    let first = Arc::new(ScriptedRunner::new());
    first.push_success("c1 auth-0\n");
    setup
        .orchestrator(&first, Jwk::new("k1", Algorithm::Rs256, NOW + DAY))
        .rotate()
        .await
        .unwrap();

    let second = Arc::new(ScriptedRunner::new());
    second.push_success("c1 auth-0\n");
    let report = setup
        .orchestrator(&second, Jwk::new("k2", Algorithm::Rs256, NOW + 2 * DAY))
        .rotate()
        .await
        .unwrap();

    assert_eq!(report.revision, Some(9));
    assert_eq!(report.merged_kids, vec!["k2", "k1"]);
    assert_eq!(report.imported_kids, vec!["k1"]);

    let names = SecretNames::default();
    let stored_keystore = decode_base64(&setup.secret(&names.keystore).await).unwrap();
    assert_eq!(StubKeyGenerator::aliases(&stored_keystore), vec!["k1", "k2"]);
    let stored_jwks = decode_base64(&setup.secret(&names.jwks).await).unwrap();
    assert_eq!(JwkSet::from_json_slice(&stored_jwks).unwrap().kids(), vec!["k2", "k1"]);
    assert_eq!(setup.store.current().unwrap().web_keys.kids(), vec!["k2", "k1"]);
}

#[tokio::test]
async fn test_docker_push_failure_is_reported_not_fatal() {
    let setup = Setup::new();
    let runner = Arc::new(ScriptedRunner::new());
    runner.push_success("c1 auth-0\n");
    runner.push_success("");
    runner.push_failure(1, "no space left on device");

    let report = setup
        .orchestrator(&runner, Jwk::new("k1", Algorithm::Rs256, NOW + DAY))
        .rotate()
        .await
        .unwrap();

    assert_eq!(report.final_state, RotationState::Finalized);
    assert_eq!(report.propagation_failures.len(), 1);
    assert!(report.propagation_failures[0].reason.contains("no space left on device"));
}
