//! In-memory doubles of every port
//!
//! Enabled with the `test-util` feature. Each double counts calls and can
//! be told to fail, so tests can assert exactly which collaborators a run
//! touched.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::clock::Clock;
use crate::model::{AuthServerConfig, Jwk, JwkSet, KeystoreArtifact};
use crate::ports::{
    CommandSpec, ConfigStore, ConfigUpdate, DeployError, DeploymentTarget, GenerateRequest,
    GeneratedKeys, GenerationError, KeyMaterialGenerator, ProcessError, ProcessOutput,
    ProcessRunner, SecretVault, StoreError, TargetHandle, UpdateOutcome, VaultError, backup_path,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Config store ───

/// Config store with a real compare-and-swap on the revision
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    record: Mutex<Option<AuthServerConfig>>,
    fail_on_read: AtomicBool,
    reject_on_update: AtomicBool,
    race_after_read: AtomicBool,
    read_count: AtomicU32,
    update_count: AtomicU32,
}

impl MemoryConfigStore {
    /// Empty store; reads return "not found"
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AuthServerConfig) -> Self {
        let store = Self::new();
        *lock(&store.record) = Some(config);
        store
    }

    /// Make the next read fail with a backend error
    pub fn fail_next_read(&self) {
        self.fail_on_read.store(true, Ordering::SeqCst);
    }

    /// Make the next update be rejected
    pub fn reject_next_update(&self) {
        self.reject_on_update.store(true, Ordering::SeqCst);
    }

    /// Let another writer commit right after the next read is served, so
    /// the caller's update loses the compare-and-swap
    pub fn race_next_read(&self) {
        self.race_after_read.store(true, Ordering::SeqCst);
    }

    /// Change the stored revision behind the caller's back
    pub fn bump_revision(&self) {
        if let Some(record) = lock(&self.record).as_mut() {
            record.revision += 1;
        }
    }

    pub fn current(&self) -> Option<AuthServerConfig> {
        lock(&self.record).clone()
    }

    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> u32 {
        self.update_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn read(&self) -> Result<Option<AuthServerConfig>, StoreError> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_read.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mock failure".to_string()));
        }
        let mut record = lock(&self.record);
        let snapshot = record.clone();
        if self.race_after_read.swap(false, Ordering::SeqCst) {
            if let Some(stored) = record.as_mut() {
                stored.revision += 1;
            }
        }
        Ok(snapshot)
    }

    async fn conditional_update(&self, update: ConfigUpdate) -> UpdateOutcome {
        self.update_count.fetch_add(1, Ordering::SeqCst);
        if self.reject_on_update.swap(false, Ordering::SeqCst) {
            return UpdateOutcome::rejected("mock failure");
        }

        let mut guard = lock(&self.record);
        let Some(record) = guard.as_mut() else {
            return UpdateOutcome::rejected("no record");
        };
        if record.id != update.id {
            return UpdateOutcome::rejected(format!("unknown record {}", update.id));
        }
        if record.revision != update.expected_current() {
            return UpdateOutcome::rejected(format!(
                "revision conflict: stored {}, expected {}",
                record.revision,
                update.expected_current()
            ));
        }

        record.revision = update.revision;
        record.dynamic = update.dynamic;
        record.web_keys = update.web_keys;
        UpdateOutcome::Committed
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ─── Vault ───

#[derive(Debug, Default)]
pub struct MemoryVault {
    secrets: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_set_of: Mutex<Option<String>>,
    get_count: AtomicU32,
    set_count: AtomicU32,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a secret without counting it as a write
    pub fn insert(&self, name: &str, value: impl Into<Vec<u8>>) {
        lock(&self.secrets).insert(name.to_string(), value.into());
    }

    /// Make every write of `name` fail
    pub fn fail_set_of(&self, name: &str) {
        *lock(&self.fail_set_of) = Some(name.to_string());
    }

    pub fn value(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.secrets).get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        lock(&self.secrets).clone()
    }

    pub fn get_count(&self) -> u32 {
        self.get_count.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> u32 {
        self.set_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretVault for MemoryVault {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, VaultError> {
        self.get_count.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.secrets).get(name).cloned())
    }

    async fn set(&self, name: &str, value: &[u8]) -> Result<(), VaultError> {
        self.set_count.fetch_add(1, Ordering::SeqCst);
        if lock(&self.fail_set_of).as_deref() == Some(name) {
            return Err(VaultError::Write {
                name: name.to_string(),
                reason: "mock failure".to_string(),
            });
        }
        lock(&self.secrets).insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ─── Deployment target ───

/// Running instances with an in-memory file system each
#[derive(Debug, Default)]
pub struct MemoryTarget {
    handles: Mutex<Vec<TargetHandle>>,
    files: Mutex<HashMap<(String, PathBuf), Vec<u8>>>,
    fail_backup_on: Mutex<Vec<String>>,
    fail_push_on: Mutex<Vec<String>>,
    fail_restore_on: Mutex<Vec<String>>,
    discover_count: AtomicU32,
    write_count: AtomicU32,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running instance; its id doubles as its name
    pub fn add_instance(&self, name: &str) -> TargetHandle {
        let handle = TargetHandle::new(name, name);
        lock(&self.handles).push(handle.clone());
        handle
    }

    pub fn put_file(&self, instance: &str, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let key = (instance.to_string(), path.as_ref().to_path_buf());
        lock(&self.files).insert(key, content.into());
    }

    pub fn file(&self, instance: &str, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        lock(&self.files)
            .get(&(instance.to_string(), path.as_ref().to_path_buf()))
            .cloned()
    }

    pub fn fail_backup_on(&self, instance: &str) {
        lock(&self.fail_backup_on).push(instance.to_string());
    }

    pub fn fail_push_on(&self, instance: &str) {
        lock(&self.fail_push_on).push(instance.to_string());
    }

    pub fn fail_restore_on(&self, instance: &str) {
        lock(&self.fail_restore_on).push(instance.to_string());
    }

    pub fn discover_count(&self) -> u32 {
        self.discover_count.load(Ordering::SeqCst)
    }

    /// Backups, pushes and restores that changed a file
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::SeqCst)
    }

    fn check(
        &self,
        list: &Mutex<Vec<String>>,
        handle: &TargetHandle,
        operation: &'static str,
    ) -> Result<(), DeployError> {
        if lock(list).contains(&handle.id) {
            return Err(DeployError::command(&handle.name, operation, "mock failure"));
        }
        Ok(())
    }

    fn copy(
        &self,
        handle: &TargetHandle,
        from: &Path,
        to: &Path,
        operation: &'static str,
    ) -> Result<(), DeployError> {
        let mut files = lock(&self.files);
        let content = files
            .get(&(handle.id.clone(), from.to_path_buf()))
            .cloned()
            .ok_or_else(|| {
                let reason = format!("{}: no such file", from.display());
                DeployError::command(&handle.name, operation, reason)
            })?;
        files.insert((handle.id.clone(), to.to_path_buf()), content);
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DeploymentTarget for MemoryTarget {
    async fn discover(&self, _selector: &str) -> Result<Vec<TargetHandle>, DeployError> {
        self.discover_count.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.handles).clone())
    }

    async fn backup(&self, handle: &TargetHandle, path: &Path) -> Result<(), DeployError> {
        self.check(&self.fail_backup_on, handle, "backup")?;
        self.copy(handle, path, &backup_path(path), "backup")
    }

    async fn push(
        &self,
        handle: &TargetHandle,
        local: &Path,
        remote_path: &Path,
    ) -> Result<(), DeployError> {
        self.check(&self.fail_push_on, handle, "push")?;
        let content = tokio::fs::read(local)
            .await
            .map_err(|source| DeployError::LocalArtifact {
                path: local.to_path_buf(),
                source,
            })?;
        lock(&self.files).insert((handle.id.clone(), remote_path.to_path_buf()), content);
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn restore(&self, handle: &TargetHandle, path: &Path) -> Result<(), DeployError> {
        self.check(&self.fail_restore_on, handle, "restore")?;
        self.copy(handle, &backup_path(path), path, "restore")
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ─── Key generator ───

/// Generator that returns a fixed key set
///
/// The keystore it writes is a JSON object mapping each alias to a
/// placeholder string, so imports can be checked by reading it back with
/// [`StubKeyGenerator::aliases`].
#[derive(Debug, Default)]
pub struct StubKeyGenerator {
    keys: Mutex<Vec<Jwk>>,
    fail_generate: AtomicBool,
    fail_import: AtomicBool,
    requests: Mutex<Vec<GenerateRequest>>,
    imports: Mutex<Vec<String>>,
}

impl StubKeyGenerator {
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self {
            keys: Mutex::new(keys),
            ..Self::default()
        }
    }

    pub fn fail_next_generate(&self) {
        self.fail_generate.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_import(&self) {
        self.fail_import.store(true, Ordering::SeqCst);
    }

    pub fn generate_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn last_expiration_hours(&self) -> Option<u64> {
        lock(&self.requests).last().map(|r| r.expiration_hours)
    }

    pub fn last_password(&self) -> Option<String> {
        lock(&self.requests)
            .last()
            .map(|r| r.password.expose_secret().to_string())
    }

    /// Aliases imported so far, in call order
    pub fn imported(&self) -> Vec<String> {
        lock(&self.imports).clone()
    }

    /// Serialized stub keystore holding the given aliases
    pub fn keystore_bytes(aliases: &[&str]) -> Vec<u8> {
        let map: BTreeMap<&str, String> =
            aliases.iter().map(|a| (*a, format!("material-{a}"))).collect();
        serde_json::to_vec(&map).unwrap_or_default()
    }

    /// Aliases held by a stub keystore
    pub fn aliases(keystore: &[u8]) -> Vec<String> {
        serde_json::from_slice::<BTreeMap<String, String>>(keystore)
            .map(|m| m.into_keys().collect())
            .unwrap_or_default()
    }

    async fn read_store(path: &Path) -> Result<BTreeMap<String, String>, GenerationError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| GenerationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| GenerationError::InvalidOutput(e.to_string()))
    }

    async fn write_store(
        path: &Path,
        store: &BTreeMap<String, String>,
    ) -> Result<(), GenerationError> {
        let bytes = serde_json::to_vec(store)
            .map_err(|e| GenerationError::InvalidOutput(e.to_string()))?;
        tokio::fs::write(path, bytes).await.map_err(|source| GenerationError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[async_trait]
impl KeyMaterialGenerator for StubKeyGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedKeys, GenerationError> {
        lock(&self.requests).push(request.clone());
        if self.fail_generate.swap(false, Ordering::SeqCst) {
            return Err(GenerationError::NonZeroExit {
                tool: "stub".to_string(),
                exit_code: Some(1),
                stderr: "mock failure".to_string(),
            });
        }

        let keys = lock(&self.keys).clone();
        let store: BTreeMap<String, String> = keys
            .iter()
            .map(|k| (k.kid.clone(), format!("material-{}", k.kid)))
            .collect();
        Self::write_store(&request.output_keystore, &store).await?;

        Ok(GeneratedKeys {
            keys: JwkSet::new(keys).map_err(|e| GenerationError::InvalidOutput(e.to_string()))?,
            keystore: KeystoreArtifact::new(&request.output_keystore),
        })
    }

    async fn import_alias(
        &self,
        source: &KeystoreArtifact,
        destination: &KeystoreArtifact,
        alias: &str,
        _password: &SecretString,
    ) -> Result<(), GenerationError> {
        if self.fail_import.swap(false, Ordering::SeqCst) {
            return Err(GenerationError::NonZeroExit {
                tool: "stub".to_string(),
                exit_code: Some(1),
                stderr: "mock failure".to_string(),
            });
        }

        let from = Self::read_store(source.path()).await?;
        let material = from.get(alias).cloned().ok_or_else(|| GenerationError::NonZeroExit {
            tool: "stub".to_string(),
            exit_code: Some(1),
            stderr: format!("alias <{alias}> does not exist"),
        })?;
        let mut to = Self::read_store(destination.path()).await?;
        to.insert(alias.to_string(), material);
        Self::write_store(destination.path(), &to).await?;

        lock(&self.imports).push(alias.to_string());
        Ok(())
    }
}

// ─── Clock ───

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn from_millis(millis: i64) -> Self {
        Self(Utc.timestamp_millis_opt(millis).single().unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ─── Process runner ───

/// A command as the runner saw it, secrets exposed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl RecordedCommand {
    /// Program and arguments joined by spaces
    pub fn line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug)]
enum Scripted {
    Output(ProcessOutput),
    Timeout,
}

/// Runner that answers from a script and records every command
///
/// Unscripted calls succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCommand>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_success(&self, stdout: impl Into<Vec<u8>>) {
        lock(&self.script).push_back(Scripted::Output(ProcessOutput {
            stdout: stdout.into(),
            stderr: Vec::new(),
            exit_code: Some(0),
        }));
    }

    pub fn push_failure(&self, exit_code: i32, stderr: &str) {
        lock(&self.script).push_back(Scripted::Output(ProcessOutput {
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
            exit_code: Some(exit_code),
        }));
    }

    pub fn push_timeout(&self) {
        lock(&self.script).push_back(Scripted::Timeout);
    }

    pub fn calls(&self) -> Vec<RecordedCommand> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        lock(&self.calls).push(RecordedCommand {
            program: command.program().to_string(),
            args: command.exposed_args().map(str::to_string).collect(),
            stdin: command.stdin_bytes().map(<[u8]>::to_vec),
        });

        match lock(&self.script).pop_front() {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Timeout) => Err(ProcessError::Timeout {
                program: command.program().to_string(),
                timeout: command.timeout_duration(),
            }),
            None => Ok(ProcessOutput {
                exit_code: Some(0),
                ..ProcessOutput::default()
            }),
        }
    }
}
