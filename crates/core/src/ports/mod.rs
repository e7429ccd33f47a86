//! Ports to the outside world
//!
//! Each trait here is implemented once per backend in `keyrotor-backends`
//! and once as an in-memory double under the `test-util` feature.

mod keygen;
mod process;
mod store;
mod target;
mod vault;

pub use keygen::{GenerateRequest, GeneratedKeys, GenerationError, KeyMaterialGenerator};
pub use process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use store::{ConfigStore, ConfigUpdate, StoreError, UpdateOutcome};
pub use target::{DeployError, DeploymentTarget, TargetHandle, backup_path};
pub use vault::{SecretNames, SecretVault, VaultError, decode_base64, encode_base64};
