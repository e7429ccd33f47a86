//! Rotation error taxonomy
//!
//! Every way a run can end other than `Finalized` (or a dry run) is a
//! [`RotationError`]. Variants fall in three classes:
//!
//! - **informational aborts** ([`ConfigNotFound`](RotationError::ConfigNotFound),
//!   [`GuardConflict`](RotationError::GuardConflict)): nothing to do, nothing touched
//! - **aborts**: the run stopped before any target, store or vault write
//! - **post-mutation failures** ([`CommitRejected`](RotationError::CommitRejected),
//!   [`FinalizationFailure`](RotationError::FinalizationFailure)): deployed
//!   artifacts or the persisted configuration were touched
//!
//! Per-target propagation problems are not errors; they are recorded as
//! [`PropagationFailure`] values on the run report.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::model::ModelError;
use crate::ports::{DeployError, GenerationError, StoreError, VaultError};

/// Errors that end a rotation run
#[derive(Debug, Error)]
pub enum RotationError {
    /// The store has no configuration record yet
    #[error("authorization-server configuration not found")]
    ConfigNotFound,

    /// The server's own key regeneration is enabled
    #[error(
        "built-in key regeneration is enabled on the authorization server; \
         refusing to rotate to avoid racing it"
    )]
    GuardConflict,

    /// Policy validation failed
    #[error("invalid rotation policy: {reason}")]
    InvalidPolicy { reason: String },

    /// The orchestrator was built with missing or inconsistent settings
    #[error("invalid rotation configuration: {reason}")]
    InvalidConfig { reason: String },

    /// No keystore password configured and none found in the vault
    #[error("no keystore password configured and secret '{secret}' is absent")]
    MissingKeystorePassword { secret: String },

    /// Reading the configuration record failed
    #[error("configuration store error: {0}")]
    Store(#[from] StoreError),

    /// Reading a secret before any mutation failed
    #[error("failed to read secret '{secret}': {source}")]
    VaultRead {
        secret: String,
        #[source]
        source: VaultError,
    },

    /// A stored secret could not be decoded
    #[error("secret '{secret}' is malformed: {reason}")]
    MalformedSecret { secret: String, reason: String },

    /// The key generator failed
    #[error("key generation failed: {0}")]
    GenerationFailure(#[source] GenerationError),

    /// Carrying an old key's material into the new keystore failed
    #[error("failed to import key '{kid}' into the new keystore: {source}")]
    ImportFailure {
        kid: String,
        #[source]
        source: GenerationError,
    },

    /// A key set could not be built or parsed
    #[error("key set error: {0}")]
    Model(#[from] ModelError),

    /// Writing or reading a local artifact failed
    #[error("artifact {path} error: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Discovering running instances failed
    #[error("target discovery failed: {0}")]
    Discovery(#[source] DeployError),

    /// Propagation is enabled but no instance matched the selector
    #[error("no running instances match selector '{selector}'")]
    NoTargetsFound { selector: String },

    /// The conditional update was rejected; pushed artifacts were rolled back
    #[error(
        "configuration update rejected: {reason} \
         ({} restore failure(s) during rollback)",
        restore_failures.len()
    )]
    CommitRejected {
        reason: String,
        restore_failures: Vec<PropagationFailure>,
    },

    /// Persisting secrets failed after the configuration was committed
    #[error("committed revision {revision} but writing secret '{secret}' failed: {source}")]
    FinalizationFailure {
        revision: u64,
        secret: String,
        #[source]
        source: VaultError,
    },

    /// State transition is not allowed
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl RotationError {
    /// Nothing to rotate; not a failure of the run
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::ConfigNotFound | Self::GuardConflict)
    }

    /// The run stopped before any target, store or vault write
    pub fn is_abort(&self) -> bool {
        !matches!(
            self,
            Self::CommitRejected { .. }
                | Self::FinalizationFailure { .. }
                | Self::InvalidStateTransition { .. }
        )
    }

    /// Deployed artifacts or the persisted configuration may have changed
    pub fn mutated(&self) -> bool {
        !self.is_abort()
    }
}

/// Result type for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;

/// Per-target operation that can fail during propagation or rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationOp {
    Backup,
    Push,
    Restore,
}

impl std::fmt::Display for PropagationOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropagationOp::Backup => write!(f, "backup"),
            PropagationOp::Push => write!(f, "push"),
            PropagationOp::Restore => write!(f, "restore"),
        }
    }
}

/// A logged, non-fatal failure on one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationFailure {
    /// Target name
    pub target: String,
    pub operation: PropagationOp,
    /// Remote path the operation was about
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for PropagationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} on {} failed: {}",
            self.operation,
            self.path.display(),
            self.target,
            self.reason
        )
    }
}
