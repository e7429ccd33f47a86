//! Configuration store port

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{AuthServerConfig, DynamicConfig, JwkSet};

/// Errors from reading the configuration record
///
/// Updates never fail with an error; any backend failure during an update
/// is reported as [`UpdateOutcome::Rejected`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the request
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    /// The record exists but could not be decoded
    #[error("malformed configuration record {id}: {reason}")]
    Malformed { id: String, reason: String },
}

/// Replacement content for the configuration record
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigUpdate {
    /// Record identifier from the snapshot
    pub id: String,

    /// Revision to write; the store only accepts it when the current
    /// revision is exactly one less
    pub revision: u64,

    pub dynamic: DynamicConfig,
    pub web_keys: JwkSet,
}

impl ConfigUpdate {
    /// Revision the record must currently hold for the update to apply
    pub fn expected_current(&self) -> u64 {
        self.revision.saturating_sub(1)
    }
}

/// Result of a conditional update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Both content fields and the revision were written
    Committed,
    /// Nothing changed
    Rejected { reason: String },
}

impl UpdateOutcome {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Persisted authorization-server configuration
///
/// The namespace is fixed when the store is constructed.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the configuration record, `None` when it does not exist yet
    async fn read(&self) -> Result<Option<AuthServerConfig>, StoreError>;

    /// Atomically replace dynamic settings and web keys and advance the
    /// revision, guarded by compare-and-swap on the previous revision
    async fn conditional_update(&self, update: ConfigUpdate) -> UpdateOutcome;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}
