use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{RotationState, TargetReport};
use crate::error::{PropagationFailure, RotationResult};
use crate::merge::MergeOutcome;

/// Per-run bookkeeping owned by the orchestrator
#[derive(Debug)]
pub(crate) struct RotationContext {
    pub id: Uuid,
    pub state: RotationState,
    pub started_at: DateTime<Utc>,
    pub expiration_hours: u64,
    pub merge: Option<MergeOutcome>,
    /// Instances propagation reached, in discovery order; rollback scope
    pub touched: Vec<TargetReport>,
    pub failures: Vec<PropagationFailure>,
}

impl RotationContext {
    pub fn new(id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            state: RotationState::Idle,
            started_at,
            expiration_hours: 0,
            merge: None,
            touched: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn advance(&mut self, to: RotationState) -> RotationResult<()> {
        let from = self.state;
        self.state = from.transition_to(to)?;
        tracing::debug!(rotation_id = %self.id, from = %from, state = %to, "state transition");
        Ok(())
    }

    pub fn merged_kids(&self) -> Vec<String> {
        self.merge.as_ref().map(|m| m.merged.kids()).unwrap_or_default()
    }

    pub fn imported_kids(&self) -> Vec<String> {
        self.merge
            .as_ref()
            .map(|m| m.import_requests.clone())
            .unwrap_or_default()
    }
}
