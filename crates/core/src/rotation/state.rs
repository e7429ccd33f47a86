//! Rotation run state machine
//!
//! ```text
//! Idle → ConfigLoaded → GuardChecked → Generated → Merged → TargetsPushed → Committed
//!  ↓          ↓              ↓             ↓         ↓            ↓             ↓
//!  → → → → → Aborted ← ← ← ← ← ← ← ← ← ← ← ←      RolledBack     Finalized
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{RotationError, RotationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    /// Nothing read yet
    Idle,
    /// Configuration snapshot loaded
    ConfigLoaded,
    /// Server-side regeneration confirmed off
    GuardChecked,
    /// Fresh keys and keystore produced
    Generated,
    /// Old keys merged, local artifacts written
    Merged,
    /// Artifacts propagated to running instances (or propagation skipped)
    TargetsPushed,
    /// Configuration record advanced
    Committed,
    /// Secrets persisted
    Finalized,
    /// Stopped before any mutation
    Aborted,
    /// Commit rejected, pushed artifacts restored
    RolledBack,
}

impl RotationState {
    #[must_use]
    pub fn can_transition_to(&self, target: RotationState) -> bool {
        use RotationState::*;

        match (self, target) {
            (Idle, ConfigLoaded)
            | (ConfigLoaded, GuardChecked)
            | (GuardChecked, Generated)
            | (Generated, Merged)
            | (Merged, TargetsPushed)
            | (TargetsPushed, Committed)
            | (Committed, Finalized) => true,

            (Idle | ConfigLoaded | GuardChecked | Generated | Merged, Aborted) => true,

            (TargetsPushed, RolledBack) => true,

            _ => false,
        }
    }

    pub fn transition_to(&self, target: RotationState) -> RotationResult<RotationState> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(RotationError::InvalidStateTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RotationState::Finalized | RotationState::Aborted | RotationState::RolledBack
        )
    }
}

impl std::fmt::Display for RotationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RotationState::Idle => "idle",
            RotationState::ConfigLoaded => "config_loaded",
            RotationState::GuardChecked => "guard_checked",
            RotationState::Generated => "generated",
            RotationState::Merged => "merged",
            RotationState::TargetsPushed => "targets_pushed",
            RotationState::Committed => "committed",
            RotationState::Finalized => "finalized",
            RotationState::Aborted => "aborted",
            RotationState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_chain() {
        let chain = [
            RotationState::Idle,
            RotationState::ConfigLoaded,
            RotationState::GuardChecked,
            RotationState::Generated,
            RotationState::Merged,
            RotationState::TargetsPushed,
            RotationState::Committed,
            RotationState::Finalized,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_abort_only_before_mutation() {
        assert!(RotationState::Merged.can_transition_to(RotationState::Aborted));
        assert!(!RotationState::TargetsPushed.can_transition_to(RotationState::Aborted));
        assert!(!RotationState::Committed.can_transition_to(RotationState::Aborted));
    }

    #[test]
    fn test_rollback_only_after_push() {
        assert!(RotationState::TargetsPushed.can_transition_to(RotationState::RolledBack));
        assert!(!RotationState::Merged.can_transition_to(RotationState::RolledBack));
        assert!(!RotationState::Committed.can_transition_to(RotationState::RolledBack));
    }

    #[test]
    fn test_no_skipping_or_leaving_terminal_states() {
        assert!(!RotationState::Idle.can_transition_to(RotationState::Generated));
        assert!(!RotationState::Finalized.can_transition_to(RotationState::Idle));
        assert!(!RotationState::Aborted.can_transition_to(RotationState::ConfigLoaded));

        let err = RotationState::GuardChecked
            .transition_to(RotationState::Committed)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state transition from guard_checked to committed"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(RotationState::Finalized.is_terminal());
        assert!(RotationState::Aborted.is_terminal());
        assert!(RotationState::RolledBack.is_terminal());
        assert!(!RotationState::Committed.is_terminal());
        assert!(!RotationState::Merged.is_terminal());
    }
}
