//! Run report

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::RotationState;
use crate::error::PropagationFailure;
use crate::ports::TargetHandle;

/// What happened on one running instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub target: TargetHandle,
    /// Remote files with a fresh backup; these are the ones restored on rollback
    pub backed_up: Vec<PathBuf>,
    /// Remote files replaced with the new artifacts
    pub pushed: Vec<PathBuf>,
}

impl TargetReport {
    pub fn new(target: TargetHandle) -> Self {
        Self {
            target,
            backed_up: Vec::new(),
            pushed: Vec::new(),
        }
    }

    /// Every file was pushed
    pub fn is_complete(&self, expected_files: usize) -> bool {
        self.pushed.len() == expected_files
    }
}

/// Outcome of a run that did not fail
#[derive(Debug, Clone, Serialize)]
pub struct RotationReport {
    pub rotation_id: Uuid,
    /// `Finalized`, or `Merged` for a dry run
    pub final_state: RotationState,
    /// Revision written to the store; `None` for a dry run
    pub revision: Option<u64>,
    pub expiration_hours: u64,
    pub merged_kids: Vec<String>,
    pub imported_kids: Vec<String>,
    pub targets: Vec<TargetReport>,
    pub propagation_failures: Vec<PropagationFailure>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RotationReport {
    /// One-line human summary
    pub fn summary(&self) -> String {
        let mut line = if self.dry_run {
            format!(
                "dry run {}: {} key(s) would be published ({} carried over)",
                self.rotation_id,
                self.merged_kids.len(),
                self.imported_kids.len()
            )
        } else {
            format!(
                "rotation {} finalized at revision {}: {} key(s) published ({} carried over), \
                 {} target(s) updated",
                self.rotation_id,
                self.revision.unwrap_or_default(),
                self.merged_kids.len(),
                self.imported_kids.len(),
                self.targets.len()
            )
        };
        if !self.propagation_failures.is_empty() {
            line.push_str(&format!(
                ", {} propagation failure(s)",
                self.propagation_failures.len()
            ));
        }
        line
    }
}
