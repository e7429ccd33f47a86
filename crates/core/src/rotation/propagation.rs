//! Fan-out of artifacts to running instances
//!
//! Instances are handled concurrently up to a parallelism bound; within
//! one instance every file is backed up before it is pushed, one file at a
//! time. A failed backup does not stop the push; only files with a backup
//! are put back on rollback.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};

use super::TargetReport;
use crate::error::{PropagationFailure, PropagationOp};
use crate::ports::{DeploymentTarget, TargetHandle};

/// A local artifact and where it goes inside each instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub local: PathBuf,
    pub remote: PathBuf,
}

impl ArtifactFile {
    /// Same path locally and inside the instance
    pub fn mirrored(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            local: path.clone(),
            remote: path,
        }
    }
}

fn failure(
    handle: &TargetHandle,
    operation: PropagationOp,
    path: &Path,
    reason: String,
) -> PropagationFailure {
    let failure = PropagationFailure {
        target: handle.name.clone(),
        operation,
        path: path.to_path_buf(),
        reason,
    };
    tracing::warn!(
        target_name = %failure.target,
        operation = %failure.operation,
        path = %failure.path.display(),
        reason = %failure.reason,
        "propagation step failed"
    );
    failure
}

async fn push_one(
    target: &dyn DeploymentTarget,
    handle: TargetHandle,
    files: &[ArtifactFile],
) -> (TargetReport, Vec<PropagationFailure>) {
    let mut report = TargetReport::new(handle);
    let mut failures = Vec::new();

    for file in files {
        match target.backup(&report.target, &file.remote).await {
            Ok(()) => report.backed_up.push(file.remote.clone()),
            Err(e) => failures.push(failure(
                &report.target,
                PropagationOp::Backup,
                &file.remote,
                e.to_string(),
            )),
        }

        match target.push(&report.target, &file.local, &file.remote).await {
            Ok(()) => {
                tracing::debug!(
                    target_name = %report.target,
                    path = %file.remote.display(),
                    "artifact pushed"
                );
                report.pushed.push(file.remote.clone());
            }
            Err(e) => failures.push(failure(
                &report.target,
                PropagationOp::Push,
                &file.remote,
                e.to_string(),
            )),
        }
    }

    (report, failures)
}

/// Back up and push every file to every handle; reports keep handle order
pub(crate) async fn push_all(
    target: &dyn DeploymentTarget,
    handles: Vec<TargetHandle>,
    files: &[ArtifactFile],
    max_parallel: usize,
) -> (Vec<TargetReport>, Vec<PropagationFailure>) {
    let results: Vec<_> = stream::iter(handles)
        .map(|handle| push_one(target, handle, files))
        .buffered(max_parallel.max(1))
        .collect()
        .await;

    let mut reports = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (report, mut errs) in results {
        reports.push(report);
        failures.append(&mut errs);
    }
    (reports, failures)
}

async fn restore_one(
    target: &dyn DeploymentTarget,
    report: &TargetReport,
) -> Vec<PropagationFailure> {
    let mut failures = Vec::new();
    for path in &report.backed_up {
        match target.restore(&report.target, path).await {
            Ok(()) => tracing::info!(
                target_name = %report.target,
                path = %path.display(),
                "artifact restored"
            ),
            Err(e) => failures.push(failure(
                &report.target,
                PropagationOp::Restore,
                path,
                e.to_string(),
            )),
        }
    }
    failures
}

/// Put back every backed-up file; returns the restores that failed
pub(crate) async fn restore_all(
    target: &dyn DeploymentTarget,
    reports: &[TargetReport],
    max_parallel: usize,
) -> Vec<PropagationFailure> {
    stream::iter(reports)
        .map(|report| restore_one(target, report))
        .buffered(max_parallel.max(1))
        .flat_map(stream::iter)
        .collect()
        .await
}
