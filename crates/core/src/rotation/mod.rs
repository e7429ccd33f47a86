//! Rotation run: state machine, fan-out and orchestrator

mod context;
mod orchestrator;
mod propagation;
mod report;
mod state;

pub use orchestrator::{
    ArtifactPaths, OrchestratorConfig, RotationOrchestrator, RotationOrchestratorBuilder,
};
pub use propagation::ArtifactFile;
pub use report::{RotationReport, TargetReport};
pub use state::RotationState;
