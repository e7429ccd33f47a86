//! # keyrotor-core
//!
//! Key-set merge engine and rotation orchestrator for authorization-server
//! key material.
//!
//! A rotation run reads the server's configuration record, generates a
//! fresh key set, carries over still-valid keys of the previous rotation
//! (bounded per algorithm), pushes the resulting keystore and JWKS to every
//! running instance, then advances the configuration with a
//! compare-and-swap and persists the new secrets. A rejected commit puts
//! every pushed file back.
//!
//! Backends live in `keyrotor-backends`; this crate only knows the port
//! traits in [`ports`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keyrotor_core::prelude::*;
//!
//! let orchestrator = RotationOrchestrator::builder()
//!     .config(OrchestratorConfig::default())
//!     .store(Arc::new(store))
//!     .target(Arc::new(target))
//!     .vault(Arc::new(vault))
//!     .generator(Arc::new(generator))
//!     .build()?;
//!
//! let report = orchestrator.rotate().await?;
//! println!("{}", report.summary());
//! ```

pub mod clock;
pub mod error;
pub mod merge;
pub mod model;
pub mod policy;
pub mod ports;
pub mod rotation;

#[cfg(feature = "test-util")]
pub mod testing;

pub use error::{PropagationFailure, PropagationOp, RotationError, RotationResult};
pub use merge::{KeySetMerger, MergeOutcome};
pub use policy::{RotationPolicy, compute_expiration_hours};
pub use rotation::{
    ArtifactPaths, OrchestratorConfig, RotationOrchestrator, RotationReport, RotationState,
    TargetReport,
};

/// Common imports
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::error::{PropagationFailure, RotationError, RotationResult};
    pub use crate::merge::{KeySetMerger, MergeOutcome};
    pub use crate::model::{
        Algorithm, AuthServerConfig, DynamicConfig, Jwk, JwkSet, KeystoreArtifact,
    };
    pub use crate::policy::RotationPolicy;
    pub use crate::ports::{
        ConfigStore, DeploymentTarget, KeyMaterialGenerator, ProcessRunner, SecretNames,
        SecretVault, TargetHandle,
    };
    pub use crate::rotation::{
        ArtifactPaths, OrchestratorConfig, RotationOrchestrator, RotationReport, RotationState,
    };
}
