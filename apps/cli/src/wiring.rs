//! Backend construction from configuration

use std::sync::Arc;

use anyhow::{Context, Result};
use keyrotor_backends::{ConfigBackend, JavaKeyToolchain, TargetBackend, VaultBackend};
use keyrotor_core::RotationOrchestrator;
use keyrotor_core::ports::{ProcessRunner, TokioProcessRunner};

use crate::config::AppConfig;

pub async fn orchestrator(config: &AppConfig) -> Result<RotationOrchestrator> {
    let settings = config.orchestrator_config()?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);

    let store =
        ConfigBackend::from_settings(&config.store).context("failed to set up the config store")?;
    let vault = VaultBackend::connect(&config.vault)
        .await
        .context("failed to set up the secret vault")?;
    let generator = JavaKeyToolchain::new(config.generator.clone(), runner.clone())
        .context("failed to set up the key generator")?;

    let mut builder = RotationOrchestrator::builder()
        .store(Arc::new(store))
        .vault(Arc::new(vault))
        .generator(Arc::new(generator));

    if settings.push_to_targets {
        let target = TargetBackend::connect(&config.targets.backend, runner)
            .await
            .context("failed to set up the deployment target")?;
        builder = builder.target(Arc::new(target));
    }

    tracing::info!(
        backends = %config.backends_line(),
        dry_run = settings.dry_run,
        "backends ready"
    );
    Ok(builder.config(settings).build()?)
}
