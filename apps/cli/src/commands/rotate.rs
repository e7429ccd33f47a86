//! `keyrotor rotate`

use std::process::ExitCode;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::wiring;

pub async fn run(config: AppConfig, json: bool) -> Result<ExitCode> {
    config.validate()?;
    let orchestrator = wiring::orchestrator(&config).await?;

    match orchestrator.rotate().await {
        Ok(report) => {
            if json {
                let rendered =
                    serde_json::to_string_pretty(&report).context("failed to render report")?;
                println!("{rendered}");
            } else {
                println!("{}", report.summary());
            }
            for failure in &report.propagation_failures {
                tracing::warn!(%failure, "instance left behind");
            }
            Ok(ExitCode::SUCCESS)
        }
        // nothing to rotate yet, or the server rotates its own keys
        Err(e) if e.is_informational() => {
            println!("nothing to do: {e}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if e.mutated() {
                tracing::error!(error = %e, "rotation failed after changing shared state");
            }
            Err(anyhow::Error::new(e).context("rotation failed"))
        }
    }
}
