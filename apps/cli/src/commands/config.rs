//! `keyrotor config check|show`

use std::process::ExitCode;

use anyhow::Result;

use crate::config::AppConfig;

pub fn check(config: &AppConfig) -> Result<ExitCode> {
    config.validate()?;
    println!("configuration OK: {}", config.backends_line());
    Ok(ExitCode::SUCCESS)
}

pub fn show(config: &AppConfig) -> Result<ExitCode> {
    print!("{}", config.to_toml()?);
    Ok(ExitCode::SUCCESS)
}
