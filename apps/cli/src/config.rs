//! Layered application configuration
//!
//! Built-in defaults, then the TOML file, then `KEYROTOR_*` environment
//! variables (`__` separates sections, e.g. `KEYROTOR_STORE__NAMESPACE`),
//! then command-line overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use keyrotor_backends::{
    BackendConfig, JavaToolchainConfig, PersistenceType, StoreSettings, TargetSettings,
    VaultSettings,
};
use keyrotor_core::ports::SecretNames;
use keyrotor_core::{ArtifactPaths, OrchestratorConfig, RotationPolicy};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "keyrotor.toml";
pub const ENV_PREFIX: &str = "KEYROTOR_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rotation: RotationSection,
    pub artifacts: ArtifactPaths,
    pub generator: JavaToolchainConfig,
    pub store: StoreSettings,
    pub targets: TargetsSection,
    pub vault: VaultSettings,
    pub secrets: SecretNames,
    pub log: keyrotor_log::Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSection {
    pub interval_hours: u64,
    pub quota_per_alg: usize,
    pub dry_run: bool,
    pub push_to_targets: bool,
    pub max_parallel_targets: usize,
    pub distinguished_name: String,
    /// Read from the vault when unset
    #[serde(skip_serializing)]
    pub keystore_password: Option<SecretString>,
}

impl Default for RotationSection {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            interval_hours: defaults.policy.interval_hours(),
            quota_per_alg: defaults.policy.quota_per_alg(),
            dry_run: defaults.dry_run,
            push_to_targets: defaults.push_to_targets,
            max_parallel_targets: defaults.max_parallel_targets,
            distinguished_name: defaults.distinguished_name,
            keystore_password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetsSection {
    /// Label selector of running server instances
    pub selector: String,
    #[serde(flatten)]
    pub backend: TargetSettings,
}

impl Default for TargetsSection {
    fn default() -> Self {
        Self {
            selector: OrchestratorConfig::default().selector,
            backend: TargetSettings::default(),
        }
    }
}

/// Command-line values layered over everything else
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub dry_run: bool,
    pub no_push: bool,
    pub interval_hours: Option<u64>,
}

/// Where the configuration file comes from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// `keyrotor.toml` in the working directory, if present
    Default,
    /// Explicitly requested; must exist
    Explicit(PathBuf),
}

impl ConfigSource {
    pub fn from_arg(path: Option<PathBuf>) -> Self {
        path.map_or(Self::Default, Self::Explicit)
    }

    fn path(&self) -> &Path {
        match self {
            Self::Default => Path::new(DEFAULT_CONFIG_FILE),
            Self::Explicit(path) => path,
        }
    }
}

impl AppConfig {
    /// All layers except the command line
    pub fn figment(source: &ConfigSource) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(source.path()))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    // KEYROTOR_LOG is the log filter, not the log section
                    .filter(|key| !key.as_str().eq_ignore_ascii_case("log"))
                    .split("__"),
            )
    }

    pub fn load(source: &ConfigSource, overrides: &Overrides) -> Result<Self> {
        if let ConfigSource::Explicit(path) = source {
            if !path.is_file() {
                bail!("configuration file {} does not exist", path.display());
            }
        }

        let mut figment = Self::figment(source);
        if overrides.dry_run {
            figment = figment.merge(Serialized::default("rotation.dry_run", true));
        }
        if overrides.no_push {
            figment = figment.merge(Serialized::default("rotation.push_to_targets", false));
        }
        if let Some(hours) = overrides.interval_hours {
            figment = figment.merge(Serialized::default("rotation.interval_hours", hours));
        }

        figment
            .extract()
            .with_context(|| format!("failed to load configuration ({})", source.path().display()))
    }

    /// Reject settings that would fail halfway through a run
    pub fn validate(&self) -> Result<()> {
        let rotation = &self.rotation;
        if rotation.interval_hours == 0 {
            bail!("rotation.interval_hours must be greater than zero");
        }
        if rotation.quota_per_alg == 0 {
            bail!("rotation.quota_per_alg must be greater than zero");
        }
        if rotation.max_parallel_targets == 0 {
            bail!("rotation.max_parallel_targets must be greater than zero");
        }
        if rotation.distinguished_name.trim().is_empty() {
            bail!("rotation.distinguished_name must not be empty");
        }

        self.generator.validate()?;
        self.store.validate()?;
        self.vault.validate()?;
        if rotation.push_to_targets {
            if self.targets.selector.trim().is_empty() {
                bail!("targets.selector must not be empty");
            }
            self.targets.backend.validate()?;
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        let rotation = &self.rotation;
        let policy = RotationPolicy::new(rotation.interval_hours, rotation.quota_per_alg)?;
        Ok(OrchestratorConfig {
            policy,
            distinguished_name: rotation.distinguished_name.clone(),
            keystore_password: rotation.keystore_password.clone(),
            selector: self.targets.selector.clone(),
            push_to_targets: rotation.push_to_targets,
            dry_run: rotation.dry_run,
            max_parallel_targets: rotation.max_parallel_targets,
            artifacts: self.artifacts.clone(),
            secrets: self.secrets.clone(),
        })
    }

    /// Effective configuration as TOML; secret values are never serialized
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }

    /// `store=ldap targets=docker vault=file`
    pub fn backends_line(&self) -> String {
        let store = match self.store.backend {
            PersistenceType::Hybrid => format!("hybrid ({})", self.store.effective_backend()),
            other => other.to_string(),
        };
        let targets = if self.rotation.push_to_targets {
            self.targets.backend.backend.to_string()
        } else {
            "disabled".to_string()
        };
        format!("store={store} targets={targets} vault={}", self.vault.backend)
    }
}
