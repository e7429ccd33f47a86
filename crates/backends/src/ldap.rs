//! LDAP configuration store
//!
//! The record is the `ou=oxauth,ou=configuration,o=<namespace>` entry.
//! The conditional update is a single modify request that deletes the
//! stored `oxRevision` value before adding the new one, so the server
//! rejects it when someone else bumped the revision first. An entry without
//! a revision only gets the add, which the single-valued attribute refuses
//! once another writer has set one.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use keyrotor_core::model::AuthServerConfig;
use keyrotor_core::ports::{ConfigStore, ConfigUpdate, StoreError, UpdateOutcome};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{BackendConfig, ConfigError, require_non_empty, require_timeout};
use crate::record::{
    DYNAMIC_ATTR, REVISION_ATTR, WEB_KEYS_ATTR, build_record, parse_revision,
};

/// `noSuchObject`
const RC_NO_SUCH_OBJECT: u32 = 32;

/// How the revision attribute is changed by an update
#[derive(Debug, Clone, PartialEq, Eq)]
enum RevisionChange {
    /// The entry has no revision yet
    Add,
    /// Swap out the value exactly as stored
    Replace { stored: String },
}

impl RevisionChange {
    /// Check the stored value against the revision the update expects
    fn plan(dn: &str, stored: Option<String>, expected: u64) -> Result<Self, String> {
        let current = match &stored {
            Some(text) => {
                parse_revision(dn, &Value::String(text.clone())).map_err(|e| e.to_string())?
            }
            None => 0,
        };
        if current != expected {
            return Err(format!("{REVISION_ATTR} of {dn} is {current}, expected {expected}"));
        }
        Ok(match stored {
            Some(stored) => Self::Replace { stored },
            None => Self::Add,
        })
    }

    fn into_mods(self, revision: u64) -> Vec<Mod<String>> {
        let add = Mod::Add(REVISION_ATTR.to_string(), HashSet::from([revision.to_string()]));
        match self {
            Self::Add => vec![add],
            Self::Replace { stored } => {
                vec![Mod::Delete(REVISION_ATTR.to_string(), HashSet::from([stored])), add]
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LdapConfig {
    pub url: String,
    pub bind_dn: String,
    #[serde(skip_serializing)]
    pub password: SecretString,
    /// Taken from the store namespace
    #[serde(skip)]
    pub namespace: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Skip certificate verification (self-signed directory certs)
    pub accept_invalid_certs: bool,
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            url: "ldaps://localhost:1636".to_string(),
            bind_dn: "cn=directory manager".to_string(),
            password: SecretString::from(String::new()),
            namespace: "jans".to_string(),
            timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
        }
    }
}

impl LdapConfig {
    /// DN of the configuration entry
    pub fn entry_dn(&self) -> String {
        format!("ou=oxauth,ou=configuration,o={}", self.namespace)
    }
}

impl BackendConfig for LdapConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("store.ldap.url", &self.url)?;
        if !(self.url.starts_with("ldap://") || self.url.starts_with("ldaps://")) {
            return Err(ConfigError::invalid(
                "store.ldap.url",
                "must start with ldap:// or ldaps://",
            ));
        }
        require_non_empty("store.ldap.bind_dn", &self.bind_dn)?;
        require_non_empty("store.ldap.password", self.password.expose_secret())?;
        require_non_empty("store.namespace", &self.namespace)?;
        require_timeout("store.ldap.timeout", self.timeout)
    }

    fn backend_name(&self) -> &'static str {
        "ldap"
    }
}

/// [`ConfigStore`] over one directory entry
///
/// Every call opens its own bound connection.
#[derive(Debug, Clone)]
pub struct LdapConfigStore {
    config: LdapConfig,
    dn: String,
}

impl LdapConfigStore {
    pub fn new(config: LdapConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let dn = config.entry_dn();
        tracing::info!(url = %config.url, dn = %dn, "initialized LDAP config store");
        Ok(Self { config, dn })
    }

    async fn connect(&self) -> Result<Ldap, ldap3::LdapError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.config.timeout)
            .set_no_tls_verify(self.config.accept_invalid_certs);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.url).await?;
        ldap3::drive!(conn);
        ldap.with_timeout(self.config.timeout);
        ldap.simple_bind(&self.config.bind_dn, self.config.password.expose_secret())
            .await?
            .success()?;
        Ok(ldap)
    }

    async fn search(&self, ldap: &mut Ldap) -> Result<Option<AuthServerConfig>, StoreError> {
        let result = ldap
            .search(
                &self.dn,
                Scope::Base,
                "(objectClass=*)",
                vec![REVISION_ATTR, DYNAMIC_ATTR, WEB_KEYS_ATTR],
            )
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if result.1.rc == RC_NO_SUCH_OBJECT {
            return Ok(None);
        }
        let (entries, _) = result
            .success()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        entries
            .into_iter()
            .next()
            .map(|entry| record_from_attrs(&self.dn, SearchEntry::construct(entry).attrs))
            .transpose()
    }

    /// Stored revision value, untouched
    async fn stored_revision(&self, ldap: &mut Ldap, dn: &str) -> Result<Option<String>, String> {
        let (entries, _) = ldap
            .search(dn, Scope::Base, "(objectClass=*)", vec![REVISION_ATTR])
            .await
            .and_then(ldap3::SearchResult::success)
            .map_err(|e| e.to_string())?;

        Ok(entries.into_iter().next().and_then(|entry| {
            SearchEntry::construct(entry)
                .attrs
                .remove(REVISION_ATTR)
                .and_then(|values| values.into_iter().next())
        }))
    }

    async fn modify(
        &self,
        ldap: &mut Ldap,
        update: &ConfigUpdate,
    ) -> Result<UpdateOutcome, String> {
        let dynamic = serde_json::to_string(&update.dynamic.to_value())
            .map_err(|e| e.to_string())?;
        let web_keys = serde_json::to_string(&update.web_keys).map_err(|e| e.to_string())?;

        let stored = self.stored_revision(ldap, &update.id).await?;
        let change = match RevisionChange::plan(&update.id, stored, update.expected_current()) {
            Ok(change) => change,
            Err(reason) => return Ok(UpdateOutcome::rejected(reason)),
        };

        let mut mods = change.into_mods(update.revision);
        mods.push(Mod::Replace(DYNAMIC_ATTR.to_string(), HashSet::from([dynamic])));
        mods.push(Mod::Replace(WEB_KEYS_ATTR.to_string(), HashSet::from([web_keys])));

        let result = ldap.modify(&update.id, mods).await.map_err(|e| e.to_string())?;
        if result.rc != 0 {
            return Ok(UpdateOutcome::rejected(format!(
                "LDAP modify returned {}: {}",
                result.rc, result.text
            )));
        }
        Ok(UpdateOutcome::Committed)
    }
}

/// Multi-valued attributes keep their first value
fn record_from_attrs(
    dn: &str,
    mut attrs: HashMap<String, Vec<String>>,
) -> Result<AuthServerConfig, StoreError> {
    let mut take = |name: &str| {
        attrs
            .remove(name)
            .and_then(|values| values.into_iter().next())
            .map_or(Value::Null, Value::String)
    };
    let revision = take(REVISION_ATTR);
    let dynamic = take(DYNAMIC_ATTR);
    let web_keys = take(WEB_KEYS_ATTR);
    build_record(dn, &revision, dynamic, web_keys)
}

async fn unbind(ldap: &mut Ldap) {
    if let Err(e) = ldap.unbind().await {
        tracing::debug!(error = %e, "LDAP unbind failed");
    }
}

#[async_trait]
impl ConfigStore for LdapConfigStore {
    async fn read(&self) -> Result<Option<AuthServerConfig>, StoreError> {
        let mut ldap = self
            .connect()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let record = self.search(&mut ldap).await;
        unbind(&mut ldap).await;
        record
    }

    async fn conditional_update(&self, update: ConfigUpdate) -> UpdateOutcome {
        let mut ldap = match self.connect().await {
            Ok(ldap) => ldap,
            Err(e) => return UpdateOutcome::rejected(format!("LDAP connection failed: {e}")),
        };
        let outcome = self
            .modify(&mut ldap, &update)
            .await
            .unwrap_or_else(UpdateOutcome::rejected);
        unbind(&mut ldap).await;

        tracing::debug!(
            dn = %update.id,
            revision = update.revision,
            committed = outcome.is_committed(),
            "LDAP update"
        );
        outcome
    }

    fn backend_name(&self) -> &'static str {
        "ldap"
    }
}
