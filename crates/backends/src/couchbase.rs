//! Couchbase configuration store
//!
//! Talks to the N1QL query service over REST. The conditional update is a
//! single `UPDATE ... WHERE <revision> = $expected RETURNING oxRevision`;
//! no returned row means the guard did not match. The stored revision is
//! compared as a number, with a missing one reading as zero, the same way
//! reads decode it, so documents that keep it as text still match.

use std::time::Duration;

use async_trait::async_trait;
use keyrotor_core::model::AuthServerConfig;
use keyrotor_core::ports::{ConfigStore, ConfigUpdate, StoreError, UpdateOutcome};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::{BackendConfig, ConfigError, require_non_empty, require_timeout};
use crate::record::{DYNAMIC_ATTR, REVISION_ATTR, WEB_KEYS_ATTR, build_record};

const QUERY_PATH: &str = "/query/service";

/// The stored revision normalized the way reads decode it
const REVISION_GUARD: &str = "TONUMBER(IFMISSINGORNULL(oxRevision, 0))";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CouchbaseConfig {
    /// Query service base URL, e.g. `https://couchbase:18093`
    pub url: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: SecretString,
    /// Bucket holding the configuration document; the store namespace
    #[serde(skip)]
    pub bucket: String,
    pub document_id: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for CouchbaseConfig {
    fn default() -> Self {
        Self {
            url: "https://localhost:18093".to_string(),
            user: "admin".to_string(),
            password: SecretString::from(String::new()),
            bucket: "jans".to_string(),
            document_id: "configuration_oxauth".to_string(),
            timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
        }
    }
}

impl BackendConfig for CouchbaseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("store.couchbase.url", &self.url)?;
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "store.couchbase.url",
                "must start with http:// or https://",
            ));
        }
        require_non_empty("store.couchbase.user", &self.user)?;
        require_non_empty("store.couchbase.password", self.password.expose_secret())?;
        require_non_empty("store.namespace", &self.bucket)?;
        if self.bucket.contains('`') {
            return Err(ConfigError::invalid("store.namespace", "must not contain backticks"));
        }
        require_non_empty("store.couchbase.document_id", &self.document_id)?;
        require_timeout("store.couchbase.timeout", self.timeout)
    }

    fn backend_name(&self) -> &'static str {
        "couchbase"
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    errors: Vec<QueryErrorBody>,
}

#[derive(Debug, Deserialize)]
struct QueryErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

impl QueryResponse {
    fn error_message(&self) -> String {
        if self.errors.is_empty() {
            return format!("query status {}", self.status);
        }
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.msg))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// [`ConfigStore`] over one document of a Couchbase bucket
#[derive(Clone)]
pub struct CouchbaseConfigStore {
    client: reqwest::Client,
    config: CouchbaseConfig,
    endpoint: String,
}

impl std::fmt::Debug for CouchbaseConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouchbaseConfigStore")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.config.bucket)
            .field("document_id", &self.config.document_id)
            .finish_non_exhaustive()
    }
}

impl CouchbaseConfigStore {
    pub fn new(config: CouchbaseConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ConfigError::invalid("store.couchbase", e.to_string()))?;
        let endpoint = format!("{}{QUERY_PATH}", config.url.trim_end_matches('/'));

        tracing::info!(
            endpoint = %endpoint,
            bucket = %config.bucket,
            "initialized Couchbase config store"
        );
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    /// Run a statement with named `$` parameters
    async fn query(
        &self,
        statement: String,
        params: Map<String, Value>,
    ) -> Result<QueryResponse, String> {
        let mut body = params;
        body.insert("statement".to_string(), Value::String(statement));

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.config.user, Some(self.config.password.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("query request failed: {e}"))?;

        let status = response.status();
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid query response (HTTP {status}): {e}"))?;

        if !status.is_success() || parsed.status != "success" {
            return Err(parsed.error_message());
        }
        Ok(parsed)
    }

    fn select_statement(&self) -> String {
        format!(
            "SELECT {REVISION_ATTR}, {DYNAMIC_ATTR}, {WEB_KEYS_ATTR} FROM `{}` USE KEYS $id",
            self.config.bucket
        )
    }

    fn update_statement(&self) -> String {
        format!(
            "UPDATE `{}` USE KEYS $id SET {REVISION_ATTR} = $revision, \
             {DYNAMIC_ATTR} = $dynamic, {WEB_KEYS_ATTR} = $web_keys \
             WHERE {REVISION_GUARD} = $expected RETURNING {REVISION_ATTR}",
            self.config.bucket
        )
    }
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl ConfigStore for CouchbaseConfigStore {
    async fn read(&self) -> Result<Option<AuthServerConfig>, StoreError> {
        let id = &self.config.document_id;
        let response = self
            .query(self.select_statement(), params(json!({ "$id": id })))
            .await
            .map_err(StoreError::Unavailable)?;

        let Some(mut row) = response.results.into_iter().next() else {
            return Ok(None);
        };
        let mut take = |name: &str| {
            row.as_object_mut()
                .and_then(|fields| fields.remove(name))
                .unwrap_or(Value::Null)
        };
        let revision = take(REVISION_ATTR);
        let dynamic = take(DYNAMIC_ATTR);
        let web_keys = take(WEB_KEYS_ATTR);
        build_record(id, &revision, dynamic, web_keys).map(Some)
    }

    async fn conditional_update(&self, update: ConfigUpdate) -> UpdateOutcome {
        let web_keys = match serde_json::to_value(&update.web_keys) {
            Ok(value) => value,
            Err(e) => return UpdateOutcome::rejected(e.to_string()),
        };
        let bindings = params(json!({
            "$id": update.id,
            "$revision": update.revision,
            "$expected": update.expected_current(),
            "$dynamic": update.dynamic.to_value(),
            "$web_keys": web_keys,
        }));

        let outcome = match self.query(self.update_statement(), bindings).await {
            Ok(response) if response.results.is_empty() => UpdateOutcome::rejected(format!(
                "{REVISION_ATTR} of {} is no longer {}",
                update.id,
                update.expected_current()
            )),
            Ok(_) => UpdateOutcome::Committed,
            Err(reason) => UpdateOutcome::rejected(reason),
        };

        tracing::debug!(
            id = %update.id,
            revision = update.revision,
            committed = outcome.is_committed(),
            "Couchbase update"
        );
        outcome
    }

    fn backend_name(&self) -> &'static str {
        "couchbase"
    }
}
