//! Decoding the configuration record shared by the store backends
//!
//! Both backends hold the same three attributes: `oxRevision`,
//! `oxAuthConfDynamic` and `oxAuthConfWebKeys`. The JSON attributes may
//! be stored as text or as embedded objects.

use keyrotor_core::model::{AuthServerConfig, DynamicConfig, JwkSet};
use keyrotor_core::ports::StoreError;
use serde_json::Value;

pub(crate) const REVISION_ATTR: &str = "oxRevision";
pub(crate) const DYNAMIC_ATTR: &str = "oxAuthConfDynamic";
pub(crate) const WEB_KEYS_ATTR: &str = "oxAuthConfWebKeys";

/// Revision as a number or decimal text
pub(crate) fn parse_revision(id: &str, value: &Value) -> Result<u64, StoreError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        Value::Null => Some(0),
        _ => None,
    };
    parsed.ok_or_else(|| malformed(id, format!("{REVISION_ATTR} is not a revision: {value}")))
}

pub(crate) fn build_record(
    id: &str,
    revision: &Value,
    dynamic: Value,
    web_keys: Value,
) -> Result<AuthServerConfig, StoreError> {
    Ok(AuthServerConfig {
        id: id.to_string(),
        revision: parse_revision(id, revision)?,
        dynamic: DynamicConfig::from_value(dynamic)
            .map_err(|e| malformed(id, format!("{DYNAMIC_ATTR}: {e}")))?,
        web_keys: JwkSet::from_value(web_keys)
            .map_err(|e| malformed(id, format!("{WEB_KEYS_ATTR}: {e}")))?,
    })
}

pub(crate) fn malformed(id: &str, reason: String) -> StoreError {
    StoreError::Malformed {
        id: id.to_string(),
        reason,
    }
}
