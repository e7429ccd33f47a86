//! Persisted authorization-server configuration

use serde_json::{Map, Value};

use super::{JwkSet, ModelError};

const KEY_REGENERATION_ENABLED: &str = "keyRegenerationEnabled";
const KEY_REGENERATION_INTERVAL: &str = "keyRegenerationInterval";
const ID_TOKEN_LIFETIME: &str = "idTokenLifetime";
const WEB_KEYS_STORAGE: &str = "webKeysStorage";
const KEY_STORE_SECRET: &str = "keyStoreSecret";

/// Storage mode recorded after a rotation
pub const KEYSTORE_STORAGE_MODE: &str = "keystore";

/// The configuration record as read from a [`ConfigStore`](crate::ports::ConfigStore)
#[derive(Debug, Clone, PartialEq)]
pub struct AuthServerConfig {
    /// Stable identifier (LDAP DN, document key, ...)
    pub id: String,

    /// Optimistic-concurrency revision
    pub revision: u64,

    /// Server settings; only a handful of fields are read or written here
    pub dynamic: DynamicConfig,

    /// Published key set
    pub web_keys: JwkSet,
}

/// Dynamic server settings
///
/// Wraps the full JSON object so that fields this crate does not know about
/// are written back unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicConfig(Map<String, Value>);

impl DynamicConfig {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Accept either an embedded JSON object or JSON text of one
    pub fn from_value(value: Value) -> Result<Self, ModelError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            Value::String(text) => match serde_json::from_str::<Value>(&text)? {
                Value::Object(fields) => Ok(Self(fields)),
                other => Err(ModelError::InvalidDynamicConfig(format!(
                    "expected an object, found {}",
                    json_kind(&other)
                ))),
            },
            other => Err(ModelError::InvalidDynamicConfig(format!(
                "expected an object, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Whether the server's built-in key regeneration is switched on
    ///
    /// Missing or unrecognised values read as disabled.
    pub fn key_regeneration_enabled(&self) -> bool {
        match self.0.get(KEY_REGENERATION_ENABLED) {
            Some(Value::Bool(enabled)) => *enabled,
            Some(Value::String(text)) => {
                matches!(
                    text.trim().to_ascii_lowercase().as_str(),
                    "true" | "1" | "yes" | "y" | "on"
                )
            }
            Some(Value::Number(n)) => n.as_u64().is_some_and(|n| n != 0),
            _ => false,
        }
    }

    /// Longest token lifetime in seconds; missing reads as zero
    pub fn id_token_lifetime_secs(&self) -> u64 {
        self.u64_field(ID_TOKEN_LIFETIME).unwrap_or(0)
    }

    pub fn key_regeneration_interval(&self) -> Option<u64> {
        self.u64_field(KEY_REGENERATION_INTERVAL)
    }

    pub fn web_keys_storage(&self) -> Option<&str> {
        self.0.get(WEB_KEYS_STORAGE).and_then(Value::as_str)
    }

    pub fn key_store_secret(&self) -> Option<&str> {
        self.0.get(KEY_STORE_SECRET).and_then(Value::as_str)
    }

    /// Record a completed rotation: guard off, interval, keystore storage
    /// mode and keystore secret
    pub fn apply_rotation(&mut self, interval_hours: u64, keystore_secret: &str) {
        self.0.insert(KEY_REGENERATION_ENABLED.to_string(), Value::Bool(false));
        self.0
            .insert(KEY_REGENERATION_INTERVAL.to_string(), Value::from(interval_hours));
        self.0.insert(
            WEB_KEYS_STORAGE.to_string(),
            Value::String(KEYSTORE_STORAGE_MODE.to_string()),
        );
        self.0.insert(
            KEY_STORE_SECRET.to_string(),
            Value::String(keystore_secret.to_string()),
        );
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    fn u64_field(&self, name: &str) -> Option<u64> {
        match self.0.get(name)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(json!(true), true)]
    #[case(json!(false), false)]
    #[case(json!("true"), true)]
    #[case(json!("False"), false)]
    #[case(json!(null), false)]
    fn test_guard_flag(#[case] flag: Value, #[case] expected: bool) {
        let dynamic = DynamicConfig::from_value(json!({ "keyRegenerationEnabled": flag })).unwrap();
        assert_eq!(dynamic.key_regeneration_enabled(), expected);
    }

    #[test]
    fn test_missing_guard_flag_is_disabled() {
        let dynamic = DynamicConfig::from_value(json!({})).unwrap();
        assert!(!dynamic.key_regeneration_enabled());
        assert_eq!(dynamic.id_token_lifetime_secs(), 0);
    }

    #[test]
    fn test_text_and_object_forms_are_equivalent() {
        let object = json!({"idTokenLifetime": 3600, "issuer": "https://op.example"});
        let text = Value::String(object.to_string());

        assert_eq!(
            DynamicConfig::from_value(object).unwrap(),
            DynamicConfig::from_value(text).unwrap()
        );
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(DynamicConfig::from_value(json!([1, 2])).is_err());
        assert!(DynamicConfig::from_value(Value::String("[1]".into())).is_err());
        assert!(DynamicConfig::from_value(Value::String("{not json".into())).is_err());
    }

    #[test]
    fn test_apply_rotation_keeps_unknown_fields() {
        let mut dynamic = DynamicConfig::from_value(json!({
            "issuer": "https://op.example",
            "keyRegenerationEnabled": true,
            "idTokenLifetime": 7200
        }))
        .unwrap();

        dynamic.apply_rotation(48, "s3cret");

        assert!(!dynamic.key_regeneration_enabled());
        assert_eq!(dynamic.key_regeneration_interval(), Some(48));
        assert_eq!(dynamic.web_keys_storage(), Some(KEYSTORE_STORAGE_MODE));
        assert_eq!(dynamic.key_store_secret(), Some("s3cret"));
        assert_eq!(dynamic.as_map()["issuer"], "https://op.example");
        assert_eq!(dynamic.id_token_lifetime_secs(), 7200);
    }
}
