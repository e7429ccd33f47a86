//! JSON Web Keys and key sets
//!
//! A [`Jwk`] is identified by its `kid`; everything except `kid`, `alg` and
//! `exp` is opaque key material that is carried through untouched, in the
//! order it was read.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ModelError;

/// Signing and encryption algorithms the authorization server issues keys for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "RS256")]
    Rs256,
    #[serde(rename = "RS384")]
    Rs384,
    #[serde(rename = "RS512")]
    Rs512,
    #[serde(rename = "ES256")]
    Es256,
    #[serde(rename = "ES384")]
    Es384,
    #[serde(rename = "ES512")]
    Es512,
    #[serde(rename = "PS256")]
    Ps256,
    #[serde(rename = "PS384")]
    Ps384,
    #[serde(rename = "PS512")]
    Ps512,
    #[serde(rename = "RSA1_5")]
    Rsa15,
    #[serde(rename = "RSA-OAEP")]
    RsaOaep,
}

impl Algorithm {
    /// Signing algorithms, in the order they are requested from the generator
    pub const SIGNING: [Algorithm; 9] = [
        Algorithm::Rs256,
        Algorithm::Rs384,
        Algorithm::Rs512,
        Algorithm::Es256,
        Algorithm::Es384,
        Algorithm::Es512,
        Algorithm::Ps256,
        Algorithm::Ps384,
        Algorithm::Ps512,
    ];

    /// Encryption algorithms, in the order they are requested from the generator
    pub const ENCRYPTION: [Algorithm; 2] = [Algorithm::Rsa15, Algorithm::RsaOaep];

    /// Wire name of the algorithm (the JWK `alg` value)
    pub const fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Rs256 => "RS256",
            Algorithm::Rs384 => "RS384",
            Algorithm::Rs512 => "RS512",
            Algorithm::Es256 => "ES256",
            Algorithm::Es384 => "ES384",
            Algorithm::Es512 => "ES512",
            Algorithm::Ps256 => "PS256",
            Algorithm::Ps384 => "PS384",
            Algorithm::Ps512 => "PS512",
            Algorithm::Rsa15 => "RSA1_5",
            Algorithm::RsaOaep => "RSA-OAEP",
        }
    }

    /// Whether keys of this algorithm are used for signatures
    pub const fn is_signing(&self) -> bool {
        !matches!(self, Algorithm::Rsa15 | Algorithm::RsaOaep)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::SIGNING
            .iter()
            .chain(Algorithm::ENCRYPTION.iter())
            .find(|alg| alg.as_str() == s)
            .copied()
            .ok_or_else(|| ModelError::UnknownAlgorithm(s.to_string()))
    }
}

/// A single key descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key identifier, also the keystore alias
    pub kid: String,

    /// Algorithm tag
    pub alg: Algorithm,

    /// Absolute expiry, epoch milliseconds
    pub exp: i64,

    /// Opaque key material (`kty`, `use`, `n`, `e`, `x5c`, ...)
    #[serde(flatten)]
    pub material: Map<String, Value>,
}

impl Jwk {
    /// Create a key with no extra material
    pub fn new(kid: impl Into<String>, alg: Algorithm, exp: i64) -> Self {
        Self {
            kid: kid.into(),
            alg,
            exp,
            material: Map::new(),
        }
    }

    /// Attach an opaque field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.material.insert(name.into(), value.into());
        self
    }

    /// A key is expired once "now" reaches its `exp`
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.exp <= now_millis
    }
}

/// Ordered set of keys with unique `kid`s
///
/// Serializes as `{"keys": [...]}`; iteration order is insertion order and
/// is what ends up in the published JWKS document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawJwkSet")]
pub struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct RawJwkSet {
    #[serde(default)]
    keys: Vec<Jwk>,
}

impl TryFrom<RawJwkSet> for JwkSet {
    type Error = ModelError;

    fn try_from(raw: RawJwkSet) -> Result<Self, Self::Error> {
        JwkSet::new(raw.keys)
    }
}

impl JwkSet {
    /// Build a set, rejecting duplicate `kid`s
    pub fn new(keys: Vec<Jwk>) -> Result<Self, ModelError> {
        let mut set = JwkSet::default();
        for key in keys {
            set.push(key)?;
        }
        Ok(set)
    }

    /// Append a key at the end
    pub fn push(&mut self, key: Jwk) -> Result<(), ModelError> {
        if self.contains_kid(&key.kid) {
            return Err(ModelError::DuplicateKid(key.kid));
        }
        self.keys.push(key);
        Ok(())
    }

    /// Parse a JWKS document
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ModelError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Accept either an embedded JSON object or JSON text
    pub fn from_value(value: Value) -> Result<Self, ModelError> {
        match value {
            Value::String(text) => Ok(serde_json::from_str(&text)?),
            Value::Null => Ok(JwkSet::default()),
            other => Ok(serde_json::from_value(other)?),
        }
    }

    /// Pretty-printed JWKS document, keys in set order
    pub fn to_pretty_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Compact JWKS document
    pub fn to_json_vec(&self) -> Result<Vec<u8>, ModelError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Jwk> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_kid(&self, kid: &str) -> bool {
        self.keys.iter().any(|k| k.kid == kid)
    }

    /// `kid`s in set order
    pub fn kids(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.kid.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a JwkSet {
    type Item = &'a Jwk;
    type IntoIter = std::slice::Iter<'a, Jwk>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}
