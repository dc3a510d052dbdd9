//! Cache key derivation.
//!
//! Keys are 64-bit fingerprints. Operation keys cover the operation text,
//! the selected operation name and the *shape* of the variables (names and
//! JSON types, not values), so requests that only differ in variable values
//! share a normalization entry.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::Value;

/// Fingerprint used as the key of every operation cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(u64);

impl CacheKey {
    /// Wrap an already computed hash (e.g. a normalized operation hash).
    pub fn from_hash(hash: u64) -> Self {
        Self(hash)
    }

    /// Key for an inline operation.
    pub fn for_operation(
        content: &str,
        operation_name: Option<&str>,
        variables: Option<&Value>,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        "operation".hash(&mut hasher);
        content.hash(&mut hasher);
        operation_name.hash(&mut hasher);
        if let Some(variables) = variables {
            hash_value_shape(variables, &mut hasher);
        }
        Self(hasher.finish())
    }

    /// Key for a persisted operation, scoped to the client that registered it.
    pub fn for_persisted(
        client_name: &str,
        sha256_hash: &str,
        operation_name: Option<&str>,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        "persisted".hash(&mut hasher);
        client_name.hash(&mut hasher);
        sha256_hash.hash(&mut hasher);
        operation_name.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Raw fingerprint value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Hash the structure of a JSON value (not the scalar values).
fn hash_value_shape<H: Hasher>(value: &Value, hasher: &mut H) {
    std::mem::discriminant(value).hash(hasher);
    match value {
        Value::Object(map) => {
            // serde_json::Map iterates in key order
            map.len().hash(hasher);
            for (key, nested) in map {
                key.hash(hasher);
                hash_value_shape(nested, hasher);
            }
        }
        Value::Array(items) => {
            items.len().hash(hasher);
            for item in items {
                hash_value_shape(item, hasher);
            }
        }
        // literal values do not influence normalization
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
    }
}
