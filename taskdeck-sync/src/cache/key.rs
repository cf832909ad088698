//! Cache key derivation.
//!
//! A key is `(operation name, normalized arguments)`. Normalization drops
//! `null` object fields recursively and sorts object fields, so
//! `{"b":1,"a":null}` and `{"b":1}` produce the same key.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CacheKey {
    operation: Arc<str>,
    args: Arc<Value>,
    canonical: Arc<str>,
}

impl CacheKey {
    pub fn new(operation: &str, args: &Value) -> Self {
        let args = normalize(args);
        let canonical = format!("{}({})", operation, args);
        Self {
            operation: Arc::from(operation),
            args: Arc::new(args),
            canonical: Arc::from(canonical),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Normalized arguments, suitable for re-issuing the request.
    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Canonical form of an argument value. A top-level `null` becomes `{}`.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Null => Value::Object(Map::new()),
        other => normalize_inner(other),
    }
}

fn normalize_inner(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let sorted: BTreeMap<String, Value> = fields
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), normalize_inner(v)))
                .collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_inner).collect()),
        other => other.clone(),
    }
}
