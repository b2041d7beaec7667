//! Deterministic cache keys.
//!
//! A [`CacheKey`] is derived from an operation name, a resource path and a
//! normalized parameter set. Parameters are sorted by name, `null`/empty
//! values are dropped and nested JSON is rendered canonically, so two
//! logically identical requests always produce the same key whatever order
//! their parameters were supplied in.
//!
//! Each key also records the [`ResourceRef`]s it depends on. Invalidation
//! after a write matches on these references rather than on key text, so
//! `instance:4` never accidentally purges `instance:42`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// A resource a cached response depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRef {
    /// A single instance by id.
    Instance(i64),
    /// A single history record by id.
    History(i64),
    /// Any listing of instances.
    InstanceCollection,
    /// Any listing or aggregate of history records.
    HistoryCollection,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(id) => write!(f, "instance:{id}"),
            Self::History(id) => write!(f, "history:{id}"),
            Self::InstanceCollection => f.write_str("instances"),
            Self::HistoryCollection => f.write_str("history"),
        }
    }
}

/// Deterministic identifier for a logical request.
///
/// Equality and hashing use the rendered key text only.
#[derive(Debug, Clone)]
pub struct CacheKey {
    text: String,
    refs: BTreeSet<ResourceRef>,
}

impl CacheKey {
    /// Start building a key for `operation` on `path`.
    pub fn builder(operation: &str, path: &str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            operation: operation.to_string(),
            path: normalize_path(path),
            params: BTreeMap::new(),
            refs: BTreeSet::new(),
        }
    }

    /// Key text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Resources this key depends on.
    pub const fn references(&self) -> &BTreeSet<ResourceRef> {
        &self.refs
    }

    /// Whether this key depends on `resource`.
    pub fn references_resource(&self, resource: ResourceRef) -> bool {
        self.refs.contains(&resource)
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Builder for [`CacheKey`].
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    operation: String,
    path: String,
    params: BTreeMap<String, String>,
    refs: BTreeSet<ResourceRef>,
}

impl CacheKeyBuilder {
    /// Add a parameter. Empty values are ignored.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl fmt::Display) -> Self {
        let value = value.to_string();
        if !value.is_empty() {
            self.params.insert(name.to_string(), value);
        }
        self
    }

    /// Add a parameter when present.
    #[must_use]
    pub fn opt_param<V: fmt::Display>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    /// Add every top-level field of a serializable parameter object.
    ///
    /// `null` fields are skipped and nested values are rendered as canonical
    /// JSON with sorted object keys.
    pub fn params_from<T: Serialize>(mut self, params: &T) -> Result<Self> {
        match serde_json::to_value(params)? {
            Value::Object(map) => {
                for (name, value) in map {
                    if let Some(rendered) = render_param(&value) {
                        self.params.insert(name, rendered);
                    }
                }
            },
            Value::Null => {},
            other => {
                if let Some(rendered) = render_param(&other) {
                    self.params.insert("value".to_string(), rendered);
                }
            },
        }
        Ok(self)
    }

    /// Record a resource the response depends on.
    #[must_use]
    pub fn references(mut self, resource: ResourceRef) -> Self {
        self.refs.insert(resource);
        self
    }

    /// Render the key.
    pub fn build(self) -> CacheKey {
        let mut text = format!("{} {}", self.operation, self.path);
        if !self.params.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.params.iter())
                .finish();
            text.push('?');
            text.push_str(&query);
        }
        CacheKey {
            text,
            refs: self.refs,
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn render_param(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(canonical_json(value)),
    }
}

/// Render JSON with object keys sorted at every depth.
pub(crate) fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            let body: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{v}", Value::String(k.clone())))
                .collect();
            format!("{{{}}}", body.join(","))
        },
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        },
        other => other.to_string(),
    }
}
