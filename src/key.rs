//! Query keys, filter sets and key predicates.
//!
//! A [`QueryKey`] is an ordered list of segments. Each segment is stored as
//! canonical JSON text with object keys sorted at every depth, so two keys
//! built from structurally equal values compare equal no matter the order in
//! which their fields were inserted.
//!
//! ```
//! use resource_sync::key::{Filters, QueryKey};
//!
//! let filters = Filters::new().with("category", "inverters").with("city", "Lagos");
//! let key = QueryKey::new("products").push("list").with_filters(&filters).page(2);
//!
//! assert_eq!(
//!     key.to_string(),
//!     r#"products:list:{"category":"inverters","city":"Lagos"}:2"#
//! );
//! assert!(key.starts_with(&QueryKey::new("products")));
//! ```

use crate::error::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identity of one cached, parameterized fetch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    segments: Vec<String>,
}

impl QueryKey {
    /// Start a key at a resource name.
    pub fn new(resource: &str) -> Self {
        QueryKey {
            segments: vec![encode(&Value::String(resource.to_string()))],
        }
    }

    /// Append a string segment.
    pub fn push(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(encode(&Value::String(segment.into())));
        self
    }

    /// Append any serializable value as a segment.
    ///
    /// # Errors
    /// Returns `Error::SerializationError` if the value cannot be turned into JSON.
    pub fn with<S: Serialize + ?Sized>(mut self, segment: &S) -> Result<Self> {
        let value = serde_json::to_value(segment)?;
        self.segments.push(encode(&value));
        Ok(self)
    }

    /// Append a filter set.
    pub fn with_filters(mut self, filters: &Filters) -> Self {
        self.segments.push(encode(&filters.to_value()));
        self
    }

    /// Append a page number.
    pub fn page(mut self, page: u32) -> Self {
        self.segments.push(encode(&Value::from(page)));
        self
    }

    /// Resource name (first segment).
    pub fn resource(&self) -> &str {
        self.segments
            .first()
            .map(|s| s.trim_matches('"'))
            .unwrap_or_default()
    }

    /// Canonical JSON text of each segment.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True if `prefix` matches the leading segments of this key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map(|s| {
                if s.starts_with('"') {
                    s.trim_matches('"')
                } else {
                    s.as_str()
                }
            })
            .collect();
        write!(f, "{}", parts.join(":"))
    }
}

/// Serialize a value with object keys sorted at every depth.
///
/// `serde_json::Map` keeps insertion order when the `preserve_order` feature
/// is enabled anywhere in the dependency graph, so sorting is done here.
fn encode(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Return a copy of `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Free-form filter parameters for a list endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Filters {
    params: BTreeMap<String, Value>,
}

impl Filters {
    pub fn new() -> Self {
        Filters::default()
    }

    /// Add or replace a parameter. `Value::Null` removes it.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        match value.into() {
            Value::Null => {
                self.params.remove(&name);
            }
            value => {
                self.params.insert(name, value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Filters as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Filters as URL query pairs. Strings are sent raw, other values as JSON.
    pub fn to_query(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect()
    }
}

/// Type alias for custom key predicates.
type KeyMatchFn = dyn Fn(&QueryKey) -> bool + Send + Sync;

/// Selects the cache entries an invalidation applies to.
#[derive(Clone)]
pub enum KeyPredicate {
    /// No entry.
    None,
    /// Every entry.
    All,
    /// One exact key.
    Exact(QueryKey),
    /// Every key beginning with the given segments.
    Prefix(QueryKey),
    /// Arbitrary predicate.
    Custom(Arc<KeyMatchFn>),
}

impl KeyPredicate {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&QueryKey) -> bool + Send + Sync + 'static,
    {
        KeyPredicate::Custom(Arc::new(f))
    }

    /// Every key of one resource.
    pub fn resource(resource: &str) -> Self {
        KeyPredicate::Prefix(QueryKey::new(resource))
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyPredicate::None => false,
            KeyPredicate::All => true,
            KeyPredicate::Exact(k) => k == key,
            KeyPredicate::Prefix(p) => key.starts_with(p),
            KeyPredicate::Custom(f) => f(key),
        }
    }
}

impl fmt::Debug for KeyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPredicate::None => write!(f, "None"),
            KeyPredicate::All => write!(f, "All"),
            KeyPredicate::Exact(k) => write!(f, "Exact({})", k),
            KeyPredicate::Prefix(k) => write!(f, "Prefix({})", k),
            KeyPredicate::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
