//! Opaque resource payloads and their identity.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Identity of a resource, whatever field it came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        ResourceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        ResourceId(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        ResourceId(id)
    }
}

/// Anything that carries a resource identity.
pub trait Identified {
    fn resource_id(&self) -> Option<ResourceId>;
}

/// A product, shop, engineer or user as returned by the server.
///
/// The sync layer only looks at the identity field; everything else is
/// passed through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Value);

impl Resource {
    pub fn new(value: Value) -> Self {
        Resource(value)
    }

    /// Identity from `id`, falling back to `_id`. Numbers become their
    /// decimal text so `7` and `"7"` are the same resource.
    pub fn id(&self) -> Option<ResourceId> {
        ["id", "_id"]
            .iter()
            .find_map(|field| id_text(self.0.get(field)?))
            .map(ResourceId)
    }

    /// Field lookup.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Decode into a typed model.
    ///
    /// # Errors
    /// Returns `Error::DeserializationError` if the payload does not fit `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }
}

impl From<Value> for Resource {
    fn from(value: Value) -> Self {
        Resource(value)
    }
}

impl Identified for Resource {
    fn resource_id(&self) -> Option<ResourceId> {
        self.id()
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Keep the first occurrence of each identity, preserving order.
///
/// Items without an identity are always kept.
pub fn dedup_by_id<T: Identified>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| match item.resource_id() {
            Some(id) => seen.insert(id),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_and_underscore_id_are_same_identity() {
        let mongo = Resource::new(json!({ "_id": "abc", "name": "Panel" }));
        let plain = Resource::new(json!({ "id": "abc", "title": "Panel" }));
        assert_eq!(mongo.id(), plain.id());
        assert_eq!(mongo.id(), Some(ResourceId::from("abc")));
    }

    #[test]
    fn test_numeric_id() {
        let a = Resource::new(json!({ "id": 7 }));
        let b = Resource::new(json!({ "_id": "7" }));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_missing_id() {
        assert_eq!(Resource::new(json!({ "name": "x" })).id(), None);
        assert_eq!(Resource::new(json!({ "id": "" })).id(), None);
        assert_eq!(Resource::new(json!([1, 2])).id(), None);
    }

    #[test]
    fn test_id_preferred_over_underscore_id() {
        let r = Resource::new(json!({ "id": "a", "_id": "b" }));
        assert_eq!(r.id(), Some(ResourceId::from("a")));
    }

    #[test]
    fn test_dedup_by_id() {
        let items = vec![
            Resource::new(json!({ "_id": "1", "v": 1 })),
            Resource::new(json!({ "id": "2" })),
            Resource::new(json!({ "id": "1", "v": 2 })),
            Resource::new(json!({ "name": "anonymous" })),
            Resource::new(json!({ "name": "anonymous" })),
        ];
        let unique = dedup_by_id(items);
        assert_eq!(unique.len(), 4);
        assert_eq!(unique[0].get("v"), Some(&json!(1)));
    }

    #[test]
    fn test_decode() {
        #[derive(Deserialize)]
        struct Shop {
            name: String,
        }

        let shop: Shop = Resource::new(json!({ "id": "s1", "name": "Sunny" }))
            .decode()
            .unwrap();
        assert_eq!(shop.name, "Sunny");
    }
}
