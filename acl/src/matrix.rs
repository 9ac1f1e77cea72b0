//! Resource-name to permission-set mapping.
//!
//! Two notations are accepted and produced:
//!
//! - object notation: `{"docs": {"read": true}}`
//! - array notation: `[{"r": "docs", "a": {"read": true}}]`
//!
//! Internally the matrix is always held in object form with parsed
//! `fields`/`filter` values; notation and stringification are output choices
//! made through [`MatrixOptions`].

use crate::error::{AclError, Result, ValidationIssue};
use crate::types::{MatrixOptions, PermissionSet};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessMatrix {
    resources: BTreeMap<String, PermissionSet>,
}

impl AccessMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from either notation, parsing stringified sub-values.
    ///
    /// `null` yields an empty matrix. Any other non-matrix shape, or an array
    /// entry without a string `r`, is rejected.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let mut matrix = AccessMatrix::new();

        match value {
            JsonValue::Null => {}
            JsonValue::Object(map) => {
                for (resource, set) in map {
                    matrix.set(resource, PermissionSet::from_json(set));
                }
            }
            JsonValue::Array(entries) => {
                let mut issues = Vec::new();
                for (index, entry) in entries.iter().enumerate() {
                    match entry.get("r").and_then(JsonValue::as_str) {
                        Some(resource) => {
                            let set = entry.get("a").cloned().unwrap_or(JsonValue::Null);
                            matrix.set(resource, PermissionSet::from_json(&set));
                        }
                        None => issues.push(ValidationIssue::new(
                            "INVALID_RESOURCE_ENTRY",
                            format!("resources[{}]", index),
                            "array notation entries need a string 'r'",
                        )),
                    }
                }
                if !issues.is_empty() {
                    return Err(AclError::AccessMatrixValidation(issues));
                }
            }
            _ => {
                return Err(AclError::AccessMatrixValidation(vec![ValidationIssue::new(
                    "INVALID_RESOURCES",
                    "resources",
                    "resources must be an object or an array",
                )]))
            }
        }

        Ok(matrix)
    }

    pub fn get(&self, resource: &str) -> Option<&PermissionSet> {
        self.resources.get(resource)
    }

    /// Rendered permission set for `resource`
    pub fn get_with(&self, resource: &str, options: &MatrixOptions) -> Option<JsonValue> {
        self.resources.get(resource).map(|set| set.to_json(options))
    }

    /// The whole matrix in the requested notation
    pub fn get_all(&self, options: &MatrixOptions) -> JsonValue {
        if options.array_notation {
            JsonValue::Array(
                self.resources
                    .iter()
                    .map(|(resource, set)| json!({"r": resource, "a": set.to_json(options)}))
                    .collect(),
            )
        } else {
            JsonValue::Object(
                self.resources
                    .iter()
                    .map(|(resource, set)| (resource.clone(), set.to_json(options)))
                    .collect(),
            )
        }
    }

    /// Shallow-merge `set` onto the existing entry for `resource`
    pub fn set(&mut self, resource: &str, set: PermissionSet) {
        self.resources
            .entry(resource.to_string())
            .or_default()
            .extend(&set);
    }

    /// Replace the entry for `resource` wholesale
    pub fn replace(&mut self, resource: &str, set: PermissionSet) {
        self.resources.insert(resource.to_string(), set);
    }

    pub fn remove(&mut self, resource: &str) -> Option<PermissionSet> {
        self.resources.remove(resource)
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.resources.contains_key(resource)
    }

    pub fn resources(&self) -> impl Iterator<Item = &String> {
        self.resources.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PermissionSet)> {
        self.resources.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }
}

impl FromIterator<(String, PermissionSet)> for AccessMatrix {
    fn from_iter<I: IntoIterator<Item = (String, PermissionSet)>>(iter: I) -> Self {
        Self {
            resources: iter.into_iter().collect(),
        }
    }
}

impl Serialize for AccessMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.get_all(&MatrixOptions::default()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AccessMatrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        AccessMatrix::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Convert object notation to array notation without interpreting the values
pub fn to_array_notation(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Array(
            map.iter()
                .map(|(resource, set)| json!({"r": resource, "a": set}))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Convert array notation to object notation without interpreting the values
pub fn to_object_notation(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Array(entries) => {
            let mut map = Map::new();
            for entry in entries {
                if let Some(resource) = entry.get("r").and_then(JsonValue::as_str) {
                    map.insert(
                        resource.to_string(),
                        entry.get("a").cloned().unwrap_or_else(|| json!({})),
                    );
                }
            }
            JsonValue::Object(map)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Access, AccessType};

    fn sample() -> JsonValue {
        json!({
            "collection:library_book": {
                "read": {"fields": {"title": 1}, "filter": {"published": true}},
                "create": true
            },
            "media:images": {"delete": false}
        })
    }

    #[test]
    fn test_both_notations_build_the_same_matrix() {
        let from_object = AccessMatrix::from_json(&sample()).unwrap();
        let from_array = AccessMatrix::from_json(&to_array_notation(&sample())).unwrap();

        assert_eq!(from_object, from_array);
        assert_eq!(from_object.len(), 2);
    }

    #[test]
    fn test_notation_round_trip() {
        let array = to_array_notation(&sample());
        let again = to_array_notation(&to_object_notation(&array));
        assert_eq!(again, array);
    }

    #[test]
    fn test_get_all_renders_stored_form() {
        let matrix = AccessMatrix::from_json(&sample()).unwrap();
        let stored = matrix.get_all(&MatrixOptions::stored());

        let entries = stored.as_array().unwrap();
        assert_eq!(entries[0]["r"], "collection:library_book");
        assert!(entries[0]["a"]["read"]["filter"].is_string());

        assert_eq!(AccessMatrix::from_json(&stored).unwrap(), matrix);
    }

    #[test]
    fn test_get_with_falsy_types() {
        let matrix = AccessMatrix::from_json(&sample()).unwrap();
        let set = matrix
            .get_with("media:images", &MatrixOptions::default().with_falsy_types())
            .unwrap();

        assert_eq!(set.as_object().unwrap().len(), 7);
        assert!(matrix.get_with("unknown", &MatrixOptions::default()).is_none());
    }

    #[test]
    fn test_set_is_a_shallow_merge() {
        let mut matrix = AccessMatrix::from_json(&sample()).unwrap();
        matrix.set(
            "collection:library_book",
            PermissionSet::new().with(AccessType::Update, Access::Full),
        );

        let set = matrix.get("collection:library_book").unwrap();
        assert!(set.get(AccessType::Create).is_full());
        assert!(set.get(AccessType::Update).is_full());
        assert!(set.get(AccessType::Read).restriction().is_some());
    }

    #[test]
    fn test_remove() {
        let mut matrix = AccessMatrix::from_json(&sample()).unwrap();
        assert!(matrix.remove("media:images").is_some());
        assert!(!matrix.contains("media:images"));
        assert!(matrix.remove("media:images").is_none());
    }

    #[test]
    fn test_invalid_shapes_are_rejected() {
        assert!(AccessMatrix::from_json(&json!("docs")).is_err());
        assert!(AccessMatrix::from_json(&json!([{"a": {"read": true}}])).is_err());
        assert!(AccessMatrix::from_json(&JsonValue::Null).unwrap().is_empty());
    }
}
