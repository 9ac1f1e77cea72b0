//! Permission value types.
//!
//! An access type maps to one of three values: no access (`false`), full
//! access (`true`) or a restriction object carrying an optional field
//! projection and an optional row filter.
//!
//! `fields` and `filter` cross a serialization boundary: they are stored as
//! JSON text for flat persistence and handled as parsed objects in memory.
//! Parsing is lenient. A malformed sub-value degrades that access type to
//! `false` rather than failing, so a bad stored record can only ever deny.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Row filter predicate, opaque to the ACL core
pub type Filter = Map<String, JsonValue>;

/// The seven access types a permission set can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessType {
    Create,
    Read,
    Update,
    Delete,
    ReadOwn,
    UpdateOwn,
    DeleteOwn,
}

impl AccessType {
    pub const ALL: [AccessType; 7] = [
        AccessType::Create,
        AccessType::Read,
        AccessType::Update,
        AccessType::Delete,
        AccessType::ReadOwn,
        AccessType::UpdateOwn,
        AccessType::DeleteOwn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Create => "create",
            AccessType::Read => "read",
            AccessType::Update => "update",
            AccessType::Delete => "delete",
            AccessType::ReadOwn => "readOwn",
            AccessType::UpdateOwn => "updateOwn",
            AccessType::DeleteOwn => "deleteOwn",
        }
    }

    /// The base type an `*Own` type folds into
    pub fn base(&self) -> Option<AccessType> {
        match self {
            AccessType::ReadOwn => Some(AccessType::Read),
            AccessType::UpdateOwn => Some(AccessType::Update),
            AccessType::DeleteOwn => Some(AccessType::Delete),
            _ => None,
        }
    }

    pub fn is_own(&self) -> bool {
        self.base().is_some()
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown access type '{}'", s))
    }
}

/// Field projection: field name to `1` (include) or `0` (exclude).
///
/// A valid projection is all-`0` or all-`1`, except for `_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection(BTreeMap<String, u8>);

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inclusion (`exclude == false`) or exclusion projection
    pub fn from_fields<I, S>(fields: I, exclude: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let value = if exclude { 0 } else { 1 };
        Self(fields.into_iter().map(|f| (f.into(), value)).collect())
    }

    pub fn insert(&mut self, field: impl Into<String>, value: u8) {
        self.0.insert(field.into(), value.min(1));
    }

    pub fn get(&self, field: &str) -> Option<u8> {
        self.0.get(field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u8)> {
        self.0.iter()
    }

    /// Exclusion mode is decided by any non-`_id` field set to `0`, or by a
    /// lone `{_id: 0}`
    pub fn is_exclusion(&self) -> bool {
        let mut others = self.0.iter().filter(|(field, _)| *field != "_id").peekable();
        if others.peek().is_none() {
            return self.0.get("_id") == Some(&0);
        }
        others.any(|(_, value)| *value == 0)
    }

    /// Fields whose value matches the projection's mode
    pub fn mode_fields(&self) -> Vec<String> {
        let wanted = if self.is_exclusion() { 0 } else { 1 };
        self.0
            .iter()
            .filter(|(_, value)| **value == wanted)
            .map(|(field, _)| field.clone())
            .collect()
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.0
                .iter()
                .map(|(field, value)| (field.clone(), JsonValue::from(*value)))
                .collect(),
        )
    }

    /// Parse a projection object; `None` if it isn't one
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        let map = value.as_object()?;
        let mut projection = Projection::new();
        for (field, value) in map {
            let flag = match value {
                JsonValue::Bool(b) => u8::from(*b),
                JsonValue::Number(n) => match n.as_u64() {
                    Some(v @ (0 | 1)) => v as u8,
                    _ => return None,
                },
                _ => return None,
            };
            projection.insert(field.clone(), flag);
        }
        Some(projection)
    }
}

/// Restriction attached to a partially granted access type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Restriction {
    pub fields: Option<Projection>,
    pub filter: Option<Filter>,
}

impl Restriction {
    pub fn is_empty(&self) -> bool {
        self.fields.is_none() && self.filter.is_none()
    }
}

/// Value of one access type
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Access {
    #[default]
    Denied,
    Full,
    Restricted(Restriction),
}

static DENIED_ACCESS: Access = Access::Denied;

impl Access {
    pub fn fields(fields: Projection) -> Self {
        Access::Restricted(Restriction {
            fields: Some(fields),
            filter: None,
        })
    }

    pub fn filter(filter: Filter) -> Self {
        Access::Restricted(Restriction {
            fields: None,
            filter: Some(filter),
        })
    }

    /// Truthy: full or restricted access
    pub fn is_granted(&self) -> bool {
        !matches!(self, Access::Denied)
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Access::Full)
    }

    pub fn restriction(&self) -> Option<&Restriction> {
        match self {
            Access::Restricted(restriction) => Some(restriction),
            _ => None,
        }
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.restriction().and_then(|r| r.fields.as_ref())
    }

    pub fn row_filter(&self) -> Option<&Filter> {
        self.restriction().and_then(|r| r.filter.as_ref())
    }

    pub fn to_json(&self, stringify_objects: bool) -> JsonValue {
        match self {
            Access::Denied => JsonValue::Bool(false),
            Access::Full => JsonValue::Bool(true),
            Access::Restricted(restriction) => {
                let mut map = Map::new();
                if let Some(fields) = &restriction.fields {
                    map.insert("fields".to_string(), encode(fields.to_json(), stringify_objects));
                }
                if let Some(filter) = &restriction.filter {
                    map.insert(
                        "filter".to_string(),
                        encode(JsonValue::Object(filter.clone()), stringify_objects),
                    );
                }
                JsonValue::Object(map)
            }
        }
    }

    /// Parse a stored or submitted value, accepting stringified sub-values
    pub fn from_json(value: &JsonValue) -> Access {
        match value {
            JsonValue::Bool(true) => Access::Full,
            JsonValue::Object(map) => {
                let mut restriction = Restriction::default();

                if let Some(raw) = map.get("fields") {
                    match decode(raw).as_ref().and_then(Projection::from_json) {
                        Some(fields) => restriction.fields = Some(fields),
                        None => {
                            warn!("Discarding access entry with malformed fields: {}", raw);
                            return Access::Denied;
                        }
                    }
                }

                if let Some(raw) = map.get("filter") {
                    match decode(raw) {
                        Some(JsonValue::Object(filter)) => restriction.filter = Some(filter),
                        _ => {
                            warn!("Discarding access entry with malformed filter: {}", raw);
                            return Access::Denied;
                        }
                    }
                }

                Access::Restricted(restriction)
            }
            _ => Access::Denied,
        }
    }
}

fn encode(value: JsonValue, stringify: bool) -> JsonValue {
    if stringify {
        JsonValue::String(value.to_string())
    } else {
        value
    }
}

fn decode(value: &JsonValue) -> Option<JsonValue> {
    match value {
        JsonValue::String(text) => serde_json::from_str(text).ok(),
        other => Some(other.clone()),
    }
}

/// Output shaping for permission sets and matrices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatrixOptions {
    /// Fill every access type, using explicit `false` where absent
    pub add_falsy_types: bool,
    /// Emit `[{r, a}]` instead of `{resource: set}` (matrices only)
    pub array_notation: bool,
    /// Emit `fields`/`filter` as JSON text instead of objects
    pub stringify_objects: bool,
}

impl MatrixOptions {
    /// The flat persistence format
    pub fn stored() -> Self {
        Self {
            array_notation: true,
            stringify_objects: true,
            ..Self::default()
        }
    }

    pub fn with_falsy_types(mut self) -> Self {
        self.add_falsy_types = true;
        self
    }

    pub fn with_stringified_objects(mut self) -> Self {
        self.stringify_objects = true;
        self
    }
}

/// Access values of a single resource, keyed by access type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionSet(BTreeMap<AccessType, Access>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every access type set to `true`
    pub fn full() -> Self {
        Self(AccessType::ALL.iter().map(|t| (*t, Access::Full)).collect())
    }

    /// Builder-style setter
    pub fn with(mut self, access_type: AccessType, access: Access) -> Self {
        self.0.insert(access_type, access);
        self
    }

    /// Value for `access_type`, `Denied` when absent
    pub fn get(&self, access_type: AccessType) -> &Access {
        self.0.get(&access_type).unwrap_or(&DENIED_ACCESS)
    }

    pub fn entry(&self, access_type: AccessType) -> Option<&Access> {
        self.0.get(&access_type)
    }

    pub fn set(&mut self, access_type: AccessType, access: Access) {
        self.0.insert(access_type, access);
    }

    pub fn remove(&mut self, access_type: AccessType) -> Option<Access> {
        self.0.remove(&access_type)
    }

    pub fn is_granted(&self, access_type: AccessType) -> bool {
        self.get(access_type).is_granted()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccessType, &Access)> {
        self.0.iter()
    }

    /// Shallow merge: every type present in `other` replaces ours
    pub fn extend(&mut self, other: &PermissionSet) {
        for (access_type, access) in other.iter() {
            self.0.insert(*access_type, access.clone());
        }
    }

    /// Copy with explicit `false` for every absent access type
    pub fn with_falsy_types(&self) -> Self {
        let mut filled = self.clone();
        for access_type in AccessType::ALL {
            filled.0.entry(access_type).or_insert(Access::Denied);
        }
        filled
    }

    pub fn to_json(&self, options: &MatrixOptions) -> JsonValue {
        let set = if options.add_falsy_types {
            self.with_falsy_types()
        } else {
            self.clone()
        };

        JsonValue::Object(
            set.0
                .iter()
                .map(|(access_type, access)| {
                    (
                        access_type.as_str().to_string(),
                        access.to_json(options.stringify_objects),
                    )
                })
                .collect(),
        )
    }

    /// Lenient parse; unknown access types are dropped
    pub fn from_json(value: &JsonValue) -> PermissionSet {
        let mut set = PermissionSet::new();
        if let Some(map) = value.as_object() {
            for (key, raw) in map {
                match key.parse::<AccessType>() {
                    Ok(access_type) => set.set(access_type, Access::from_json(raw)),
                    Err(_) => warn!("Ignoring unknown access type '{}'", key),
                }
            }
        }
        set
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json(&MatrixOptions::default()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Ok(PermissionSet::from_json(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_access_type_names() {
        for access_type in AccessType::ALL {
            assert_eq!(access_type.as_str().parse::<AccessType>().unwrap(), access_type);
        }
        assert!("bogus".parse::<AccessType>().is_err());
        assert_eq!(AccessType::UpdateOwn.base(), Some(AccessType::Update));
        assert_eq!(AccessType::Update.base(), None);
        assert_eq!(
            serde_json::to_value(AccessType::DeleteOwn).unwrap(),
            json!("deleteOwn")
        );
    }

    #[test]
    fn test_projection_mode() {
        let exclusion = Projection::from_json(&json!({"secret": 0, "_id": 1})).unwrap();
        assert!(exclusion.is_exclusion());
        assert_eq!(exclusion.mode_fields(), vec!["secret".to_string()]);

        let inclusion = Projection::from_json(&json!({"title": 1, "_id": 0})).unwrap();
        assert!(!inclusion.is_exclusion());
        assert_eq!(inclusion.mode_fields(), vec!["title".to_string()]);

        assert!(Projection::from_json(&json!({"title": 2})).is_none());
        assert!(Projection::from_json(&json!("title")).is_none());
    }

    #[test]
    fn test_access_parses_stringified_sub_values() {
        let access = Access::from_json(&json!({
            "fields": "{\"title\":1}",
            "filter": "{\"published\":true}"
        }));

        assert_eq!(access.projection().unwrap().get("title"), Some(1));
        assert_eq!(access.row_filter().unwrap()["published"], json!(true));
    }

    #[test]
    fn test_malformed_json_degrades_to_denied() {
        assert_eq!(Access::from_json(&json!({"filter": "{bad json"})), Access::Denied);
        assert_eq!(Access::from_json(&json!({"fields": "[1, 2]"})), Access::Denied);
        assert_eq!(Access::from_json(&json!("yes")), Access::Denied);
    }

    #[test]
    fn test_stringify_then_parse_round_trip() {
        let set = PermissionSet::from_json(&json!({
            "read": {"fields": {"title": 1, "body": 1}, "filter": {"author": "me"}},
            "update": true,
            "delete": false
        }));

        let stored = set.to_json(&MatrixOptions::default().with_stringified_objects());
        assert!(stored["read"]["fields"].is_string());
        assert!(stored["read"]["filter"].is_string());

        assert_eq!(PermissionSet::from_json(&stored), set);
    }

    #[test]
    fn test_falsy_types_are_filled() {
        let set = PermissionSet::new().with(AccessType::Read, Access::Full);
        let output = set.to_json(&MatrixOptions::default().with_falsy_types());

        assert_eq!(output.as_object().unwrap().len(), 7);
        assert_eq!(output["read"], json!(true));
        assert_eq!(output["create"], json!(false));
        assert_eq!(output["deleteOwn"], json!(false));
    }

    #[test]
    fn test_unknown_access_types_are_dropped_on_parse() {
        let set = PermissionSet::from_json(&json!({"read": true, "bogus": true}));
        assert_eq!(set.len(), 1);
        assert!(set.is_granted(AccessType::Read));
        assert!(!set.is_granted(AccessType::Create));
    }

    #[test]
    fn test_serde_uses_parsed_form() {
        let set: PermissionSet =
            serde_json::from_value(json!({"create": {"filter": "{\"a\":1}"}})).unwrap();
        assert_eq!(
            serde_json::to_value(&set).unwrap(),
            json!({"create": {"filter": {"a": 1}}})
        );
    }
}
