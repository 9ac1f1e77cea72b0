//! Request-time decisions over resolved permission sets, and field
//! projection of records.

use crate::error::AclError;
use crate::types::{Access, AccessType, Filter, PermissionSet, Projection};
use serde_json::{Map, Value as JsonValue};

/// Outcome of checking one access type
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Denied,
    /// Granted, possibly limited to some fields and to rows matching `filter`
    Allowed {
        fields: Option<Projection>,
        filter: Option<Filter>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Allowed without any restriction
    pub fn is_unrestricted(&self) -> bool {
        matches!(
            self,
            Decision::Allowed {
                fields: None,
                filter: None
            }
        )
    }
}

/// Turns resolved permission sets into request-time decisions.
///
/// Merging a decision's filter into an outgoing query is up to the query
/// layer; the evaluator only hands it out.
pub struct PermissionEvaluator;

impl PermissionEvaluator {
    pub fn evaluate(set: &PermissionSet, access_type: AccessType) -> Decision {
        match set.get(access_type) {
            Access::Denied => Decision::Denied,
            Access::Full => Decision::Allowed {
                fields: None,
                filter: None,
            },
            Access::Restricted(restriction) => Decision::Allowed {
                fields: restriction.fields.clone().filter(|p| !p.is_empty()),
                filter: restriction.filter.clone(),
            },
        }
    }

    /// The error to answer a denied request with
    pub fn deny(identity_known: bool) -> AclError {
        if identity_known {
            AclError::Forbidden
        } else {
            AclError::Unauthorised
        }
    }

    /// Apply the field projection of `access` to a record or a list of field
    /// names. Anything else, or an access value without fields, passes
    /// through unchanged.
    pub fn filter_fields(access: &Access, input: &JsonValue) -> JsonValue {
        let projection = access.projection();
        match input {
            JsonValue::Object(record) => JsonValue::Object(Self::filter_record(projection, record)),
            JsonValue::Array(items) if items.iter().all(JsonValue::is_string) => {
                let names: Vec<String> = items
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(String::from)
                    .collect();
                JsonValue::Array(
                    Self::filter_field_names(projection, &names)
                        .into_iter()
                        .map(JsonValue::String)
                        .collect(),
                )
            }
            other => other.clone(),
        }
    }

    pub fn filter_record(
        projection: Option<&Projection>,
        record: &Map<String, JsonValue>,
    ) -> Map<String, JsonValue> {
        record
            .iter()
            .filter(|(field, _)| is_visible(projection, field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }

    pub fn filter_field_names(projection: Option<&Projection>, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|field| is_visible(projection, field))
            .cloned()
            .collect()
    }
}

fn is_visible(projection: Option<&Projection>, field: &str) -> bool {
    match projection {
        None => true,
        Some(p) if p.is_empty() => true,
        Some(p) if p.is_exclusion() => p.get(field) != Some(0),
        Some(p) => p.get(field) == Some(1),
    }
}
