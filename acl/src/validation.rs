//! Static shape validation for access matrices.
//!
//! Validation is exhaustive: every problem in the input is reported in one
//! [`AclError::AccessMatrixValidation`], not just the first one found.

use crate::error::{AclError, Result, ValidationIssue};
use crate::types::AccessType;
use serde_json::{Map, Value as JsonValue};

/// Validate a single permission set such as `{"read": true}`
pub fn validate_permission_set(value: &JsonValue) -> Result<()> {
    into_result(permission_set_issues(value, ""))
}

/// Validate a whole matrix, in object or array notation
pub fn validate_access_matrix(value: &JsonValue) -> Result<()> {
    let mut issues = Vec::new();

    match value {
        JsonValue::Object(map) => {
            for (resource, set) in map {
                issues.extend(permission_set_issues(set, resource));
            }
        }
        JsonValue::Array(entries) => {
            for (index, entry) in entries.iter().enumerate() {
                match entry.get("r").and_then(JsonValue::as_str) {
                    Some(resource) => {
                        let set = entry.get("a").unwrap_or(&JsonValue::Null);
                        issues.extend(permission_set_issues(set, resource));
                    }
                    None => issues.push(ValidationIssue::new(
                        "INVALID_RESOURCE_ENTRY",
                        format!("[{}]", index),
                        "array notation entries need a string 'r'",
                    )),
                }
            }
        }
        _ => issues.push(ValidationIssue::new(
            "INVALID_RESOURCES",
            "",
            "access matrix must be an object or an array",
        )),
    }

    into_result(issues)
}

fn into_result(issues: Vec<ValidationIssue>) -> Result<()> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(AclError::AccessMatrixValidation(issues))
    }
}

fn path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn permission_set_issues(value: &JsonValue, prefix: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let Some(map) = value.as_object() else {
        issues.push(ValidationIssue::new(
            "INVALID_ACCESS_VALUE",
            prefix,
            "permission set must be an object",
        ));
        return issues;
    };

    for (key, access) in map {
        let field = path(prefix, key);

        if key.parse::<AccessType>().is_err() {
            issues.push(ValidationIssue::new(
                "INVALID_ACCESS_TYPE",
                field,
                format!("'{}' is not a valid access type", key),
            ));
            continue;
        }

        match access {
            JsonValue::Bool(_) => {}
            JsonValue::Object(complex) => complex_value_issues(complex, &field, &mut issues),
            _ => issues.push(ValidationIssue::new(
                "INVALID_ACCESS_VALUE",
                field,
                "access value must be a boolean or an object",
            )),
        }
    }

    issues
}

fn complex_value_issues(complex: &Map<String, JsonValue>, field: &str, issues: &mut Vec<ValidationIssue>) {
    for (key, value) in complex {
        let sub_field = path(field, key);

        match key.as_str() {
            "fields" => match value.as_object() {
                Some(projection) => projection_issues(projection, &sub_field, issues),
                None => issues.push(ValidationIssue::new(
                    "INVALID_ACCESS_VALUE_FIELDS",
                    sub_field,
                    "fields must be an object",
                )),
            },
            "filter" => {
                if !value.is_object() {
                    issues.push(ValidationIssue::new(
                        "INVALID_ACCESS_VALUE_FILTER",
                        sub_field,
                        "filter must be an object",
                    ));
                }
            }
            _ => issues.push(ValidationIssue::new(
                "INVALID_ACCESS_VALUE_KEY",
                sub_field,
                format!("'{}' is not a valid key, expected 'fields' or 'filter'", key),
            )),
        }
    }
}

fn projection_issues(projection: &Map<String, JsonValue>, field: &str, issues: &mut Vec<ValidationIssue>) {
    let mut has_inclusion = false;
    let mut has_exclusion = false;

    for (name, value) in projection {
        let flag = match value {
            JsonValue::Number(n) => n.as_u64().filter(|v| *v <= 1),
            JsonValue::Bool(b) => Some(u64::from(*b)),
            _ => None,
        };

        match flag {
            None => issues.push(ValidationIssue::new(
                "INVALID_FIELD_PROJECTION_VALUE",
                path(field, name),
                "projection values must be 0 or 1",
            )),
            Some(_) if name == "_id" => {}
            Some(0) => has_exclusion = true,
            Some(_) => has_inclusion = true,
        }
    }

    if has_inclusion && has_exclusion {
        issues.push(ValidationIssue::new(
            "INVALID_FIELD_PROJECTION",
            field,
            "projections cannot mix inclusion and exclusion",
        ));
    }
}
