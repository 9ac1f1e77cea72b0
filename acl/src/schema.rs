//! Input document validation for client, role and key records.
//!
//! A [`Schema`] lists the fields a record accepts. Input is checked in three
//! passes, each failing with its own error so the boundary can tell them
//! apart: unknown or read-only fields (`INVALID_FIELDS`), absent required
//! fields (`MISSING_FIELDS`), then per-field type checks (`VALIDATION_ERROR`,
//! or `ACCESS_MATRIX_VALIDATION_FAILED` for matrix fields).

use crate::error::{AclError, Result, ValidationIssue};
use crate::validation::validate_access_matrix;
use serde_json::Value as JsonValue;

/// Accepted value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    /// String or `null`
    NullableString,
    Object,
    StringArray,
    AccessMatrix,
}

/// One accepted input field
#[derive(Debug, Clone)]
pub struct Field {
    pub id: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub writable: bool,
}

impl Field {
    pub fn optional(id: &'static str, field_type: FieldType) -> Self {
        Self {
            id,
            field_type,
            required: false,
            writable: true,
        }
    }

    pub fn required(id: &'static str, field_type: FieldType) -> Self {
        Self {
            required: true,
            ..Self::optional(id, field_type)
        }
    }

    /// Mark the field as settable or not through this schema
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }
}

/// Whether required fields are enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Create,
    Update,
}

#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Validate an input document against this schema
    pub fn validate_document(&self, document: &JsonValue, mode: ValidationMode) -> Result<()> {
        let Some(map) = document.as_object() else {
            return Err(AclError::Validation(vec![ValidationIssue::new(
                "INVALID_DOCUMENT",
                "",
                "input must be an object",
            )]));
        };

        let invalid: Vec<String> = map
            .keys()
            .filter(|key| !self.field(key).map(|f| f.writable).unwrap_or(false))
            .cloned()
            .collect();
        if !invalid.is_empty() {
            return Err(AclError::InvalidFields(invalid));
        }

        if mode == ValidationMode::Create {
            let missing: Vec<String> = self
                .fields
                .iter()
                .filter(|f| f.required && map.get(f.id).map(JsonValue::is_null).unwrap_or(true))
                .map(|f| f.id.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(AclError::MissingFields(missing));
            }
        }

        let mut issues = Vec::new();
        let mut matrix_issues = Vec::new();
        for (key, value) in map {
            if let Some(field) = self.field(key) {
                if field.field_type == FieldType::AccessMatrix {
                    if let Err(AclError::AccessMatrixValidation(found)) = validate_access_matrix(value) {
                        matrix_issues.extend(found.into_iter().map(|mut issue| {
                            issue.field = join_path(field.id, &issue.field);
                            issue
                        }));
                    }
                } else if let Some(issue) = FieldValidator::validate_field_value(field, value) {
                    issues.push(issue);
                }
            }
        }

        if !issues.is_empty() {
            return Err(AclError::Validation(issues));
        }
        if !matrix_issues.is_empty() {
            return Err(AclError::AccessMatrixValidation(matrix_issues));
        }
        Ok(())
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if field.is_empty() {
        prefix.to_string()
    } else if field.starts_with('[') {
        format!("{}{}", prefix, field)
    } else {
        format!("{}.{}", prefix, field)
    }
}

/// Field validator for validating field values
pub struct FieldValidator;

impl FieldValidator {
    /// Validate a field value against its field definition
    pub fn validate_field_value(field: &Field, value: &JsonValue) -> Option<ValidationIssue> {
        let valid = match field.field_type {
            FieldType::String => value.as_str().map(|s| !s.is_empty()).unwrap_or(false),
            FieldType::NullableString => value.is_null() || value.is_string(),
            FieldType::Object => value.is_object(),
            FieldType::StringArray => value
                .as_array()
                .map(|items| items.iter().all(JsonValue::is_string))
                .unwrap_or(false),
            FieldType::AccessMatrix => value.is_object() || value.is_array(),
        };

        if valid {
            return None;
        }

        let expected = match field.field_type {
            FieldType::String => "a non-empty string",
            FieldType::NullableString => "a string or null",
            FieldType::Object => "an object",
            FieldType::StringArray => "an array of strings",
            FieldType::AccessMatrix => "an access matrix",
        };

        Some(ValidationIssue::new(
            "INVALID_FIELD_TYPE",
            field.id,
            format!("Field '{}' expects {}", field.id, expected),
        ))
    }
}
