//! Error types for the ACL core.
//!
//! Every variant maps to one taxonomy code (see [`AclError::code`]). The HTTP
//! boundary turns codes into status codes with [`AclError::status_code`]; the
//! core itself never builds responses.
//!
//! Authorization failures are normally represented by an empty grant rather
//! than an error. `Forbidden` and `Unauthorised` exist for the boundary, which
//! picks one depending on whether the acting identity could be resolved.

use database::DatabaseError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

/// One structured validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(code: &str, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the client, role and key stores and the access resolver.
#[derive(Debug, Error)]
pub enum AclError {
    /// Document-level validation failed.
    #[error("Validation failed with {} problem(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    /// An access matrix had the wrong shape.
    #[error("Access matrix validation failed with {} problem(s)", .0.len())]
    AccessMatrixValidation(Vec<ValidationIssue>),

    /// Input contained fields that are unknown or may not be set.
    #[error("Invalid fields: {}", .0.join(", "))]
    InvalidFields(Vec<String>),

    /// Input lacked required fields.
    #[error("Missing fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Client already exists: {0}")]
    ClientExists(String),

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    #[error("Role already exists: {0}")]
    RoleExists(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Client {client} already has resource {resource}")]
    ClientHasResource { client: String, resource: String },

    #[error("Client {client} does not have resource {resource}")]
    ClientDoesNotHaveResource { client: String, resource: String },

    #[error("Role {role} already has resource {resource}")]
    RoleHasResource { role: String, resource: String },

    #[error("Role {role} does not have resource {resource}")]
    RoleDoesNotHaveResource { role: String, resource: String },

    #[error("Key {key} already has resource {resource}")]
    KeyHasResource { key: String, resource: String },

    #[error("Key {key} does not have resource {resource}")]
    KeyDoesNotHaveResource { key: String, resource: String },

    /// One or more role names do not exist.
    #[error("Invalid roles: {}", .0.join(", "))]
    InvalidRole(Vec<String>),

    /// The `extends` target does not exist or would create a cycle.
    #[error("Invalid parent role: {0}")]
    InvalidParentRole(String),

    /// The current secret supplied with a secret change did not match.
    #[error("The current secret is invalid")]
    InvalidSecret,

    #[error("Forbidden")]
    Forbidden,

    #[error("Unauthorised")]
    Unauthorised,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Secret hashing failed: {0}")]
    Hashing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AclError {
    /// Taxonomy code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AclError::Validation(_) => "VALIDATION_ERROR",
            AclError::AccessMatrixValidation(_) => "ACCESS_MATRIX_VALIDATION_FAILED",
            AclError::InvalidFields(_) => "INVALID_FIELDS",
            AclError::MissingFields(_) => "MISSING_FIELDS",
            AclError::ClientNotFound(_) => "CLIENT_NOT_FOUND",
            AclError::ClientExists(_) => "CLIENT_EXISTS",
            AclError::RoleNotFound(_) => "ROLE_NOT_FOUND",
            AclError::RoleExists(_) => "ROLE_EXISTS",
            AclError::KeyNotFound(_) => "KEY_NOT_FOUND",
            AclError::ClientHasResource { .. } => "CLIENT_HAS_RESOURCE",
            AclError::ClientDoesNotHaveResource { .. } => "CLIENT_DOES_NOT_HAVE_RESOURCE",
            AclError::RoleHasResource { .. } => "ROLE_HAS_RESOURCE",
            AclError::RoleDoesNotHaveResource { .. } => "ROLE_DOES_NOT_HAVE_RESOURCE",
            AclError::KeyHasResource { .. } => "KEY_HAS_RESOURCE",
            AclError::KeyDoesNotHaveResource { .. } => "KEY_DOES_NOT_HAVE_RESOURCE",
            AclError::InvalidRole(_) => "INVALID_ROLE",
            AclError::InvalidParentRole(_) => "INVALID_PARENT_ROLE",
            AclError::InvalidSecret => "INVALID_SECRET",
            AclError::Forbidden => "FORBIDDEN",
            AclError::Unauthorised => "UNAUTHORISED",
            AclError::Database(_) => "DATABASE_ERROR",
            AclError::Serialization(_) => "SERIALIZATION_ERROR",
            AclError::Hashing(_) => "HASHING_ERROR",
            AclError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// HTTP status the boundary layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            AclError::Validation(_)
            | AclError::AccessMatrixValidation(_)
            | AclError::InvalidFields(_)
            | AclError::MissingFields(_)
            | AclError::InvalidRole(_)
            | AclError::InvalidParentRole(_)
            | AclError::InvalidSecret => 400,
            AclError::Unauthorised => 401,
            AclError::Forbidden => 403,
            AclError::ClientNotFound(_)
            | AclError::RoleNotFound(_)
            | AclError::KeyNotFound(_)
            | AclError::ClientDoesNotHaveResource { .. }
            | AclError::RoleDoesNotHaveResource { .. }
            | AclError::KeyDoesNotHaveResource { .. } => 404,
            AclError::ClientExists(_)
            | AclError::RoleExists(_)
            | AclError::ClientHasResource { .. }
            | AclError::RoleHasResource { .. }
            | AclError::KeyHasResource { .. } => 409,
            AclError::Database(_)
            | AclError::Serialization(_)
            | AclError::Hashing(_)
            | AclError::Configuration(_) => 500,
        }
    }

    /// Structured validation problems, if this is a validation failure
    pub fn issues(&self) -> Option<&[ValidationIssue]> {
        match self {
            AclError::Validation(issues) | AclError::AccessMatrixValidation(issues) => {
                Some(issues)
            }
            _ => None,
        }
    }

    /// Whether the target entity or sub-resource was absent
    pub fn is_not_found(&self) -> bool {
        self.status_code() == 404
    }

    /// Structured detail for the boundary layer
    pub fn data(&self) -> Option<JsonValue> {
        match self {
            AclError::Validation(issues) | AclError::AccessMatrixValidation(issues) => {
                serde_json::to_value(issues).ok()
            }
            AclError::InvalidFields(fields) | AclError::MissingFields(fields) => {
                Some(json!(fields))
            }
            AclError::InvalidRole(roles) => Some(json!(roles)),
            _ => None,
        }
    }
}

/// A specialized Result type for ACL operations.
pub type Result<T> = std::result::Result<T, AclError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AclError::ClientNotFound("c1".to_string());
        assert_eq!(err.to_string(), "Client not found: c1");

        let err = AclError::InvalidFields(vec!["accessType".into(), "bogus".into()]);
        assert_eq!(err.to_string(), "Invalid fields: accessType, bogus");

        let err = AclError::Validation(vec![
            ValidationIssue::new("A", "x", "first"),
            ValidationIssue::new("B", "y", "second"),
        ]);
        assert_eq!(err.to_string(), "Validation failed with 2 problem(s)");
    }

    #[test]
    fn test_codes_and_status() {
        let cases = vec![
            (AclError::ClientNotFound("c".into()), "CLIENT_NOT_FOUND", 404),
            (AclError::RoleExists("r".into()), "ROLE_EXISTS", 409),
            (AclError::MissingFields(vec!["secret".into()]), "MISSING_FIELDS", 400),
            (AclError::InvalidParentRole("r".into()), "INVALID_PARENT_ROLE", 400),
            (AclError::Unauthorised, "UNAUTHORISED", 401),
            (AclError::Forbidden, "FORBIDDEN", 403),
            (
                AclError::RoleDoesNotHaveResource {
                    role: "r".into(),
                    resource: "docs".into(),
                },
                "ROLE_DOES_NOT_HAVE_RESOURCE",
                404,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.status_code(), status);
        }
    }

    #[test]
    fn test_issues_are_exposed() {
        let err = AclError::AccessMatrixValidation(vec![ValidationIssue::new(
            "INVALID_ACCESS_TYPE",
            "bogus",
            "unknown access type",
        )]);
        assert_eq!(err.issues().unwrap().len(), 1);
        assert_eq!(err.data().unwrap()[0]["code"], "INVALID_ACCESS_TYPE");

        assert!(AclError::Forbidden.issues().is_none());
        assert!(AclError::KeyNotFound("k".into()).is_not_found());
    }
}
