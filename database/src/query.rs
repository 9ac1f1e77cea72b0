//! Minimal document query language shared by every collection.
//!
//! A query is a JSON object keyed by top-level document fields. A plain value
//! matches by equality, `{"$in": [..]}` by membership and `{"$ne": v}` by
//! inequality. A missing field compares as `null`. The empty query matches
//! every document.
//!
//! Conditions SQLite can decide on its own are pushed into the `WHERE` clause
//! (see [`sql_filter`]) so indexed lookups never scan the table; [`matches`]
//! is still the final word on every row returned.

use crate::{DatabaseError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;

/// A stored document
pub type Document = Map<String, JsonValue>;

/// Results of a find/create/update call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub results: Vec<Document>,
}

/// Results of a delete call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResults {
    #[serde(rename = "deletedCount")]
    pub deleted_count: u64,
}

/// Options for `find`
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Maximum number of documents to return
    pub limit: Option<usize>,
    /// Field to sort by, ascending
    pub sort_by: Option<String>,
}

impl FindOptions {
    pub fn sorted_by(field: impl Into<String>) -> Self {
        Self {
            sort_by: Some(field.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Check a query for unsupported operators before it touches the store
pub fn validate_query(query: &Document) -> Result<()> {
    for (field, condition) in query {
        if let Some(operators) = as_operator_object(condition) {
            for (operator, operand) in operators {
                match operator.as_str() {
                    "$in" if !operand.is_array() => {
                        return Err(DatabaseError::InvalidQuery(format!(
                            "$in on '{}' expects an array",
                            field
                        )));
                    }
                    "$in" | "$ne" => {}
                    other => {
                        return Err(DatabaseError::InvalidQuery(format!(
                            "unsupported operator '{}' on '{}'",
                            other, field
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// A `WHERE` clause narrowing a query in SQL, with its bound parameters.
///
/// Every row matching the query also satisfies the clause. The reverse need
/// not hold, so rows are rechecked with [`matches`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlFilter {
    pub clause: Option<String>,
    pub params: Vec<String>,
}

/// Push string equality, `null` and string `$in` conditions down to SQL
pub fn sql_filter(query: &Document) -> SqlFilter {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for (field, condition) in query {
        if !is_plain_field(field) {
            continue;
        }
        let expr = field_expr(field);

        match as_operator_object(condition) {
            Some(operators) => {
                let Some(JsonValue::Array(candidates)) = operators.get("$in") else {
                    continue;
                };
                if candidates.is_empty() {
                    clauses.push("0".to_string());
                    continue;
                }
                let strings: Option<Vec<&str>> = candidates.iter().map(JsonValue::as_str).collect();
                if let Some(strings) = strings {
                    let placeholders = vec!["?"; strings.len()].join(", ");
                    clauses.push(format!("{} IN ({})", expr, placeholders));
                    params.extend(strings.into_iter().map(String::from));
                }
            }
            None => match condition {
                JsonValue::String(value) => {
                    clauses.push(format!("{} = ?", expr));
                    params.push(value.clone());
                }
                JsonValue::Null => clauses.push(format!("{} IS NULL", expr)),
                _ => {}
            },
        }
    }

    SqlFilter {
        clause: (!clauses.is_empty()).then(|| clauses.join(" AND ")),
        params,
    }
}

/// SQL expression reading a top-level field. `_id` lives in the `id` column.
pub(crate) fn field_expr(field: &str) -> String {
    if field == "_id" {
        "id".to_string()
    } else {
        format!("json_extract(document, '$.{}')", field)
    }
}

/// Field names that can be spliced into a JSON path
pub(crate) fn is_plain_field(field: &str) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether `document` satisfies `query`
pub fn matches(document: &Document, query: &Document) -> bool {
    query.iter().all(|(field, condition)| {
        let value = document.get(field).unwrap_or(&JsonValue::Null);

        match as_operator_object(condition) {
            Some(operators) => operators.iter().all(|(operator, operand)| match operator.as_str() {
                "$in" => operand
                    .as_array()
                    .map(|candidates| candidates.contains(value))
                    .unwrap_or(false),
                "$ne" => value != operand,
                _ => false,
            }),
            None => value == condition,
        }
    })
}

/// Sort and truncate results according to `options`
pub fn apply_options(mut documents: Vec<Document>, options: &FindOptions) -> Vec<Document> {
    if let Some(field) = &options.sort_by {
        documents.sort_by(|a, b| compare_values(a.get(field), b.get(field)));
    }
    if let Some(limit) = options.limit {
        documents.truncate(limit);
    }
    documents
}

fn as_operator_object(condition: &JsonValue) -> Option<&Map<String, JsonValue>> {
    condition
        .as_object()
        .filter(|map| !map.is_empty() && map.keys().all(|key| key.starts_with('$')))
}

fn compare_values(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    match (a, b) {
        (Some(JsonValue::String(a)), Some(JsonValue::String(b))) => a.cmp(b),
        (Some(JsonValue::Number(a)), Some(JsonValue::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: JsonValue) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_query_matches_everything() {
        assert!(matches(&doc(json!({"a": 1})), &Document::new()));
    }

    #[test]
    fn test_equality_and_missing_fields() {
        let document = doc(json!({"name": "editor", "extends": null}));

        assert!(matches(&document, &doc(json!({"name": "editor"}))));
        assert!(!matches(&document, &doc(json!({"name": "author"}))));
        assert!(matches(&document, &doc(json!({"extends": null}))));
        assert!(matches(&document, &doc(json!({"missing": null}))));
    }

    #[test]
    fn test_in_and_ne_operators() {
        let document = doc(json!({"name": "editor"}));

        assert!(matches(&document, &doc(json!({"name": {"$in": ["author", "editor"]}}))));
        assert!(!matches(&document, &doc(json!({"name": {"$in": []}}))));
        assert!(matches(&document, &doc(json!({"name": {"$ne": "author"}}))));
        assert!(!matches(&document, &doc(json!({"name": {"$ne": "editor"}}))));
    }

    #[test]
    fn test_plain_objects_compare_by_equality() {
        let document = doc(json!({"data": {"team": "blue"}}));
        assert!(matches(&document, &doc(json!({"data": {"team": "blue"}}))));
    }

    #[test]
    fn test_validate_query_rejects_unknown_operators() {
        assert!(validate_query(&doc(json!({"a": {"$in": [1]}}))).is_ok());
        assert!(validate_query(&doc(json!({"a": {"$in": 1}}))).is_err());
        assert!(validate_query(&doc(json!({"a": {"$regex": "x"}}))).is_err());
    }

    #[test]
    fn test_sql_filter_pushes_down_exact_conditions() {
        let filter = sql_filter(&doc(json!({
            "client": "c1",
            "extends": null,
            "resource": {"$in": ["docs", "media"]}
        })));

        assert_eq!(
            filter.clause.as_deref(),
            Some(
                "json_extract(document, '$.client') = ? AND \
                 json_extract(document, '$.extends') IS NULL AND \
                 json_extract(document, '$.resource') IN (?, ?)"
            )
        );
        assert_eq!(filter.params, vec!["c1", "docs", "media"]);
    }

    #[test]
    fn test_sql_filter_leaves_the_rest_to_matches() {
        assert_eq!(sql_filter(&Document::new()), SqlFilter::default());

        let filter = sql_filter(&doc(json!({
            "tier": 1,
            "name": {"$ne": "x"},
            "roles": {"$in": ["a", 2]},
            "odd.field": "x"
        })));
        assert_eq!(filter, SqlFilter::default());

        let by_id = sql_filter(&doc(json!({"_id": "abc", "name": {"$in": []}})));
        assert_eq!(by_id.clause.as_deref(), Some("id = ? AND 0"));
        assert_eq!(by_id.params, vec!["abc"]);
    }

    #[test]
    fn test_sort_and_limit() {
        let documents = vec![
            doc(json!({"clientId": "c"})),
            doc(json!({"clientId": "a"})),
            doc(json!({"clientId": "b"})),
        ];

        let sorted = apply_options(documents, &FindOptions::sorted_by("clientId").with_limit(2));
        let ids: Vec<_> = sorted.iter().map(|d| d["clientId"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
