//! Permission algebra used by the access resolver.
//!
//! All functions here are pure: inputs are borrowed and a new value is
//! returned.
//!
//! Merging only ever broadens access. Row filters are never combined: there
//! is no way to express "filter A OR filter B", so when two restricted grants
//! meet, the filter of the first one processed is kept as is.

use crate::matrix::AccessMatrix;
use crate::types::{Access, AccessType, PermissionSet, Projection, Restriction};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;

/// Field that records which client created a document
pub const CREATED_BY_FIELD: &str = "_createdBy";

/// Visible-field descriptor used while merging projections
#[derive(Debug, Clone, PartialEq, Eq)]
enum Visibility {
    /// Only these fields are visible
    Only(BTreeSet<String>),
    /// Every field except these is visible
    AllBut(BTreeSet<String>),
}

impl Visibility {
    fn of(projection: &Projection) -> Self {
        let fields = projection.mode_fields().into_iter().collect();
        if projection.is_exclusion() {
            Visibility::AllBut(fields)
        } else {
            Visibility::Only(fields)
        }
    }

    fn union(self, other: Visibility) -> Visibility {
        use Visibility::*;

        match (self, other) {
            (Only(a), Only(b)) => Only(a.union(&b).cloned().collect()),
            (AllBut(a), AllBut(b)) => AllBut(a.intersection(&b).cloned().collect()),
            (AllBut(excluded), Only(included)) | (Only(included), AllBut(excluded)) => {
                AllBut(excluded.difference(&included).cloned().collect())
            }
        }
    }

    fn into_projection(self) -> Projection {
        match self {
            Visibility::Only(fields) => Projection::from_fields(fields, false),
            Visibility::AllBut(fields) => Projection::from_fields(fields, true),
        }
    }
}

/// Merge projections into the broadest projection covering all of them.
///
/// `None` (or an empty projection) means "no restriction", which makes the
/// result unrestricted. Inclusions are unioned, exclusions intersected, and a
/// mix keeps only the exclusions no inclusion grants back.
pub fn merge_fields(projections: &[Option<&Projection>]) -> Projection {
    let mut merged: Option<Visibility> = None;

    for projection in projections {
        let projection = match projection {
            Some(projection) if !projection.is_empty() => projection,
            _ => return Projection::new(),
        };

        let incoming = Visibility::of(projection);
        merged = Some(match merged {
            Some(current) => current.union(incoming),
            None => incoming,
        });
    }

    merged.map(Visibility::into_projection).unwrap_or_default()
}

/// Broaden `a` with the grants of `b`.
pub fn combine_access_matrices(a: &PermissionSet, b: &PermissionSet) -> PermissionSet {
    let mut combined = a.clone();

    for access_type in AccessType::ALL {
        let current = a.get(access_type);
        let incoming = b.get(access_type);

        if current.is_full() || !incoming.is_granted() {
            continue;
        }

        let value = if incoming.is_full() {
            Access::Full
        } else if !current.is_granted() {
            incoming.clone()
        } else {
            let fields = merge_fields(&[current.projection(), incoming.projection()]);
            let filter = current.row_filter().cloned();

            match (fields.is_empty(), filter) {
                (true, None) => Access::Full,
                (true, filter) => Access::Restricted(Restriction { fields: None, filter }),
                (false, filter) => Access::Restricted(Restriction {
                    fields: Some(fields),
                    filter,
                }),
            }
        };

        combined.set(access_type, value);
    }

    combined
}

/// Combine every resource of `b` into `a`
pub fn combine_resources(a: &AccessMatrix, b: &AccessMatrix) -> AccessMatrix {
    let mut combined = a.clone();
    for (resource, set) in b.iter() {
        let merged = match combined.get(resource) {
            Some(existing) => combine_access_matrices(existing, set),
            None => combine_access_matrices(&PermissionSet::new(), set),
        };
        combined.replace(resource, merged);
    }
    combined
}

/// Fold `readOwn`, `updateOwn` and `deleteOwn` into their base types as a
/// grant filtered on `_createdBy == client_id`.
pub fn resolve_own_types(set: &PermissionSet, client_id: &str) -> PermissionSet {
    let mut resolved = set.clone();

    for own_type in AccessType::ALL.into_iter().filter(AccessType::is_own) {
        let Some(base_type) = own_type.base() else {
            continue;
        };
        let own = set.get(own_type);
        let base = resolved.get(base_type);

        if !own.is_granted() || base.is_full() {
            continue;
        }

        let mut filter = base.row_filter().cloned().unwrap_or_default();
        if let Some(own_filter) = own.row_filter() {
            filter.extend(own_filter.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        filter.insert(
            CREATED_BY_FIELD.to_string(),
            JsonValue::String(client_id.to_string()),
        );

        let fields = base.projection().or(own.projection()).cloned();

        resolved.set(
            base_type,
            Access::Restricted(Restriction {
                fields,
                filter: Some(filter),
            }),
        );
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn projection(value: JsonValue) -> Projection {
        Projection::from_json(&value).unwrap()
    }

    fn set(value: JsonValue) -> PermissionSet {
        PermissionSet::from_json(&value)
    }

    #[test]
    fn test_merge_fields_unions_inclusions() {
        let a = projection(json!({"title": 1}));
        let b = projection(json!({"title": 1, "body": 1}));

        assert_eq!(
            merge_fields(&[Some(&a), Some(&b)]),
            projection(json!({"title": 1, "body": 1}))
        );
    }

    #[test]
    fn test_merge_fields_intersects_exclusions() {
        let a = projection(json!({"secret": 0, "email": 0}));
        let b = projection(json!({"secret": 0, "phone": 0}));

        assert_eq!(merge_fields(&[Some(&a), Some(&b)]), projection(json!({"secret": 0})));
    }

    #[test]
    fn test_merge_fields_mixed_modes_keep_unreclaimed_exclusions() {
        let exclusion = projection(json!({"secret": 0, "email": 0}));
        let inclusion = projection(json!({"email": 1, "title": 1}));
        let expected = projection(json!({"secret": 0}));

        assert_eq!(merge_fields(&[Some(&exclusion), Some(&inclusion)]), expected);
        assert_eq!(merge_fields(&[Some(&inclusion), Some(&exclusion)]), expected);
    }

    #[test]
    fn test_merge_fields_absorption() {
        let p = projection(json!({"title": 1}));

        assert!(merge_fields(&[Some(&p), None]).is_empty());
        assert!(merge_fields(&[None, Some(&p)]).is_empty());
        assert!(merge_fields(&[Some(&p), Some(&Projection::new())]).is_empty());
        assert!(merge_fields(&[]).is_empty());
    }

    #[test]
    fn test_merge_fields_idempotence() {
        let samples = [
            projection(json!({"title": 1})),
            projection(json!({"title": 1, "_id": 0})),
            projection(json!({"secret": 0})),
            projection(json!({"secret": 0, "_id": 1})),
            projection(json!({"_id": 0})),
        ];

        for p in &samples {
            assert_eq!(merge_fields(&[Some(p), Some(p)]), merge_fields(&[Some(p)]));
        }
    }

    #[test]
    fn test_lone_id_exclusion_is_kept() {
        let p = projection(json!({"_id": 0}));
        assert_eq!(merge_fields(&[Some(&p)]), p);
    }

    #[test]
    fn test_combine_broadens_booleans() {
        let a = set(json!({"read": true, "create": false}));
        let b = set(json!({"create": true, "delete": false, "update": {"fields": {"a": 1}}}));

        let combined = combine_access_matrices(&a, &b);
        assert!(combined.get(AccessType::Read).is_full());
        assert!(combined.get(AccessType::Create).is_full());
        assert!(combined.entry(AccessType::Delete).is_none());
        assert_eq!(
            combined.get(AccessType::Update).projection(),
            Some(&projection(json!({"a": 1})))
        );
    }

    #[test]
    fn test_combine_collapses_unrestricted_fields_to_true() {
        let a = set(json!({"read": {"fields": {"title": 1}}}));
        let b = set(json!({"read": {"fields": {"secret": 0}}}));

        let combined = combine_access_matrices(&a, &b);
        assert!(combined.get(AccessType::Read).is_full());
    }

    #[test]
    fn test_combine_keeps_first_filter() {
        let a = set(json!({"read": {"filter": {"team": "blue"}, "fields": {"title": 1}}}));
        let b = set(json!({"read": {"filter": {"team": "red"}, "fields": {"body": 1}}}));

        let combined = combine_access_matrices(&a, &b);
        let read = combined.get(AccessType::Read);
        assert_eq!(read.row_filter().unwrap()["team"], "blue");
        assert_eq!(read.projection(), Some(&projection(json!({"title": 1, "body": 1}))));
    }

    #[test]
    fn test_combine_does_not_mutate_inputs() {
        let a = set(json!({"read": {"fields": {"title": 1}}}));
        let b = set(json!({"read": true}));
        let before = a.clone();

        let _ = combine_access_matrices(&a, &b);
        assert_eq!(a, before);
    }

    /// Whether `after` grants at least what `before` grants, for `fields`
    fn covers(after: &Access, before: &Access, fields: &[&str]) -> bool {
        let visible = |access: &Access, field: &str| match access.projection() {
            None => true,
            Some(p) if p.is_exclusion() => p.get(field) != Some(0),
            Some(p) => p.get(field) == Some(1),
        };

        match (before, after) {
            (Access::Denied, _) => true,
            (_, Access::Full) => true,
            (_, Access::Denied) => false,
            (Access::Full, _) => false,
            (Access::Restricted(_), Access::Restricted(_)) => {
                before.row_filter() == after.row_filter()
                    && fields
                        .iter()
                        .all(|f| !visible(before, f) || visible(after, f))
            }
        }
    }

    #[test]
    fn test_combine_is_monotonic() {
        let fields = ["_id", "title", "body", "secret"];
        let samples = vec![
            json!(false),
            json!(true),
            json!({"fields": {"title": 1}}),
            json!({"fields": {"title": 1, "body": 1}}),
            json!({"fields": {"secret": 0}}),
            json!({"fields": {"secret": 0, "body": 0}}),
            json!({"filter": {"team": "blue"}}),
            json!({"filter": {"team": "red"}, "fields": {"title": 1}}),
        ];

        for a in &samples {
            for b in &samples {
                let before = Access::from_json(a);
                let combined = combine_access_matrices(
                    &PermissionSet::new().with(AccessType::Read, before.clone()),
                    &PermissionSet::new().with(AccessType::Read, Access::from_json(b)),
                );
                assert!(
                    covers(combined.get(AccessType::Read), &before, &fields),
                    "combining {} with {} narrowed access",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_combine_resources_adds_new_resources() {
        let a = AccessMatrix::from_json(&json!({"docs": {"read": true}})).unwrap();
        let b = AccessMatrix::from_json(&json!({"docs": {"create": true}, "media": {"read": true}}))
            .unwrap();

        let combined = combine_resources(&a, &b);
        assert_eq!(combined.len(), 2);
        assert!(combined.get("docs").unwrap().get(AccessType::Create).is_full());
        assert!(combined.get("docs").unwrap().get(AccessType::Read).is_full());
    }

    #[test]
    fn test_resolve_own_types_creates_filtered_base() {
        let resolved = resolve_own_types(&set(json!({"readOwn": true})), "C1");

        assert_eq!(
            resolved.get(AccessType::Read),
            &Access::filter(json!({"_createdBy": "C1"}).as_object().cloned().unwrap())
        );
        assert!(resolved.get(AccessType::ReadOwn).is_full());
    }

    #[test]
    fn test_resolve_own_types_merges_filters_and_fields() {
        let resolved = resolve_own_types(
            &set(json!({
                "update": {"filter": {"status": "draft"}},
                "updateOwn": {"filter": {"status": "review", "lang": "en"}, "fields": {"title": 1}}
            })),
            "C1",
        );

        let update = resolved.get(AccessType::Update);
        assert_eq!(
            JsonValue::Object(update.row_filter().unwrap().clone()),
            json!({"status": "review", "lang": "en", "_createdBy": "C1"})
        );
        assert_eq!(update.projection(), Some(&projection(json!({"title": 1}))));
    }

    #[test]
    fn test_resolve_own_types_skips_full_base_and_falsy_own() {
        let original = set(json!({"delete": true, "deleteOwn": true, "readOwn": false}));
        assert_eq!(resolve_own_types(&original, "C1"), original);
    }

    #[test]
    fn test_resolve_own_types_is_idempotent() {
        let original = set(json!({
            "readOwn": {"fields": {"title": 1}},
            "update": {"fields": {"body": 1}},
            "updateOwn": true
        }));

        let once = resolve_own_types(&original, "C1");
        assert_eq!(resolve_own_types(&once, "C1"), once);
    }
}
