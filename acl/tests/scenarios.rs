use acl::{
    Access, AccessListing, AccessType, Acl, AclConfig, AclError, ClientIdentity, CreateOptions,
    Decision, GetOptions, MatrixOptions, PermissionEvaluator, PermissionSet,
};
use serde_json::json;
use tempfile::TempDir;

async fn open_acl() -> (TempDir, Acl) {
    let dir = TempDir::new().unwrap();
    let config = AclConfig::new()
        .with_database_path(dir.path().join("acl.db"))
        .with_hash_secrets(false);
    let acl = Acl::open(config).await.unwrap();
    (dir, acl)
}

async fn create_client(acl: &Acl, input: serde_json::Value) {
    acl.clients
        .create(&input, CreateOptions::default())
        .await
        .unwrap();
}

async fn access_of(acl: &Acl, client_id: &str, resource: &str) -> PermissionSet {
    acl.access
        .get(&ClientIdentity::user(client_id), resource, GetOptions::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_direct_and_role_grants_are_combined() {
    let (_dir, acl) = open_acl().await;

    acl.roles
        .create(&json!({"name": "R1", "resources": {"docs": {"create": true}}}))
        .await
        .unwrap();
    create_client(
        &acl,
        json!({
            "clientId": "C1",
            "secret": "pw",
            "resources": {"docs": {"read": true}},
            "roles": ["R1"]
        }),
    )
    .await;

    let docs = access_of(&acl, "C1", "docs").await;
    assert_eq!(
        docs.to_json(&MatrixOptions::default().with_falsy_types()),
        json!({
            "create": true,
            "read": true,
            "update": false,
            "delete": false,
            "readOwn": false,
            "updateOwn": false,
            "deleteOwn": false
        })
    );
}

#[tokio::test]
async fn test_inherited_field_projections_are_unioned() {
    let (_dir, acl) = open_acl().await;

    acl.roles
        .create(&json!({"name": "R1", "resources": {"docs": {"update": {"fields": {"title": 1}}}}}))
        .await
        .unwrap();
    acl.roles
        .create(&json!({
            "name": "R2",
            "extends": "R1",
            "resources": {"docs": {"update": {"fields": {"title": 1, "body": 1}}}}
        }))
        .await
        .unwrap();
    create_client(&acl, json!({"clientId": "C1", "secret": "pw", "roles": ["R2"]})).await;

    let docs = access_of(&acl, "C1", "docs").await;
    assert_eq!(
        docs.get(AccessType::Update).projection().unwrap().to_json(),
        json!({"title": 1, "body": 1})
    );
}

#[tokio::test]
async fn test_own_types_become_filtered_base_grants() {
    let (_dir, acl) = open_acl().await;
    create_client(
        &acl,
        json!({"clientId": "C1", "secret": "pw", "resources": {"docs": {"readOwn": true}}}),
    )
    .await;

    let docs = access_of(&acl, "C1", "docs").await;
    assert_eq!(
        docs.get(AccessType::Read).to_json(false),
        json!({"filter": {"_createdBy": "C1"}})
    );

    let raw = acl
        .access
        .get(&ClientIdentity::user("C1"), "docs", GetOptions::raw())
        .await
        .unwrap();
    assert!(!raw.is_granted(AccessType::Read));
    assert!(raw.is_granted(AccessType::ReadOwn));
}

#[tokio::test]
async fn test_deleting_a_parent_role_detaches_children() {
    let (_dir, acl) = open_acl().await;
    acl.roles
        .create(&json!({"name": "R1", "resources": {"docs": {"read": true}}}))
        .await
        .unwrap();
    acl.roles
        .create(&json!({"name": "R2", "extends": "R1"}))
        .await
        .unwrap();
    create_client(&acl, json!({"clientId": "C1", "secret": "pw", "roles": ["R2"]})).await;
    assert!(access_of(&acl, "C1", "docs").await.is_granted(AccessType::Read));

    acl.roles.delete("R1").await.unwrap();

    let child = acl.roles.get_one("R2").await.unwrap();
    assert_eq!(child.extends, None);
    assert!(!access_of(&acl, "C1", "docs").await.is_granted(AccessType::Read));
}

#[tokio::test]
async fn test_malformed_stored_filter_is_denied() {
    let set = PermissionSet::from_json(&json!({"create": {"filter": "{bad json"}, "read": true}));
    assert_eq!(set.get(AccessType::Create), &Access::Denied);
    assert_eq!(set.get(AccessType::Read), &Access::Full);
}

#[tokio::test]
async fn test_access_type_cannot_be_set_by_ordinary_input() {
    let (_dir, acl) = open_acl().await;

    let err = acl
        .clients
        .create(
            &json!({"clientId": "C1", "secret": "pw", "accessType": "admin"}),
            CreateOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AclError::InvalidFields(_)));
    assert_eq!(err.status_code(), 400);
    assert!(acl.clients.get_one("C1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_unknown_clients_get_nothing() {
    let (_dir, acl) = open_acl().await;
    create_client(
        &acl,
        json!({"clientId": "C1", "secret": "pw", "resources": {"docs": {"read": true}}}),
    )
    .await;

    assert!(access_of(&acl, "unknown", "docs").await.is_empty());
    assert!(access_of(&acl, "C1", "media").await.is_empty());
}

#[tokio::test]
async fn test_listing_and_admins() {
    let (_dir, acl) = open_acl().await;
    create_client(
        &acl,
        json!({
            "clientId": "C1",
            "secret": "pw",
            "resources": {"docs": {"read": true}, "media": {"create": true}}
        }),
    )
    .await;
    acl.clients
        .create(
            &json!({"clientId": "root", "secret": "pw", "accessType": "admin"}),
            CreateOptions {
                allow_access_type: true,
            },
        )
        .await
        .unwrap();

    match acl
        .access
        .get_all(&ClientIdentity::user("C1"), GetOptions::default())
        .await
        .unwrap()
    {
        AccessListing::PerResource(matrix) => {
            assert_eq!(matrix.resources().cloned().collect::<Vec<_>>(), vec!["docs", "media"]);
        }
        AccessListing::Unrestricted(_) => panic!("C1 is not an admin"),
    }

    let root = acl.clients.get_one("root").await.unwrap();
    let anything = acl
        .access
        .get(&ClientIdentity::from(&root), "anything", GetOptions::default())
        .await
        .unwrap();
    assert_eq!(anything, PermissionSet::full());
}

#[tokio::test]
async fn test_keys() {
    let (_dir, acl) = open_acl().await;
    create_client(
        &acl,
        json!({"clientId": "C1", "secret": "pw", "resources": {"docs": {"read": true}}}),
    )
    .await;

    let bound = acl
        .keys
        .create(&json!({"client": "C1"}), Some("C1"))
        .await
        .unwrap()
        .results
        .remove(0);
    let via_bound = acl
        .access
        .get_for_token(&bound.token, "docs", GetOptions::default())
        .await
        .unwrap();
    assert!(via_bound.is_granted(AccessType::Read));

    let top_level = acl
        .keys
        .create(&json!({"resources": {"docs": {"deleteOwn": true}}}), Some("C1"))
        .await
        .unwrap()
        .results
        .remove(0);
    let via_top_level = acl
        .access
        .get_for_key(&top_level, "docs", GetOptions::default())
        .await
        .unwrap();
    assert!(!via_top_level.is_granted(AccessType::Read));
    assert_eq!(
        via_top_level.get(AccessType::Delete).to_json(false),
        json!({"filter": {"_createdBy": "C1"}})
    );

    assert!(matches!(
        acl.access
            .get_for_token("not-a-token", "docs", GetOptions::default())
            .await,
        Err(AclError::Unauthorised)
    ));
}

#[tokio::test]
async fn test_evaluating_resolved_access() {
    let (_dir, acl) = open_acl().await;
    create_client(
        &acl,
        json!({
            "clientId": "C1",
            "secret": "pw",
            "resources": {"docs": {"read": {"fields": {"secret": 0}, "filter": {"team": "red"}}}}
        }),
    )
    .await;

    let docs = access_of(&acl, "C1", "docs").await;

    let Decision::Allowed { filter, .. } = PermissionEvaluator::evaluate(&docs, AccessType::Read) else {
        panic!("read should be allowed");
    };
    assert_eq!(filter.unwrap()["team"], "red");
    assert_eq!(
        PermissionEvaluator::evaluate(&docs, AccessType::Delete),
        Decision::Denied
    );

    let record = json!({"title": "t", "secret": "s"});
    assert_eq!(
        PermissionEvaluator::filter_fields(docs.get(AccessType::Read), &record),
        json!({"title": "t"})
    );
}

#[tokio::test]
async fn test_table_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = AclConfig::new()
        .with_database_path(dir.path().join("acl.db"))
        .with_hash_secrets(false);

    {
        let acl = Acl::open(config.clone()).await.unwrap();
        create_client(
            &acl,
            json!({"clientId": "C1", "secret": "pw", "resources": {"docs": {"read": true}}}),
        )
        .await;
    }

    let acl = Acl::open(config).await.unwrap();
    assert!(access_of(&acl, "C1", "docs").await.is_granted(AccessType::Read));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_grants_all_land() {
    let (_dir, acl) = open_acl().await;

    let ids: Vec<String> = (0..20).map(|i| format!("C{}", i)).collect();
    for id in &ids {
        create_client(&acl, json!({"clientId": id, "secret": "pw"})).await;
    }

    let tasks: Vec<_> = ids
        .iter()
        .map(|id| {
            let clients = acl.clients.clone();
            let id = id.clone();
            tokio::spawn(async move {
                clients
                    .resource_add(&id, "docs", &json!({"read": true}))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    for id in &ids {
        let client = acl.clients.get(Some(id.as_str())).await.unwrap().results.remove(0);
        assert!(client.resources.contains("docs"), "{} lost its grant", id);
    }

    acl.access.recompute().await.unwrap();
    for id in &ids {
        assert!(access_of(&acl, id, "docs").await.is_granted(AccessType::Read));
    }
}
