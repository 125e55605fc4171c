//! Engine scenarios over the in-memory adapter and cache.

use serde_json::json;
use std::sync::Arc;
use strata_core::query::Query;
use strata_core::{
    Attribute, Collection, Doc, Index, IndexType, OnDelete, Permission, RelationType, Role,
    StrataError,
};
use strata_db::{Authorization, Database, DatabaseMeta, DatabaseOptions};
use strata_storage::{MemoryAdapter, MemoryCache};

async fn engine() -> Database {
    let adapter = Arc::new(MemoryAdapter::new());
    let cache = Arc::new(MemoryCache::new());
    let db = Database::new(adapter, cache, DatabaseOptions::default());
    db.set_meta(DatabaseMeta {
        database: "main".to_string(),
        schema: "public".to_string(),
        namespace: "app".to_string(),
        ..Default::default()
    });
    db.create(None).await.unwrap();
    db
}

fn open_permissions() -> Vec<Permission> {
    vec![
        Permission::create(Role::Any),
        Permission::read(Role::Any),
        Permission::update(Role::Any),
        Permission::delete(Role::Any),
    ]
}

fn users_collection() -> Collection {
    let mut collection = Collection::new("users");
    collection.attributes = vec![
        Attribute::string("name", 128).required(),
        Attribute::integer("age"),
    ];
    collection.permissions = open_permissions();
    collection
}

fn posts_collection() -> Collection {
    let mut collection = Collection::new("posts");
    collection.attributes = vec![Attribute::string("title", 256).required()];
    collection.permissions = open_permissions();
    collection
}

// ============================================================================
// SCHEMA LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_collection_lifecycle() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();

    let collection = db.get_collection("users").await.unwrap();
    assert_eq!(collection.id, "users");
    assert_eq!(collection.attributes.len(), 2);

    // Duplicate ids conflict.
    assert!(matches!(
        db.create_collection(users_collection()).await.unwrap_err(),
        StrataError::Conflict { .. }
    ));

    // Deleting removes the schema entirely.
    db.delete_collection("users").await.unwrap();
    assert!(matches!(
        db.get_collection("users").await.unwrap_err(),
        StrataError::NotFound { .. }
    ));
}

#[tokio::test]
async fn test_attribute_and_index_lifecycle() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();

    db.create_attribute("users", Attribute::string("bio", 512))
        .await
        .unwrap();
    let collection = db.get_collection("users").await.unwrap();
    assert!(collection.attribute("bio").is_some());

    db.create_index(
        "users",
        Index::new("idx_bio", IndexType::Key, vec!["bio".to_string()]),
    )
    .await
    .unwrap();

    // An indexed attribute cannot be dropped.
    assert!(matches!(
        db.delete_attribute("users", "bio").await.unwrap_err(),
        StrataError::Dependency { .. }
    ));

    db.rename_index("users", "idx_bio", "idx_biography")
        .await
        .unwrap();
    db.delete_index("users", "idx_biography").await.unwrap();
    db.delete_attribute("users", "bio").await.unwrap();

    let collection = db.get_collection("users").await.unwrap();
    assert!(collection.attribute("bio").is_none());
    assert!(collection.indexes.is_empty());
}

// ============================================================================
// S1 - CREATE AND READ
// ============================================================================

#[tokio::test]
async fn test_create_and_read_document() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();

    let created = db
        .create_document(
            "users",
            Doc::from_json(json!({"name": "Ada", "age": 30})).unwrap(),
        )
        .await
        .unwrap();
    assert!(!created.id().is_empty());
    assert!(created.sequence() > 0);
    assert!(created.created_at().is_some());

    let read = db.get_document("users", created.id(), &[]).await.unwrap();
    assert_eq!(read.get_str("name"), Some("Ada"));
    assert_eq!(read.get_integer("age"), Some(30));

    // Round trip up to server-assigned fields.
    assert_eq!(
        read.to_object(&["name", "age"], &[]).to_json(),
        json!({"name": "Ada", "age": 30})
    );

    // Unknown ids are not found.
    assert!(matches!(
        db.get_document("users", "missing", &[]).await.unwrap_err(),
        StrataError::NotFound { .. }
    ));
}

#[tokio::test]
async fn test_structure_validation_rejects_bad_documents() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();

    // Missing required attribute.
    assert!(matches!(
        db.create_document("users", Doc::from_json(json!({"age": 1})).unwrap())
            .await
            .unwrap_err(),
        StrataError::Validation { .. }
    ));
    // Unknown attribute.
    assert!(db
        .create_document(
            "users",
            Doc::from_json(json!({"name": "A", "ghost": true})).unwrap(),
        )
        .await
        .is_err());
    // Wrong type.
    assert!(db
        .create_document(
            "users",
            Doc::from_json(json!({"name": "A", "age": "old"})).unwrap(),
        )
        .await
        .is_err());
}

// ============================================================================
// S2 - PERMISSION DENIAL
// ============================================================================

#[tokio::test]
async fn test_collection_permission_denial() {
    let db = engine().await;
    let mut collection = users_collection();
    collection.permissions = vec![
        Permission::create(Role::Any),
        Permission::read(Role::user("admin")),
    ];
    db.create_collection(collection).await.unwrap();

    let doc = db
        .create_document("users", Doc::from_json(json!({"name": "Ada"})).unwrap())
        .await
        .unwrap();
    let id = doc.id().to_string();

    let denied = Authorization::with_roles(vec!["user:bob".to_string()], async {
        db.get_document("users", &id, &[]).await
    })
    .await;
    assert!(matches!(
        denied.unwrap_err(),
        StrataError::Authorization { .. }
    ));

    let granted = Authorization::with_roles(vec!["user:admin".to_string()], async {
        db.get_document("users", &id, &[]).await
    })
    .await
    .unwrap();
    assert_eq!(granted.get_str("name"), Some("Ada"));
}

#[tokio::test]
async fn test_document_security_grants_additionally() {
    let db = engine().await;
    let mut collection = users_collection();
    collection.permissions = vec![Permission::create(Role::Any)];
    collection.document_security = true;
    db.create_collection(collection).await.unwrap();

    let doc = db
        .create_document(
            "users",
            Doc::from_json(json!({
                "name": "Ada",
                "$permissions": ["read(\"user:alice\")"],
            }))
            .unwrap(),
        )
        .await
        .unwrap();
    let id = doc.id().to_string();

    // No collection read grant and no document grant: filtered out.
    let empty = Authorization::with_roles(vec!["user:bob".to_string()], async {
        db.get_document("users", &id, &[]).await
    })
    .await
    .unwrap();
    assert!(empty.is_empty());

    // Document-level permission grants the read.
    let granted = Authorization::with_roles(vec!["user:alice".to_string()], async {
        db.get_document("users", &id, &[]).await
    })
    .await
    .unwrap();
    assert_eq!(granted.get_str("name"), Some("Ada"));

    // find_one on an unauthorized match yields an empty document.
    let found = Authorization::with_roles(vec!["user:bob".to_string()], async {
        db.find_one("users", &[Query::equal("name", vec!["Ada".into()])])
            .await
    })
    .await
    .unwrap();
    assert!(found.is_empty());
}

// ============================================================================
// S3 - ONE-TO-MANY RELATIONSHIP
// ============================================================================

#[tokio::test]
async fn test_one_to_many_cascade() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();
    db.create_collection(posts_collection()).await.unwrap();
    db.create_relationship(
        "users",
        "posts",
        RelationType::OneToMany,
        true,
        Some("posts".to_string()),
        Some("author".to_string()),
        OnDelete::Cascade,
    )
    .await
    .unwrap();

    let user = db
        .create_document("users", Doc::from_json(json!({"name": "Ada"})).unwrap())
        .await
        .unwrap();
    let user_id = user.id().to_string();

    for title in ["One", "Two"] {
        db.create_document(
            "posts",
            Doc::from_json(json!({"title": title, "author": user_id})).unwrap(),
        )
        .await
        .unwrap();
    }

    // posts.author references the user id.
    let posts = db
        .find(
            "posts",
            &[Query::equal("author", vec![user_id.clone().into()])],
        )
        .await
        .unwrap();
    assert_eq!(posts.len(), 2);

    // Populate resolves the virtual side.
    let mut populated = db.get_document("users", &user_id, &[]).await.unwrap();
    db.populate(
        "users",
        &mut populated,
        &[Query::populate("posts", vec![])],
    )
    .await
    .unwrap();
    let linked = populated.get_array("posts").unwrap();
    assert_eq!(linked.len(), 2);

    // Deleting the user cascades to its posts.
    db.delete_document("users", &user_id).await.unwrap();
    let remaining = db.find("posts", &[]).await.unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn test_populate_cycle_protection() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();
    db.create_collection(posts_collection()).await.unwrap();
    db.create_relationship(
        "users",
        "posts",
        RelationType::OneToMany,
        true,
        Some("posts".to_string()),
        Some("author".to_string()),
        OnDelete::Cascade,
    )
    .await
    .unwrap();

    let user = db
        .create_document("users", Doc::from_json(json!({"name": "Ada"})).unwrap())
        .await
        .unwrap();
    db.create_document(
        "posts",
        Doc::from_json(json!({"title": "One", "author": user.id()})).unwrap(),
    )
    .await
    .unwrap();

    // posts -> author would lead straight back to users; the traversal
    // stops there and leaves the raw id in place.
    let mut populated = db.get_document("users", user.id(), &[]).await.unwrap();
    db.populate(
        "users",
        &mut populated,
        &[Query::populate(
            "posts",
            vec![Query::populate("author", vec![])],
        )],
    )
    .await
    .unwrap();

    let posts = populated.get_array("posts").unwrap();
    let post = posts[0].as_doc().unwrap();
    assert_eq!(post.get_str("author"), Some(user.id()));
}

#[tokio::test]
async fn test_restrict_blocks_delete() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();
    db.create_collection(posts_collection()).await.unwrap();
    db.create_relationship(
        "users",
        "posts",
        RelationType::OneToMany,
        false,
        Some("posts".to_string()),
        Some("author".to_string()),
        OnDelete::Restrict,
    )
    .await
    .unwrap();

    let user = db
        .create_document("users", Doc::from_json(json!({"name": "Ada"})).unwrap())
        .await
        .unwrap();
    db.create_document(
        "posts",
        Doc::from_json(json!({"title": "One", "author": user.id()})).unwrap(),
    )
    .await
    .unwrap();

    assert!(matches!(
        db.delete_document("users", user.id()).await.unwrap_err(),
        StrataError::Dependency { .. }
    ));
}

#[tokio::test]
async fn test_many_to_many_links() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();
    let mut teams = Collection::new("teams");
    teams.attributes = vec![Attribute::string("name", 128).required()];
    teams.permissions = open_permissions();
    db.create_collection(teams).await.unwrap();

    db.create_relationship(
        "users",
        "teams",
        RelationType::ManyToMany,
        true,
        Some("teams".to_string()),
        Some("members".to_string()),
        OnDelete::SetNull,
    )
    .await
    .unwrap();

    let team = db
        .create_document("teams", Doc::from_json(json!({"name": "Core"})).unwrap())
        .await
        .unwrap();
    let user = db
        .create_document(
            "users",
            Doc::from_json(json!({"name": "Ada", "teams": {"set": [team.id()]}})).unwrap(),
        )
        .await
        .unwrap();

    let mut populated = db.get_document("users", user.id(), &[]).await.unwrap();
    db.populate("users", &mut populated, &[Query::populate("teams", vec![])])
        .await
        .unwrap();
    let teams = populated.get_array("teams").unwrap();
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].as_doc().unwrap().get_str("name"), Some("Core"));
}

// ============================================================================
// S5 - QUERY VALIDATION
// ============================================================================

#[tokio::test]
async fn test_search_requires_fulltext_index() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();

    let err = db
        .find("users", &[Query::search("name", "ada")])
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::Validation { .. }));

    db.create_index(
        "users",
        Index::new("ft_name", IndexType::Fulltext, vec!["name".to_string()]),
    )
    .await
    .unwrap();
    db.create_document("users", Doc::from_json(json!({"name": "Ada"})).unwrap())
        .await
        .unwrap();

    let found = db
        .find("users", &[Query::search("name", "ada")])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

// ============================================================================
// FIND SEMANTICS
// ============================================================================

#[tokio::test]
async fn test_find_ordering_and_cursor() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();
    for (name, age) in [("Ada", 30), ("Bob", 20), ("Cyd", 40)] {
        db.create_document(
            "users",
            Doc::from_json(json!({"name": name, "age": age})).unwrap(),
        )
        .await
        .unwrap();
    }

    // Default order is $sequence ascending.
    let all = db.find("users", &[]).await.unwrap();
    let names: Vec<&str> = all.iter().map(|d| d.get_str("name").unwrap()).collect();
    assert_eq!(names, vec!["Ada", "Bob", "Cyd"]);

    // Explicit ordering.
    let by_age = db.find("users", &[Query::order_desc("age")]).await.unwrap();
    let names: Vec<&str> = by_age.iter().map(|d| d.get_str("name").unwrap()).collect();
    assert_eq!(names, vec!["Cyd", "Ada", "Bob"]);

    // Cursor pagination continues after the boundary.
    let first = db.find("users", &[Query::limit(1)]).await.unwrap();
    let next = db
        .find(
            "users",
            &[Query::cursor_after(first[0].id()), Query::limit(2)],
        )
        .await
        .unwrap();
    let names: Vec<&str> = next.iter().map(|d| d.get_str("name").unwrap()).collect();
    assert_eq!(names, vec!["Bob", "Cyd"]);

    // Count and sum.
    assert_eq!(db.count("users", &[], None).await.unwrap(), 3);
    assert_eq!(db.sum("users", "age", &[], None).await.unwrap(), 90.0);
}

// ============================================================================
// UPDATE, INCREASE, CACHE INVALIDATION
// ============================================================================

#[tokio::test]
async fn test_update_and_cache_invalidation() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();
    let doc = db
        .create_document(
            "users",
            Doc::from_json(json!({"name": "Ada", "age": 30})).unwrap(),
        )
        .await
        .unwrap();
    let id = doc.id().to_string();

    // Prime the cache.
    let read = db.get_document("users", &id, &[]).await.unwrap();
    assert_eq!(read.get_integer("age"), Some(30));

    let updated = db
        .update_document("users", &id, Doc::from_json(json!({"age": 31})).unwrap())
        .await
        .unwrap();
    assert_eq!(updated.get_integer("age"), Some(31));
    assert_eq!(updated.get_str("name"), Some("Ada"));

    // The stale cached entry is not served after the write.
    let fresh = db.get_document("users", &id, &[]).await.unwrap();
    assert_eq!(fresh.get_integer("age"), Some(31));
    assert!(fresh.updated_at().is_some());
}

#[tokio::test]
async fn test_find_results_cached_and_invalidated() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();
    let ada = db
        .create_document(
            "users",
            Doc::from_json(json!({"name": "Ada", "age": 30})).unwrap(),
        )
        .await
        .unwrap();
    db.create_document(
        "users",
        Doc::from_json(json!({"name": "Bob", "age": 20})).unwrap(),
    )
    .await
    .unwrap();

    // Prime the find cache, then re-read through it.
    assert_eq!(db.find("users", &[]).await.unwrap().len(), 2);
    assert_eq!(db.find("users", &[]).await.unwrap().len(), 2);

    // A document write flushes the collection tag; the cached result set
    // is not served again.
    db.update_document("users", ada.id(), Doc::from_json(json!({"age": 31})).unwrap())
        .await
        .unwrap();
    let fresh = db.find("users", &[]).await.unwrap();
    let updated = fresh.iter().find(|d| d.id() == ada.id()).unwrap();
    assert_eq!(updated.get_integer("age"), Some(31));

    // Deletes invalidate as well.
    db.delete_document("users", ada.id()).await.unwrap();
    assert_eq!(db.find("users", &[]).await.unwrap().len(), 1);

    // Distinct query shapes hash to distinct entries.
    let bobs = db
        .find("users", &[Query::equal("name", vec!["Bob".into()])])
        .await
        .unwrap();
    assert_eq!(bobs.len(), 1);
    let nobody = db
        .find("users", &[Query::equal("name", vec!["Eve".into()])])
        .await
        .unwrap();
    assert!(nobody.is_empty());
}

#[tokio::test]
async fn test_find_cache_respects_document_security() {
    let db = engine().await;
    let mut collection = users_collection();
    collection.permissions = vec![Permission::create(Role::Any)];
    collection.document_security = true;
    db.create_collection(collection).await.unwrap();
    db.create_document(
        "users",
        Doc::from_json(json!({
            "name": "Ada",
            "$permissions": ["read(\"user:alice\")"],
        }))
        .unwrap(),
    )
    .await
    .unwrap();

    // Alice's read primes the cache; Bob hitting the same entry must
    // still be filtered per request.
    let alice = Authorization::with_roles(vec!["user:alice".to_string()], async {
        db.find("users", &[]).await
    })
    .await
    .unwrap();
    assert_eq!(alice.len(), 1);

    let bob = Authorization::with_roles(vec!["user:bob".to_string()], async {
        db.find("users", &[]).await
    })
    .await
    .unwrap();
    assert!(bob.is_empty());
}

#[tokio::test]
async fn test_list_collections_cached_and_invalidated() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();

    // Prime the list cache, then read through it.
    assert_eq!(db.list_collections(None).await.unwrap().len(), 1);
    assert_eq!(db.list_collections(None).await.unwrap().len(), 1);

    // A schema mutation flushes the metadata tag.
    db.create_collection(posts_collection()).await.unwrap();
    assert_eq!(db.list_collections(None).await.unwrap().len(), 2);

    db.delete_collection("posts").await.unwrap();
    assert_eq!(db.list_collections(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_increase_and_decrease_with_bounds() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();
    let doc = db
        .create_document(
            "users",
            Doc::from_json(json!({"name": "Ada", "age": 10})).unwrap(),
        )
        .await
        .unwrap();
    let id = doc.id().to_string();

    db.increase("users", &id, "age", 5.0, Some(20.0)).await.unwrap();
    assert!(matches!(
        db.increase("users", &id, "age", 10.0, Some(20.0))
            .await
            .unwrap_err(),
        StrataError::Validation { .. }
    ));
    db.decrease("users", &id, "age", 5.0, Some(0.0)).await.unwrap();

    let read = db.get_document("users", &id, &[]).await.unwrap();
    assert_eq!(read.get_integer("age"), Some(10));

    // Increasing a non-numeric attribute fails validation.
    assert!(db.increase("users", &id, "name", 1.0, None).await.is_err());
}

// ============================================================================
// BULK OPERATIONS
// ============================================================================

#[tokio::test]
async fn test_bulk_operations() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();

    let docs = db
        .create_documents(
            "users",
            vec![
                Doc::from_json(json!({"name": "Ada", "age": 30})).unwrap(),
                Doc::from_json(json!({"name": "Bob", "age": 20})).unwrap(),
                Doc::from_json(json!({"name": "Cyd", "age": 40})).unwrap(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(docs.len(), 3);

    let touched = db
        .update_documents(
            "users",
            Doc::from_json(json!({"age": 99})).unwrap(),
            &[Query::greater_than("age", 25)],
        )
        .await
        .unwrap();
    assert_eq!(touched, 2);

    let deleted = db
        .delete_documents("users", &[Query::equal("age", vec![99.into()])])
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(db.count("users", &[], None).await.unwrap(), 1);
}

// ============================================================================
// JSON ATTRIBUTES AND FILTER ROUND TRIP
// ============================================================================

#[tokio::test]
async fn test_json_attribute_round_trip() {
    let db = engine().await;
    let mut collection = Collection::new("configs");
    collection.attributes = vec![
        Attribute::string("name", 64).required(),
        Attribute::json("payload"),
    ];
    collection.permissions = open_permissions();
    db.create_collection(collection).await.unwrap();

    let payload = json!({"nested": {"flag": true}, "list": [1, 2, 3]});
    let doc = db
        .create_document(
            "configs",
            Doc::from_json(json!({"name": "main", "payload": payload})).unwrap(),
        )
        .await
        .unwrap();

    let read = db.get_document("configs", doc.id(), &[]).await.unwrap();
    assert_eq!(read.get("payload").unwrap().to_json(), payload);
}

// ============================================================================
// DISABLED COLLECTIONS AND PRESERVED DATES
// ============================================================================

#[tokio::test]
async fn test_disabled_collection_is_hidden() {
    let db = engine().await;
    let mut collection = users_collection();
    collection.enabled = false;
    db.create_collection(collection).await.unwrap();

    assert!(matches!(
        db.create_document("users", Doc::from_json(json!({"name": "A"})).unwrap())
            .await
            .unwrap_err(),
        StrataError::NotFound { .. }
    ));

    // With enforcement disabled the collection is reachable again.
    Authorization::skip(async {
        db.create_document("users", Doc::from_json(json!({"name": "A"})).unwrap())
            .await
            .unwrap();
    })
    .await;
}

#[tokio::test]
async fn test_timeout_maps_to_timeout_error() {
    let err = Database::with_timeout(std::time::Duration::from_millis(10), async {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(())
    })
    .await
    .unwrap_err();
    assert!(matches!(err, StrataError::Timeout { .. }));
}

#[tokio::test]
async fn test_collection_size_passthrough() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();
    db.create_document("users", Doc::from_json(json!({"name": "Ada"})).unwrap())
        .await
        .unwrap();
    assert!(db.get_size_of_collection("users").await.unwrap() > 0);
    // The in-memory adapter has no statistics to refresh.
    assert!(!db.analyze_collection("users").await.unwrap());
}

#[tokio::test]
async fn test_preserve_dates_mode() {
    let db = engine().await;
    db.create_collection(users_collection()).await.unwrap();

    db.set_preserve_dates(true);
    let doc = db
        .create_document(
            "users",
            Doc::from_json(json!({
                "name": "Ada",
                "$createdAt": "2020-01-01 00:00:00.000",
                "$updatedAt": "2020-01-01 00:00:00.000",
            }))
            .unwrap(),
        )
        .await
        .unwrap();
    db.set_preserve_dates(false);

    let read = db.get_document("users", doc.id(), &[]).await.unwrap();
    let created = read.created_at().unwrap();
    assert_eq!(created.format("%Y").to_string(), "2020");
}
