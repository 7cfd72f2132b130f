//! Integration tests for the tenant registry.

mod common;

use std::collections::BTreeSet;
use tenant_db::{DbError, with_tenant};

#[tokio::test]
async fn test_register_twice_keeps_one_row() {
    let (_dir, db) = common::sqlite_db().await;
    let registry = db.registry();

    let first = registry.register("t1", "tenant_1").await.unwrap();
    let second = registry.register("t1", "tenant_1").await.unwrap();
    assert_eq!(first.database_name, second.database_name);
    assert!(second.last_updated >= first.last_updated);

    let all = registry.list().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].tenant_id, "t1");
    assert_eq!(all[0].database_name, "tenant_1");

    db.close().await;
}

#[tokio::test]
async fn test_register_new_database_updates_in_place() {
    let (_dir, db) = common::sqlite_db().await;
    let registry = db.registry();

    registry.register("t1", "tenant_1").await.unwrap();
    registry.register("t1", "tenant_1_moved").await.unwrap();

    assert_eq!(registry.resolve("t1").await.unwrap(), "tenant_1_moved");
    let described = registry.describe("t1").await.unwrap();
    assert_eq!(described.database_name, "tenant_1_moved");
    assert_eq!(registry.list().await.unwrap().len(), 1);

    db.close().await;
}

#[tokio::test]
async fn test_resolve_unknown_tenant() {
    let (_dir, db) = common::sqlite_db().await;
    let result = db.registry().resolve("missing").await;
    match result {
        Err(DbError::TenantNotFound { tenant_id }) => assert_eq!(tenant_id, "missing"),
        other => panic!("expected TenantNotFound, got {:?}", other),
    }
    db.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration() {
    let (_dir, db) = common::sqlite_db().await;

    // Different tenants in parallel, plus many writers racing on one tenant
    let mut tasks = Vec::new();
    for i in 0..10 {
        let registry = db.registry().clone();
        tasks.push(tokio::spawn(async move {
            registry
                .register(&format!("tenant{}", i), &format!("db_{}", i))
                .await
        }));
    }
    for i in 0..10 {
        let registry = db.registry().clone();
        tasks.push(tokio::spawn(async move {
            registry.register("contested", &format!("contested_{}", i)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let all = db.registry().list().await.unwrap();
    assert_eq!(all.len(), 11);
    let ids: BTreeSet<&str> = all.iter().map(|d| d.tenant_id.as_str()).collect();
    assert!(ids.contains("contested"));
    assert!(ids.contains("tenant9"));

    let contested = db.registry().resolve("contested").await.unwrap();
    assert!(contested.starts_with("contested_"));

    db.close().await;
}

#[tokio::test]
async fn test_provision_routes_queries() {
    let (dir, db) = common::sqlite_db().await;

    db.provision("acme", "tenant_acme").await.unwrap();
    assert!(dir.path().join("tenant_acme.db").exists());

    // Provisioning again is harmless
    db.provision("acme", "tenant_acme").await.unwrap();

    let result = with_tenant("acme", db.query("SELECT 7 AS seven", &[]))
        .await
        .unwrap();
    assert_eq!(result.scalar("seven"), Some(&serde_json::json!(7)));

    assert!(matches!(
        db.provision("", "tenant_x").await,
        Err(DbError::InvalidInput { .. })
    ));
    assert!(matches!(
        db.provision("x", "../escape").await,
        Err(DbError::InvalidInput { .. })
    ));

    db.close().await;
}
