//! Integration tests for pool limits and idle pool churn.

mod common;

use std::time::Duration;
use tenant_db::{DatabaseConfig, DbError, PoolOptions, TenantDb, TenantDbOptions};
use tokio::time::Instant;

async fn sqlite_db_with(pool_options: PoolOptions) -> (tempfile::TempDir, TenantDb) {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::sqlite(dir.path()).with_pool_options(pool_options);
    let db = TenantDb::init_with(&config, TenantDbOptions::default())
        .await
        .unwrap();
    (dir, db)
}

#[tokio::test]
async fn test_exhausted_pool_times_out_acquire() {
    let (_dir, db) = sqlite_db_with(PoolOptions {
        max_connections: Some(1),
        acquire_timeout_secs: Some(1),
        ..PoolOptions::default()
    })
    .await;

    let held = db.manager().get_connection("master").await.unwrap();

    let started = Instant::now();
    let result = db.manager().get_connection("master").await;
    let waited = started.elapsed();
    match result {
        Err(DbError::Connection { message, .. }) => assert!(message.contains("Timed out")),
        other => panic!("expected connection timeout, got {:?}", other),
    }
    assert!(waited >= Duration::from_millis(900), "waited {:?}", waited);
    assert!(waited < Duration::from_secs(10), "waited {:?}", waited);

    // Releasing the held handle frees the only slot
    held.release().await;
    let again = db.manager().get_connection("master").await.unwrap();
    again.release().await;

    db.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_idle_cleanup_during_concurrent_use() {
    let (_dir, db) = sqlite_db_with(PoolOptions {
        idle_timeout_secs: Some(1),
        pool_cleanup_interval_secs: Some(1),
        ..PoolOptions::default()
    })
    .await;
    db.provision("t1", "tenant_1").await.unwrap();

    // Bursts separated by pauses long enough for the pool to be swept
    let mut tasks = Vec::new();
    for _ in 0..5 {
        let db = db.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..3 {
                if round > 0 {
                    tokio::time::sleep(Duration::from_millis(1_500)).await;
                }
                for _ in 0..50 {
                    let mut conn = db.manager().get_connection("tenant_1").await?;
                    let result = conn.query("SELECT 1 AS one", &[]).await;
                    conn.release().await;
                    result?;
                }
            }
            Ok::<_, DbError>(())
        }));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(30), task)
            .await
            .expect("worker finished")
            .unwrap()
            .unwrap();
    }
    assert!(db.stats().await.iter().all(|s| s.active_handles == 0));

    db.close().await;
}
