//! Integration tests for scope binding, release discipline, and connection
//! health.
//!
//! The resource-safety tests run against a pool capped at one connection: a
//! connection leaked on any exit path would exhaust the pool and make the
//! next acquisition time out, so these tests fail loudly on a leak.

use relmap::config::DbConfig;
use relmap::db::{ConnectionProcessor, MAX_CONNECTION_FAILURES, ScopeId};
use relmap::error::OrmError;
use relmap::models::SqlInfo;
use tempfile::NamedTempFile;

async fn setup_single_connection() -> (ConnectionProcessor, NamedTempFile) {
    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let url = format!(
        "sqlite:{}?max_connections=1&acquire_timeout=2",
        temp_file.path().to_str().unwrap()
    );
    let config = DbConfig::parse(&url).unwrap();
    let processor = ConnectionProcessor::new(config).await.unwrap();

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    processor
        .update(&conn, &SqlInfo::of("CREATE TABLE items (id INTEGER)"))
        .await
        .expect("Failed to create test table");

    (processor, temp_file)
}

#[tokio::test]
async fn test_statement_outside_transaction_releases_the_scope() {
    let (processor, _db) = setup_single_connection().await;
    let scope = ScopeId::new();
    let conn = processor.get_connection(&scope).await.unwrap();
    assert_eq!(processor.active_scopes().await, 1);

    processor
        .update(
            &conn,
            &SqlInfo::new("INSERT INTO items (id) VALUES (?)", vec![1i64.into()]),
        )
        .await
        .unwrap();
    assert_eq!(processor.active_scopes().await, 0);
}

#[tokio::test]
async fn test_transaction_keeps_the_scope_bound() {
    let (processor, _db) = setup_single_connection().await;
    let scope = ScopeId::new();
    let conn = processor.get_connection(&scope).await.unwrap();

    processor.start(&conn).await.unwrap();
    processor
        .update(
            &conn,
            &SqlInfo::new("INSERT INTO items (id) VALUES (?)", vec![1i64.into()]),
        )
        .await
        .unwrap();
    assert_eq!(processor.active_scopes().await, 1);

    processor.commit(&conn).await.unwrap();
    // commit alone does not release; the scope still owns the connection
    assert_eq!(processor.active_scopes().await, 1);

    processor.close(&conn).await.unwrap();
    assert_eq!(processor.active_scopes().await, 0);
}

#[tokio::test]
async fn test_failing_statements_never_leak_connections() {
    let (processor, _db) = setup_single_connection().await;

    for _ in 0..5 {
        let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
        let err = processor
            .update(&conn, &SqlInfo::of("INSERT INTO no_such_table VALUES (1)"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::ExecuteSql { .. }));
    }

    // with max_connections=1 a single leaked connection would make this
    // acquisition time out
    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let count: Option<i64> = processor
        .get(&conn, &SqlInfo::of("SELECT COUNT(*) FROM items"))
        .await
        .unwrap();
    assert_eq!(count, Some(0));
}

#[tokio::test]
async fn test_failed_query_never_leaks_connections() {
    let (processor, _db) = setup_single_connection().await;

    for _ in 0..3 {
        let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
        let result: Result<Vec<relmap::RowMap>, _> = processor
            .list(&conn, &SqlInfo::of("SELECT * FROM no_such_table"))
            .await;
        assert!(result.is_err());
    }

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    processor
        .update(
            &conn,
            &SqlInfo::new("INSERT INTO items (id) VALUES (?)", vec![7i64.into()]),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_poisoned_connection_is_discarded_and_pool_recovers() {
    let (processor, _db) = setup_single_connection().await;
    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();

    // keep the connection bound while it accumulates failures
    processor.start(&conn).await.unwrap();
    for _ in 0..MAX_CONNECTION_FAILURES {
        let err = processor
            .update(&conn, &SqlInfo::of("INSERT INTO no_such_table VALUES (1)"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::ExecuteSql { .. }));
    }
    // release discards the poisoned connection instead of pooling it
    processor.close(&conn).await.unwrap();
    assert_eq!(processor.active_scopes().await, 0);

    // the pool replaces the discarded connection on demand
    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let count: Option<i64> = processor
        .get(&conn, &SqlInfo::of("SELECT COUNT(*) FROM items"))
        .await
        .unwrap();
    assert_eq!(count, Some(0));
}

#[tokio::test]
async fn test_distinct_scopes_get_distinct_bindings() {
    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let url = format!(
        "sqlite:{}?max_connections=2",
        temp_file.path().to_str().unwrap()
    );
    let config = DbConfig::parse(&url).unwrap();
    let processor = ConnectionProcessor::new(config).await.unwrap();

    let scope_a = ScopeId::new();
    let scope_b = ScopeId::new();
    let conn_a = processor.get_connection(&scope_a).await.unwrap();
    let conn_b = processor.get_connection(&scope_b).await.unwrap();
    assert_ne!(conn_a.scope(), conn_b.scope());
    assert_eq!(processor.active_scopes().await, 2);

    processor.close(&conn_a).await.unwrap();
    assert_eq!(processor.active_scopes().await, 1);
    processor.close(&conn_b).await.unwrap();
    assert_eq!(processor.active_scopes().await, 0);
}

#[tokio::test]
async fn test_rebinding_after_release_yields_fresh_lease() {
    let (processor, _db) = setup_single_connection().await;
    let scope = ScopeId::new();

    let conn = processor.get_connection(&scope).await.unwrap();
    processor.close(&conn).await.unwrap();

    // same scope id acquires again after release
    let conn = processor.get_connection(&scope).await.unwrap();
    processor
        .update(
            &conn,
            &SqlInfo::new("INSERT INTO items (id) VALUES (?)", vec![1i64.into()]),
        )
        .await
        .unwrap();
}
