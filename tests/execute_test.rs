//! Integration tests for statement execution and result materialization.
//!
//! These tests run against a temporary SQLite database and cover the
//! affected-row contract of `update`, the upper-cased row-map shape, the
//! scalar/map/schema/entity materialization targets, and the zero/one/many
//! contract of `get`.

use relmap::config::DbConfig;
use relmap::db::{ConnectionProcessor, RowMap, ScopeId};
use relmap::entity;
use relmap::error::OrmError;
use relmap::models::{Schema, SqlInfo, SqlParam};
use serde_json::json;
use tempfile::NamedTempFile;

/// Create a processor backed by a fresh SQLite file with a sample table.
/// Run with RUST_LOG=debug to see SQL and scope logging.
async fn setup() -> (ConnectionProcessor, NamedTempFile) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let url = format!(
        "sqlite:{}?max_connections=2",
        temp_file.path().to_str().unwrap()
    );
    let config = DbConfig::parse(&url).unwrap();
    let processor = ConnectionProcessor::new(config).await.unwrap();

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    processor
        .update(
            &conn,
            &SqlInfo::of("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL)"),
        )
        .await
        .expect("Failed to create test table");

    (processor, temp_file)
}

async fn insert_user(processor: &ConnectionProcessor, id: i64, name: &str, score: f64) {
    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    processor
        .update(
            &conn,
            &SqlInfo::new(
                "INSERT INTO users (id, name, score) VALUES (?, ?, ?)",
                vec![id.into(), name.into(), score.into()],
            ),
        )
        .await
        .expect("Failed to insert user");
}

#[tokio::test]
async fn test_update_returns_affected_row_count() {
    let (processor, _db) = setup().await;
    insert_user(&processor, 1, "a", 1.0).await;
    insert_user(&processor, 2, "b", 2.0).await;

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let affected = processor
        .update(&conn, &SqlInfo::of("UPDATE users SET score = 0"))
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let affected = processor
        .update(
            &conn,
            &SqlInfo::new("DELETE FROM users WHERE id = ?", vec![99i64.into()]),
        )
        .await
        .unwrap();
    assert_eq!(affected, 0);
}

#[tokio::test]
async fn test_row_map_keys_are_upper_cased() {
    let (processor, _db) = setup().await;
    insert_user(&processor, 1, "a", 0.5).await;

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let rows: Vec<RowMap> = processor
        .list(&conn, &SqlInfo::of("SELECT id, name FROM users"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("ID"), Some(&json!(1)));
    assert_eq!(rows[0].get("NAME"), Some(&json!("a")));
    assert_eq!(rows[0].get("id"), None);
}

#[tokio::test]
async fn test_empty_result_is_empty_vec() {
    let (processor, _db) = setup().await;
    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let rows: Vec<RowMap> = processor
        .list(&conn, &SqlInfo::of("SELECT * FROM users"))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_scalar_target() {
    let (processor, _db) = setup().await;
    insert_user(&processor, 1, "a", 0.5).await;
    insert_user(&processor, 2, "b", 0.5).await;

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let count: Option<i64> = processor
        .get(&conn, &SqlInfo::of("SELECT COUNT(*) FROM users"))
        .await
        .unwrap();
    assert_eq!(count, Some(2));

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let name: Option<String> = processor
        .get(
            &conn,
            &SqlInfo::new("SELECT name FROM users WHERE id = ?", vec![1i64.into()]),
        )
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("a"));
}

#[tokio::test]
async fn test_scalar_target_rejects_multiple_columns() {
    let (processor, _db) = setup().await;
    insert_user(&processor, 1, "a", 0.5).await;

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let result: Result<Option<i64>, _> = processor
        .get(&conn, &SqlInfo::of("SELECT id, name FROM users"))
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, OrmError::ExecuteSql { .. }), "got: {err}");
    assert!(err.to_string().contains("exactly one column"));
}

#[tokio::test]
async fn test_get_contract_zero_one_many() {
    let (processor, _db) = setup().await;
    insert_user(&processor, 1, "a", 0.5).await;
    insert_user(&processor, 2, "b", 0.5).await;

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let none: Option<RowMap> = processor
        .get(
            &conn,
            &SqlInfo::new("SELECT * FROM users WHERE id = ?", vec![99i64.into()]),
        )
        .await
        .unwrap();
    assert!(none.is_none());

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let one: Option<RowMap> = processor
        .get(
            &conn,
            &SqlInfo::new("SELECT * FROM users WHERE id = ?", vec![1i64.into()]),
        )
        .await
        .unwrap();
    assert!(one.is_some());

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let many: Result<Option<RowMap>, _> = processor
        .get(&conn, &SqlInfo::of("SELECT * FROM users"))
        .await;
    let err = many.unwrap_err();
    assert!(matches!(err, OrmError::ExecuteSql { .. }));
    assert!(err.to_string().contains("at most one row"));
}

#[derive(Debug, Default, PartialEq)]
struct User {
    id: i64,
    name: String,
    score: Option<f64>,
}

entity! {
    User {
        table: "users",
        primary_keys: ["id"],
        fields: {
            id => "id",
            name => "name",
            score => "score",
        },
    }
}

#[tokio::test]
async fn test_entity_target() {
    let (processor, _db) = setup().await;
    insert_user(&processor, 1, "alice", 9.5).await;
    insert_user(&processor, 2, "bob", 3.0).await;

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let users: Vec<User> = processor
        .list(&conn, &SqlInfo::of("SELECT * FROM users ORDER BY id"))
        .await
        .unwrap();
    assert_eq!(
        users,
        vec![
            User {
                id: 1,
                name: "alice".to_string(),
                score: Some(9.5),
            },
            User {
                id: 2,
                name: "bob".to_string(),
                score: Some(3.0),
            },
        ]
    );
}

#[tokio::test]
async fn test_entity_null_column_is_none() {
    let (processor, _db) = setup().await;
    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    processor
        .update(
            &conn,
            &SqlInfo::new(
                "INSERT INTO users (id, name, score) VALUES (?, ?, ?)",
                vec![1i64.into(), "x".into(), SqlParam::Null],
            ),
        )
        .await
        .unwrap();

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let user: Option<User> = processor
        .get(&conn, &SqlInfo::of("SELECT * FROM users"))
        .await
        .unwrap();
    assert_eq!(user.unwrap().score, None);
}

#[tokio::test]
async fn test_entity_projection_leaves_defaults() {
    let (processor, _db) = setup().await;
    insert_user(&processor, 5, "carol", 1.0).await;

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let user: Option<User> = processor
        .get(&conn, &SqlInfo::of("SELECT id FROM users"))
        .await
        .unwrap();
    let user = user.unwrap();
    assert_eq!(user.id, 5);
    assert_eq!(user.name, "");
    assert_eq!(user.score, None);
}

#[tokio::test]
async fn test_schema_target() {
    let (processor, _db) = setup().await;
    insert_user(&processor, 1, "alice", 9.5).await;

    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let record: Option<Schema> = processor
        .get(&conn, &SqlInfo::of("SELECT * FROM users"))
        .await
        .unwrap();
    let record = record.unwrap();
    assert_eq!(record.field::<i64>("id").unwrap(), 1);
    assert_eq!(record.field::<String>("name").unwrap(), "alice");
}

#[tokio::test]
async fn test_execution_failure_is_execute_sql() {
    let (processor, _db) = setup().await;
    let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
    let err = processor
        .update(&conn, &SqlInfo::of("INSERT INTO missing_table VALUES (1)"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::ExecuteSql { .. }), "got: {err}");
}
