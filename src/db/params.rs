//! Parameter binding utilities.
//!
//! These functions bind [`SqlParam`] values to database-specific query
//! objects, in positional order.

use crate::models::sql::SqlParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        SqlParam::Null => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::String(v) => query.bind(v.as_str()),
        SqlParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        SqlParam::Null => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::String(v) => query.bind(v.as_str()),
        SqlParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        SqlParam::Null => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::String(v) => query.bind(v.as_str()),
        SqlParam::Bytes(v) => query.bind(v.as_slice()),
    }
}
