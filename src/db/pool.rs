//! Pooled connection source.
//!
//! [`DbPool`] wraps a database-specific sqlx pool and yields raw connections
//! on demand as [`PooledConn`]. A checked-out connection returns to the pool
//! when dropped, or is detached and closed outright when discarded.

use crate::config::{DatabaseType, DbConfig};
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::row::{RowMap, RowToMap};
use crate::error::{OrmError, OrmResult};
use sqlx::pool::PoolConnection;
use sqlx::{
    Connection, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool,
    mysql::MySqlConnectOptions, mysql::MySqlPoolOptions, postgres::PgPoolOptions,
    sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Create a connection pool for the given configuration.
    pub async fn connect(config: &DbConfig) -> OrmResult<Self> {
        let pool_opts = &config.pool_options;
        let is_sqlite = config.db_type == DatabaseType::SQLite;
        let acquire_timeout = Duration::from_secs(pool_opts.acquire_timeout_or_default());
        let idle_timeout = Some(Duration::from_secs(pool_opts.idle_timeout_or_default()));

        match config.db_type {
            DatabaseType::MySql => {
                let options = MySqlConnectOptions::from_str(&config.connection_string)
                    .map_err(|e| {
                        OrmError::connection(format!("invalid mysql connection string: {e}"))
                    })?
                    .charset("utf8mb4");

                let pool = MySqlPoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(|e| OrmError::connection(format!("failed to connect: {e}")))?;
                Ok(DbPool::MySql(pool))
            }
            DatabaseType::Postgres => {
                let pool = PgPoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect(&config.connection_string)
                    .await
                    .map_err(|e| OrmError::connection(format!("failed to connect: {e}")))?;
                Ok(DbPool::Postgres(pool))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&config.connection_string)
                    .map_err(|e| {
                        OrmError::connection(format!("invalid sqlite connection string: {e}"))
                    })?
                    .create_if_missing(true);

                let pool = SqlitePoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(|e| OrmError::connection(format!("failed to connect: {e}")))?;
                Ok(DbPool::SQLite(pool))
            }
        }
    }

    /// Check out a raw connection.
    pub async fn acquire(&self) -> OrmResult<PooledConn> {
        let conn = match self {
            DbPool::MySql(pool) => PooledConn::MySql(pool.acquire().await?),
            DbPool::Postgres(pool) => PooledConn::Postgres(pool.acquire().await?),
            DbPool::SQLite(pool) => PooledConn::SQLite(pool.acquire().await?),
        };
        debug!(db_type = %self.db_type(), "checked out connection");
        Ok(conn)
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySql,
            DbPool::Postgres(_) => DatabaseType::Postgres,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// A physical connection checked out of the pool.
///
/// Dropping returns it to the pool; [`PooledConn::discard`] detaches it and
/// closes the underlying connection instead.
#[derive(Debug)]
pub enum PooledConn {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl PooledConn {
    /// Execute a statement that takes no bind parameters and whose result is
    /// irrelevant (transaction verbs).
    pub async fn execute_raw(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        use sqlx::Executor;
        match self {
            Self::MySql(c) => {
                (&mut **c).execute(sql).await?;
            }
            Self::Postgres(c) => {
                (&mut **c).execute(sql).await?;
            }
            Self::SQLite(c) => {
                (&mut **c).execute(sql).await?;
            }
        }
        Ok(())
    }

    /// Execute a write statement and return the affected-row count.
    ///
    /// Statements without parameters go through the raw path, since some SQL
    /// (e.g. CREATE PROCEDURE) cannot run as a prepared statement.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[crate::models::sql::SqlParam],
    ) -> Result<u64, sqlx::Error> {
        use sqlx::Executor;
        let rows_affected = match self {
            Self::MySql(c) => {
                if params.is_empty() {
                    (&mut **c).execute(sql).await?.rows_affected()
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = bind_mysql_param(query, param);
                    }
                    query.execute(&mut **c).await?.rows_affected()
                }
            }
            Self::Postgres(c) => {
                if params.is_empty() {
                    (&mut **c).execute(sql).await?.rows_affected()
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = bind_postgres_param(query, param);
                    }
                    query.execute(&mut **c).await?.rows_affected()
                }
            }
            Self::SQLite(c) => {
                if params.is_empty() {
                    (&mut **c).execute(sql).await?.rows_affected()
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = bind_sqlite_param(query, param);
                    }
                    query.execute(&mut **c).await?.rows_affected()
                }
            }
        };
        Ok(rows_affected)
    }

    /// Execute a query and return every row as an upper-cased row-map, in
    /// cursor order. The cursor is fully drained and closed before returning.
    pub async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[crate::models::sql::SqlParam],
    ) -> Result<Vec<RowMap>, sqlx::Error> {
        let maps = match self {
            Self::MySql(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                let rows = query.fetch_all(&mut **c).await?;
                rows.iter().map(|r| r.to_row_map()).collect()
            }
            Self::Postgres(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                let rows = query.fetch_all(&mut **c).await?;
                rows.iter().map(|r| r.to_row_map()).collect()
            }
            Self::SQLite(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                let rows = query.fetch_all(&mut **c).await?;
                rows.iter().map(|r| r.to_row_map()).collect()
            }
        };
        Ok(maps)
    }

    /// Detach from the pool and close the physical connection.
    pub async fn discard(self) -> Result<(), sqlx::Error> {
        match self {
            Self::MySql(c) => c.detach().close().await,
            Self::Postgres(c) => c.detach().close().await,
            Self::SQLite(c) => c.detach().close().await,
        }
    }
}
