//! Connection processor: the orchestrator tying scopes, transactions,
//! statements, and materialization together.
//!
//! Every operation takes the [`LeasedConnection`] handle for the calling
//! unit of work. Statement operations (`update`, `list`, `get`) release the
//! connection back to the pool on every exit path unless an explicit
//! transaction is open, in which case the connection stays bound to the
//! scope until `commit`/`rollback`/`close`. `close` restores auto-commit
//! first: a still-open transaction is committed, matching the behavior of
//! resetting a connection that was switched to manual commit.

use crate::config::DbConfig;
use crate::db::pool::DbPool;
use crate::db::scope::{ConnectionLease, LeasedConnection, ScopeId, ScopeRegistry};
use crate::db::statement::Statement;
use crate::error::{OrmError, OrmResult, TxVerb};
use crate::models::entity::{FromRowMap, materialize};
use crate::models::sql::SqlInfo;
use tokio::sync::MutexGuard;
use tracing::{debug, warn};

/// Orchestrator for scoped connections, transactions, and statement
/// execution against one configured database.
#[derive(Debug)]
pub struct ConnectionProcessor {
    config: DbConfig,
    pool: DbPool,
    scopes: ScopeRegistry,
}

impl ConnectionProcessor {
    /// Connect the pool and build a processor.
    pub async fn new(config: DbConfig) -> OrmResult<Self> {
        let pool = DbPool::connect(&config).await?;
        Ok(Self {
            config,
            pool,
            scopes: ScopeRegistry::new(),
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Number of scopes currently holding a connection.
    pub async fn active_scopes(&self) -> usize {
        self.scopes.count().await
    }

    /// Close the underlying pool. Outstanding leases are invalidated.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }

    /// Return the connection bound to the scope, checking one out and
    /// binding it if the scope holds none.
    pub async fn get_connection(&self, scope: &ScopeId) -> OrmResult<LeasedConnection> {
        self.scopes.acquire(scope, &self.pool).await
    }

    /// Open an explicit transaction on the scoped connection.
    ///
    /// A no-op when a transaction is already open, so repeated calls within
    /// one unit of work are safe.
    pub async fn start(&self, conn: &LeasedConnection) -> OrmResult<()> {
        let mut guard = conn.lock().await;
        let lease = live(&mut guard, TxVerb::Begin)?;
        if lease.tx_open {
            debug!(scope = %conn.scope(), "transaction already open");
            return Ok(());
        }
        match lease.conn.execute_raw("BEGIN").await {
            Ok(()) => {
                lease.tx_open = true;
                debug!(scope = %conn.scope(), "transaction started");
                Ok(())
            }
            Err(e) => {
                lease.health.record_failure();
                Err(OrmError::transaction(TxVerb::Begin, e.to_string()))
            }
        }
    }

    /// Commit the open transaction. The connection stays bound to the scope.
    pub async fn commit(&self, conn: &LeasedConnection) -> OrmResult<()> {
        self.end_transaction(conn, TxVerb::Commit, "COMMIT").await
    }

    /// Roll back the open transaction. The connection stays bound to the
    /// scope.
    pub async fn rollback(&self, conn: &LeasedConnection) -> OrmResult<()> {
        self.end_transaction(conn, TxVerb::Rollback, "ROLLBACK").await
    }

    async fn end_transaction(
        &self,
        conn: &LeasedConnection,
        verb: TxVerb,
        sql: &str,
    ) -> OrmResult<()> {
        let mut guard = conn.lock().await;
        let lease = live(&mut guard, verb)?;
        if !lease.tx_open {
            return Err(OrmError::transaction(verb, "no open transaction"));
        }
        match lease.conn.execute_raw(sql).await {
            Ok(()) => {
                lease.tx_open = false;
                debug!(scope = %conn.scope(), verb = %verb, "transaction ended");
                Ok(())
            }
            Err(e) => {
                // leave tx_open set so close still tries to resolve it
                lease.health.record_failure();
                Err(OrmError::transaction(verb, e.to_string()))
            }
        }
    }

    /// Release the scoped connection, restoring auto-commit first.
    ///
    /// A still-open transaction is committed before release. If that fails
    /// the connection's state is ambiguous: it is condemned and force-closed
    /// instead of returning to the pool, and `Transaction(Close)` is raised.
    /// Closing an already-released handle is a no-op.
    pub async fn close(&self, conn: &LeasedConnection) -> OrmResult<()> {
        let mut lease = {
            let mut guard = conn.lock().await;
            match guard.take() {
                Some(lease) => lease,
                None => return Ok(()),
            }
        };
        self.scopes.clear(conn.scope()).await;

        if lease.tx_open {
            if let Err(commit_err) = lease.conn.execute_raw("COMMIT").await {
                lease.health.destroy();
                if let Err(release_err) = lease.release().await {
                    warn!(
                        scope = %conn.scope(),
                        error = %release_err,
                        "failed to discard condemned connection"
                    );
                }
                return Err(OrmError::transaction(
                    TxVerb::Close,
                    format!("failed to restore auto-commit: {commit_err}"),
                ));
            }
            lease.tx_open = false;
        }

        lease.release().await.map_err(|e| {
            OrmError::transaction(TxVerb::Close, format!("failed to release connection: {e}"))
        })
    }

    /// Execute a write statement and return the affected-row count.
    pub async fn update(&self, conn: &LeasedConnection, info: &SqlInfo) -> OrmResult<u64> {
        let stmt = Statement::prepare(info, &self.config);
        let mut guard = conn.lock().await;
        let lease = guard
            .as_mut()
            .ok_or_else(|| OrmError::connection("connection already released"))?;

        let outcome = stmt.execute(&mut lease.conn).await;
        if outcome.is_err() {
            lease.health.record_failure();
        }
        self.finish_statement(conn, guard, outcome.is_ok()).await?;
        outcome
    }

    /// Execute a query and materialize every row into `T`, in cursor order.
    pub async fn list<T: FromRowMap>(
        &self,
        conn: &LeasedConnection,
        info: &SqlInfo,
    ) -> OrmResult<Vec<T>> {
        let stmt = Statement::prepare(info, &self.config);
        let mut guard = conn.lock().await;
        let lease = guard
            .as_mut()
            .ok_or_else(|| OrmError::connection("connection already released"))?;

        let rows = stmt.fetch(&mut lease.conn).await;
        if rows.is_err() {
            lease.health.record_failure();
        }
        self.finish_statement(conn, guard, rows.is_ok()).await?;
        materialize(rows?)
    }

    /// Execute a query expected to yield at most one row.
    ///
    /// Zero rows is `None`; more than one row surfaces as an error rather
    /// than silently picking the first.
    pub async fn get<T: FromRowMap>(
        &self,
        conn: &LeasedConnection,
        info: &SqlInfo,
    ) -> OrmResult<Option<T>> {
        let mut records = self.list::<T>(conn, info).await?;
        match records.len() {
            0 => Ok(None),
            1 => Ok(records.pop()),
            n => Err(OrmError::execute_sql(format!(
                "expected at most one row, query returned {n}"
            ))),
        }
    }

    /// Release discipline shared by the statement operations: outside an
    /// explicit transaction the connection goes back on every exit path. A
    /// release failure never masks a primary failure; standing alone it is a
    /// close failure.
    async fn finish_statement(
        &self,
        conn: &LeasedConnection,
        mut guard: MutexGuard<'_, Option<ConnectionLease>>,
        primary_ok: bool,
    ) -> OrmResult<()> {
        let tx_open = guard.as_ref().is_some_and(|lease| lease.tx_open);
        if tx_open {
            return Ok(());
        }
        let Some(lease) = guard.take() else {
            return Ok(());
        };
        drop(guard);
        self.scopes.clear(conn.scope()).await;
        if let Err(e) = lease.release().await {
            warn!(scope = %conn.scope(), error = %e, "connection release failed");
            if primary_ok {
                return Err(OrmError::transaction(
                    TxVerb::Close,
                    format!("failed to release connection: {e}"),
                ));
            }
        }
        Ok(())
    }
}

fn live<'g, 'l>(
    guard: &'g mut MutexGuard<'l, Option<ConnectionLease>>,
    verb: TxVerb,
) -> OrmResult<&'g mut ConnectionLease> {
    guard
        .as_mut()
        .ok_or_else(|| OrmError::transaction(verb, "connection already released"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn sqlite_processor(dir: &TempDir) -> ConnectionProcessor {
        let path = dir.path().join("proc.db");
        let config = DbConfig::parse(&format!("sqlite:{}", path.display())).unwrap();
        ConnectionProcessor::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_scope_yields_same_handle_inside_transaction() {
        let dir = TempDir::new().unwrap();
        let processor = sqlite_processor(&dir).await;
        let scope = ScopeId::new();

        let conn = processor.get_connection(&scope).await.unwrap();
        processor.start(&conn).await.unwrap();
        let again = processor.get_connection(&scope).await.unwrap();
        assert_eq!(again.scope(), conn.scope());
        assert_eq!(processor.active_scopes().await, 1);

        processor.rollback(&conn).await.unwrap();
        processor.close(&conn).await.unwrap();
        assert_eq!(processor.active_scopes().await, 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let processor = sqlite_processor(&dir).await;
        let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
        processor.close(&conn).await.unwrap();
        processor.close(&conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_released_handle_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let processor = sqlite_processor(&dir).await;
        let conn = processor.get_connection(&ScopeId::new()).await.unwrap();
        processor.close(&conn).await.unwrap();

        let err = processor.start(&conn).await.unwrap_err();
        assert!(matches!(
            err,
            OrmError::Transaction {
                verb: TxVerb::Begin,
                ..
            }
        ));
        let err = processor
            .update(&conn, &SqlInfo::of("SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_commit_without_transaction_is_an_error() {
        let dir = TempDir::new().unwrap();
        let processor = sqlite_processor(&dir).await;
        let conn = processor.get_connection(&ScopeId::new()).await.unwrap();

        let err = processor.commit(&conn).await.unwrap_err();
        assert!(matches!(
            err,
            OrmError::Transaction {
                verb: TxVerb::Commit,
                ..
            }
        ));
        processor.close(&conn).await.unwrap();
    }
}
