//! Statement wrapper with execution-time supervision.
//!
//! A [`Statement`] borrows the SQL/parameter pair for one operation together
//! with the supervision settings from the configuration. When execution-time
//! monitoring is on, wall-clock duration of every execute is measured and an
//! overrun of the configured ceiling is logged — the result is still
//! returned. Only when `abort_on_overrun` is set does the wrapper cancel the
//! statement and raise a timeout error; the default stays non-fatal because
//! killing a long-running write mid-flight risks partial writes.
//!
//! Statement and cursor closure is RAII, so resources are reclaimed on every
//! exit path and double-close cannot occur.

use crate::config::DbConfig;
use crate::db::pool::PooledConn;
use crate::db::row::RowMap;
use crate::error::{OrmError, OrmResult};
use crate::models::sql::SqlInfo;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};

/// A prepared statement bound to one [`SqlInfo`].
pub struct Statement<'q> {
    info: &'q SqlInfo,
    monitor: bool,
    max_execute_time: Duration,
    abort_on_overrun: bool,
}

impl<'q> Statement<'q> {
    /// Prepare a statement, logging SQL text and parameters when the
    /// configuration's print-SQL flag is set.
    pub(crate) fn prepare(info: &'q SqlInfo, config: &DbConfig) -> Self {
        if config.print_sql {
            info!(sql = %info.sql(), "execute sql");
            info!(params = ?info.params(), "params");
        }
        Self {
            info,
            monitor: config.monitor_execute_time,
            max_execute_time: config.max_execute_time(),
            abort_on_overrun: config.abort_on_overrun,
        }
    }

    /// Execute as a write and return the affected-row count.
    pub(crate) async fn execute(&self, conn: &mut PooledConn) -> OrmResult<u64> {
        let fut = conn.execute(self.info.sql(), self.info.params());
        self.supervise("write", fut).await
    }

    /// Execute as a query and return every row as a row-map.
    pub(crate) async fn fetch(&self, conn: &mut PooledConn) -> OrmResult<Vec<RowMap>> {
        let fut = conn.fetch_all(self.info.sql(), self.info.params());
        self.supervise("query", fut).await
    }

    async fn supervise<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> OrmResult<T> {
        if self.abort_on_overrun {
            match timeout(self.max_execute_time, fut).await {
                Ok(result) => result.map_err(OrmError::from),
                Err(_) => Err(OrmError::timeout(
                    format!("{operation}: {}", self.info.sql()),
                    self.max_execute_time.as_millis() as u64,
                )),
            }
        } else {
            let start = Instant::now();
            let result = fut.await;
            if self.monitor {
                let elapsed = start.elapsed();
                if elapsed > self.max_execute_time {
                    warn!(
                        sql = %self.info.sql(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        limit_ms = self.max_execute_time.as_millis() as u64,
                        "statement exceeded max execution time"
                    );
                }
            }
            result.map_err(OrmError::from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement_config(abort: bool) -> DbConfig {
        DbConfig::parse("sqlite:stmt-test.db")
            .unwrap()
            .with_max_execute_time_ms(5)
            .with_abort_on_overrun(abort)
    }

    #[tokio::test]
    async fn test_overrun_is_non_fatal_by_default() {
        let config = statement_config(false);
        let info = SqlInfo::of("SELECT 1");
        let stmt = Statement::prepare(&info, &config);

        let result = stmt
            .supervise("query", async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, sqlx::Error>(42u64)
            })
            .await;
        // overrun is observed, not preempted
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_abort_on_overrun_raises_timeout() {
        let config = statement_config(true);
        let info = SqlInfo::of("SELECT 1");
        let stmt = Statement::prepare(&info, &config);

        let result = stmt
            .supervise("query", async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, sqlx::Error>(42u64)
            })
            .await;
        assert!(matches!(result, Err(OrmError::Timeout { limit_ms: 5, .. })));
    }

    #[tokio::test]
    async fn test_fast_statement_passes_through() {
        let config = statement_config(true);
        let info = SqlInfo::of("SELECT 1");
        let stmt = Statement::prepare(&info, &config);

        let result = stmt
            .supervise("query", async { Ok::<_, sqlx::Error>(7u64) })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_driver_error_maps_to_execute_sql() {
        let config = statement_config(false);
        let info = SqlInfo::of("SELECT 1");
        let stmt = Statement::prepare(&info, &config);

        let result: OrmResult<u64> = stmt
            .supervise("query", async { Err(sqlx::Error::RowNotFound) })
            .await;
        assert!(matches!(result, Err(OrmError::ExecuteSql { .. })));
    }
}
