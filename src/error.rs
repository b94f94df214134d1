//! Error types for the relational mapping layer.
//!
//! All failures surface as one of a small taxonomy of kinds using `thiserror`:
//! connection acquisition, transaction verbs, SQL execution/materialization,
//! SQL building, and (when forced aborts are enabled) execution timeouts.

use thiserror::Error;

/// Transaction verb that failed, carried inside [`OrmError::Transaction`]
/// so callers can tell a failed commit from a failed close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxVerb {
    Begin,
    Commit,
    Rollback,
    Close,
}

impl std::fmt::Display for TxVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
            Self::Close => write!(f, "close"),
        }
    }
}

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("connection acquisition failed: {message}")]
    Connection { message: String },

    #[error("{verb} transaction failed: {message}")]
    Transaction { verb: TxVerb, message: String },

    #[error("sql execution failed: {message}")]
    ExecuteSql {
        message: String,
        /// e.g. "23505" for a unique violation
        sql_state: Option<String>,
    },

    #[error("sql build failed: {message}")]
    SqlBuilder { message: String },

    #[error("execution exceeded {limit_ms}ms: {operation}")]
    Timeout { operation: String, limit_ms: u64 },
}

impl OrmError {
    /// Create a connection-acquisition error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a transaction error for the given verb.
    pub fn transaction(verb: TxVerb, message: impl Into<String>) -> Self {
        Self::Transaction {
            verb,
            message: message.into(),
        }
    }

    /// Create an execute-sql error without a SQLSTATE.
    pub fn execute_sql(message: impl Into<String>) -> Self {
        Self::ExecuteSql {
            message: message.into(),
            sql_state: None,
        }
    }

    /// Create a sql-builder error (malformed schema metadata).
    pub fn sql_builder(message: impl Into<String>) -> Self {
        Self::SqlBuilder {
            message: message.into(),
        }
    }

    /// Create a timeout error for a forced-abort overrun.
    pub fn timeout(operation: impl Into<String>, limit_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit_ms,
        }
    }

    /// SQLSTATE reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::ExecuteSql { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable at the caller level.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors into the taxonomy. Pool and protocol failures become
/// connection errors; everything raised while executing a statement becomes
/// an execute-sql error.
impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => {
                OrmError::connection(format!("invalid configuration: {msg}"))
            }
            sqlx::Error::PoolTimedOut => {
                OrmError::connection("timed out acquiring a connection from the pool")
            }
            sqlx::Error::PoolClosed => OrmError::connection("connection pool is closed"),
            sqlx::Error::Io(io_err) => OrmError::connection(format!("i/o error: {io_err}")),
            sqlx::Error::Tls(tls_err) => OrmError::connection(format!("tls error: {tls_err}")),
            sqlx::Error::Protocol(msg) => OrmError::connection(format!("protocol error: {msg}")),
            sqlx::Error::Database(db_err) => {
                let sql_state = db_err.code().map(|c| c.to_string());
                OrmError::ExecuteSql {
                    message: db_err.message().to_string(),
                    sql_state,
                }
            }
            sqlx::Error::RowNotFound => OrmError::execute_sql("no rows returned"),
            sqlx::Error::TypeNotFound { type_name } => {
                OrmError::execute_sql(format!("type not found: {type_name}"))
            }
            sqlx::Error::ColumnNotFound(col) => {
                OrmError::execute_sql(format!("column not found: {col}"))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => {
                OrmError::execute_sql(format!("column index {index} out of bounds (len: {len})"))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                OrmError::execute_sql(format!("failed to decode column {index}: {source}"))
            }
            sqlx::Error::Decode(source) => OrmError::execute_sql(format!("decode error: {source}")),
            sqlx::Error::Encode(source) => {
                OrmError::execute_sql(format!("failed to bind parameter: {source}"))
            }
            sqlx::Error::WorkerCrashed => OrmError::connection("database worker crashed"),
            other => OrmError::execute_sql(format!("database error: {other}")),
        }
    }
}

/// Result type alias for mapping-layer operations.
pub type OrmResult<T> = Result<T, OrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrmError::connection("pool exhausted");
        assert!(err.to_string().contains("connection acquisition failed"));
    }

    #[test]
    fn test_transaction_verb_in_message() {
        let err = OrmError::transaction(TxVerb::Commit, "broken pipe");
        assert!(err.to_string().starts_with("commit transaction failed"));
        let err = OrmError::transaction(TxVerb::Close, "broken pipe");
        assert!(err.to_string().starts_with("close transaction failed"));
    }

    #[test]
    fn test_sql_state_accessor() {
        let err = OrmError::ExecuteSql {
            message: "duplicate key".to_string(),
            sql_state: Some("23505".to_string()),
        };
        assert_eq!(err.sql_state(), Some("23505"));
        assert_eq!(OrmError::connection("x").sql_state(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(OrmError::connection("err").is_retryable());
        assert!(OrmError::timeout("query", 5000).is_retryable());
        assert!(!OrmError::execute_sql("syntax error").is_retryable());
        assert!(!OrmError::transaction(TxVerb::Begin, "err").is_retryable());
    }

    #[test]
    fn test_from_sqlx_pool_timeout() {
        let err: OrmError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, OrmError::Connection { .. }));
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let err: OrmError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, OrmError::ExecuteSql { .. }));
    }
}
