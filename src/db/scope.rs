//! Connection scope holder.
//!
//! A scope is the binding between one unit of work and its leased
//! connection. The registry maps scope identities to leases so that nested
//! operations inside one unit of work reuse the same physical connection
//! until it is explicitly released. A lease is never visible to two scopes;
//! within one scope, operations serialize on the lease's own mutex.

use crate::db::health::{ConnectionHealth, LeaseVerdict};
use crate::db::pool::{DbPool, PooledConn};
use crate::error::OrmResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Identity of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeId(String);

impl ScopeId {
    /// Generate a fresh scope identity.
    pub fn new() -> Self {
        Self(format!("scope_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The connection currently checked out for a unit of work, together with
/// its transactional state and health tracker.
#[derive(Debug)]
pub struct ConnectionLease {
    pub(crate) conn: PooledConn,
    /// An explicit transaction was begun and not yet committed or rolled back.
    pub(crate) tx_open: bool,
    pub(crate) health: ConnectionHealth,
}

impl ConnectionLease {
    fn new(conn: PooledConn) -> Self {
        Self {
            conn,
            tx_open: false,
            health: ConnectionHealth::new(),
        }
    }

    /// Return the connection to the pool, or discard it when poisoned.
    pub(crate) async fn release(self) -> Result<(), sqlx::Error> {
        match self.health.verdict() {
            LeaseVerdict::Healthy => {
                // drop returns the connection to the pool
                drop(self.conn);
                Ok(())
            }
            LeaseVerdict::Poisoned => {
                warn!(
                    failures = self.health.failures(),
                    "discarding poisoned connection instead of returning it to the pool"
                );
                self.conn.discard().await
            }
        }
    }
}

/// Shared handle to the lease bound to one scope.
///
/// The handle is the explicit context value callers pass through the
/// operation chain; repeated acquisition within a scope yields the same
/// handle. Releasing takes the lease out, so a released handle is inert and
/// a second release is a no-op.
#[derive(Debug, Clone)]
pub struct LeasedConnection {
    scope: ScopeId,
    inner: Arc<Mutex<Option<ConnectionLease>>>,
}

impl LeasedConnection {
    /// The scope this lease belongs to.
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<ConnectionLease>> {
        self.inner.lock().await
    }
}

/// Process-wide registry mapping scope identities to leased connections.
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    leases: Arc<Mutex<HashMap<ScopeId, LeasedConnection>>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the connection bound to the scope, checking one out of the
    /// pool and binding it if none exists yet.
    pub async fn acquire(&self, scope: &ScopeId, source: &DbPool) -> OrmResult<LeasedConnection> {
        {
            let leases = self.leases.lock().await;
            if let Some(handle) = leases.get(scope) {
                if handle.lock().await.is_some() {
                    return Ok(handle.clone());
                }
                // stale binding left behind by a release; rebind below
            }
        } // lock released before the pool checkout

        let conn = source.acquire().await?;

        let mut leases = self.leases.lock().await;
        // Re-check after the await: another task may have bound this scope.
        if let Some(handle) = leases.get(scope) {
            if handle.lock().await.is_some() {
                drop(conn); // back to the pool
                return Ok(handle.clone());
            }
        }
        let handle = LeasedConnection {
            scope: scope.clone(),
            inner: Arc::new(Mutex::new(Some(ConnectionLease::new(conn)))),
        };
        leases.insert(scope.clone(), handle.clone());
        debug!(scope = %scope, "bound connection to scope");
        Ok(handle)
    }

    /// Drop the binding for a scope. The lease itself is consumed by the
    /// caller holding the handle.
    pub async fn clear(&self, scope: &ScopeId) {
        let mut leases = self.leases.lock().await;
        if leases.remove(scope).is_some() {
            debug!(scope = %scope, "cleared scope binding");
        }
    }

    /// Number of scopes currently holding a connection.
    pub async fn count(&self) -> usize {
        self.leases.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_id_format() {
        let id = ScopeId::new();
        assert!(id.to_string().starts_with("scope_"));
        assert_eq!(id.to_string().len(), 6 + 32); // "scope_" + 32 hex chars
    }

    #[test]
    fn test_scope_ids_are_unique() {
        assert_ne!(ScopeId::new(), ScopeId::new());
    }

    #[tokio::test]
    async fn test_registry_starts_empty() {
        let registry = ScopeRegistry::new();
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_clear_unknown_scope_is_noop() {
        let registry = ScopeRegistry::new();
        registry.clear(&ScopeId::new()).await;
        assert_eq!(registry.count().await, 0);
    }
}
