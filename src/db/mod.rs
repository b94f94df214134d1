//! Database access layer.
//!
//! This module provides the connection-side half of the mapping layer:
//! - Pooled connection source with per-database dispatch
//! - Scope registry binding units of work to leased connections
//! - Connection health tracking and poisoned-connection discard
//! - Statement execution with timeout supervision
//! - Row-to-map conversion with per-database type decoding
//! - The connection processor orchestrating all of the above

pub mod health;
pub(crate) mod params;
pub mod pool;
pub mod processor;
pub mod row;
pub mod scope;
pub mod statement;

pub use health::{ConnectionHealth, LeaseVerdict, MAX_CONNECTION_FAILURES};
pub use pool::{DbPool, PooledConn};
pub use processor::ConnectionProcessor;
pub use row::{RowMap, RowToMap, TypeCategory};
pub use scope::{LeasedConnection, ScopeId, ScopeRegistry};
pub use statement::Statement;
