//! Relational mapping layer.
//!
//! This library executes parameterized SQL against MySQL, PostgreSQL, or
//! SQLite through a pooled connection bound to a per-unit-of-work scope,
//! supervises execution time, and materializes result rows into scalar,
//! raw-map, schema-wrapper, or typed-entity targets.
//!
//! The entry point is [`ConnectionProcessor`]: acquire a connection for a
//! [`ScopeId`], run statements built as [`SqlInfo`], and release (or
//! transact and then release) through the same processor.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{DatabaseType, DbConfig, PoolOptions};
pub use db::{ConnectionProcessor, DbPool, LeasedConnection, RowMap, ScopeId};
pub use error::{OrmError, OrmResult, TxVerb};
pub use models::{Entity, FromRowMap, Schema, SqlInfo, SqlParam};
