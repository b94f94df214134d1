//! Data models for the relational mapping layer.
//!
//! This module re-exports the statement model, the materialization targets,
//! and the coercion seam between raw column values and typed fields.

pub mod convert;
pub mod entity;
pub mod schema;
pub mod sql;

// Re-export commonly used types
pub use convert::{ConvertError, FieldCoerce};
pub use entity::{Entity, FieldBinding, FromRowMap, hydrate, materialize};
pub use schema::Schema;
pub use sql::{SqlInfo, SqlParam};
