//! Result materialization into typed targets.
//!
//! Every query result arrives as a list of upper-cased row-maps. The
//! [`FromRowMap`] trait turns one row-map into a target shape:
//!
//! - `RowMap` itself — the raw-map target, identity.
//! - [`Schema`] — the generic record target, row-map attached.
//! - scalars (`i16`..`String`, `Decimal`) — require exactly one column.
//! - any [`Entity`] — field-by-field hydration through its registered
//!   bindings, declared once with the [`entity!`](crate::entity) macro.
//!
//! Entity hydration is forgiving on purpose: an absent column leaves the
//! field at its default, and a single field's coercion failure is logged and
//! skipped rather than aborting the whole row.

use crate::db::row::RowMap;
use crate::error::{OrmError, OrmResult};
use crate::models::convert::{ConvertError, FieldCoerce};
use crate::models::schema::Schema;
use serde_json::Value as JsonValue;
use tracing::warn;

/// Conversion of one result row into a target record shape.
pub trait FromRowMap: Sized {
    fn from_row_map(row: RowMap) -> OrmResult<Self>;
}

impl FromRowMap for RowMap {
    fn from_row_map(row: RowMap) -> OrmResult<Self> {
        Ok(row)
    }
}

impl FromRowMap for Schema {
    fn from_row_map(row: RowMap) -> OrmResult<Self> {
        Ok(Schema::from_row(row))
    }
}

fn single_column(row: &RowMap) -> OrmResult<&JsonValue> {
    let mut values = row.values();
    match (values.next(), values.next()) {
        (Some(value), None) => Ok(value),
        _ => Err(OrmError::execute_sql(format!(
            "scalar target requires exactly one column, query returned {}",
            row.len()
        ))),
    }
}

macro_rules! scalar_from_row_map {
    ($($ty:ty),* $(,)?) => {$(
        impl FromRowMap for $ty {
            fn from_row_map(row: RowMap) -> OrmResult<Self> {
                let value = single_column(&row)?;
                <$ty as FieldCoerce>::from_column(value).map_err(|e| {
                    OrmError::execute_sql(format!("scalar conversion failed: {e}"))
                })
            }
        }
    )*};
}

scalar_from_row_map!(i16, i32, i64, f32, f64, rust_decimal::Decimal, String);

/// One column-to-field binding, built once per entity type.
pub struct FieldBinding<T> {
    /// Column name as declared; matched against upper-cased row-map keys.
    pub column: &'static str,
    /// Coerce the column value and assign it into the record.
    pub assign: fn(&mut T, &JsonValue) -> Result<(), ConvertError>,
}

/// A typed record backed by a table.
///
/// Implementations are generated by the [`entity!`](crate::entity) macro,
/// which builds the binding table statically instead of inspecting the type
/// at runtime.
pub trait Entity: Default {
    /// Table the entity persists to.
    const TABLE: &'static str;

    /// Column-to-field bindings, in declaration order.
    fn bindings() -> &'static [FieldBinding<Self>];

    /// Primary-key column names.
    fn primary_keys() -> &'static [&'static str];
}

/// Hydrate a fresh record from one row-map.
pub fn hydrate<T: Entity + 'static>(row: &RowMap) -> T {
    let mut record = T::default();
    for binding in T::bindings() {
        let Some(value) = row.get(&binding.column.to_ascii_uppercase()) else {
            continue;
        };
        if let Err(e) = (binding.assign)(&mut record, value) {
            warn!(
                table = T::TABLE,
                column = binding.column,
                error = %e,
                "field coercion failed, leaving default"
            );
        }
    }
    record
}

/// Convert every row into the target shape, in cursor order.
pub fn materialize<T: FromRowMap>(rows: Vec<RowMap>) -> OrmResult<Vec<T>> {
    rows.into_iter().map(T::from_row_map).collect()
}

/// Declare a struct as an [`Entity`], generating its binding table and its
/// [`FromRowMap`] implementation.
///
/// ```
/// use relmap::entity;
///
/// #[derive(Debug, Default)]
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// entity! {
///     User {
///         table: "users",
///         primary_keys: ["id"],
///         fields: {
///             id => "id",
///             name => "name",
///         },
///     }
/// }
/// ```
#[macro_export]
macro_rules! entity {
    (
        $ty:ty {
            table: $table:literal,
            primary_keys: [$($pk:literal),* $(,)?],
            fields: { $($field:ident => $column:literal),* $(,)? } $(,)?
        }
    ) => {
        impl $crate::models::entity::Entity for $ty {
            const TABLE: &'static str = $table;

            fn bindings() -> &'static [$crate::models::entity::FieldBinding<Self>] {
                static BINDINGS: &[$crate::models::entity::FieldBinding<$ty>] = &[
                    $(
                        $crate::models::entity::FieldBinding {
                            column: $column,
                            assign: |record, value| {
                                record.$field =
                                    $crate::models::convert::FieldCoerce::from_column(value)?;
                                Ok(())
                            },
                        }
                    ),*
                ];
                BINDINGS
            }

            fn primary_keys() -> &'static [&'static str] {
                &[$($pk),*]
            }
        }

        impl $crate::models::entity::FromRowMap for $ty {
            fn from_row_map(row: $crate::db::row::RowMap) -> $crate::error::OrmResult<Self> {
                Ok($crate::models::entity::hydrate(&row))
            }
        }
    };
}
