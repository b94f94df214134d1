//! Generic table record.
//!
//! A [`Schema`] is the untyped record shape: a table name plus one row-map.
//! It is the materialization target for callers that want column access
//! without declaring an entity type.

use crate::models::convert::{ConvertError, FieldCoerce};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::db::row::RowMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    table: String,
    row: RowMap,
}

impl Schema {
    /// Open a schema record for a table.
    pub fn open(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            row: RowMap::new(),
        }
    }

    /// Wrap a row-map without a table name, as query materialization does.
    pub fn from_row(row: RowMap) -> Self {
        Self {
            table: String::new(),
            row,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Raw column value, looked up by upper-cased name.
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.row.get(&column.to_ascii_uppercase())
    }

    /// Column value coerced into a concrete field type.
    pub fn field<T: FieldCoerce>(&self, column: &str) -> Result<T, ConvertError> {
        match self.get(column) {
            Some(value) => T::from_column(value),
            None => T::from_column(&JsonValue::Null),
        }
    }

    /// Set a column value, upper-casing the name to match row-map keys.
    pub fn set(&mut self, column: &str, value: impl Into<JsonValue>) -> &mut Self {
        self.row.insert(column.to_ascii_uppercase(), value.into());
        self
    }

    /// Column names present in the record.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.row.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    /// The underlying row-map.
    pub fn row(&self) -> &RowMap {
        &self.row
    }

    pub fn into_row(self) -> RowMap {
        self.row
    }
}
