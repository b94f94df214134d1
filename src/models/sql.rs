//! SQL text and bind parameters.
//!
//! A [`SqlInfo`] is the immutable (sql, params) pair an external SQL builder
//! produces for each logical operation. It is created once, consumed by
//! statement preparation and never mutated.

use serde::{Deserialize, Serialize};

/// A positional bind parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl SqlParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for SqlParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// SQL text plus ordered positional parameters for one operation.
#[derive(Debug, Clone)]
pub struct SqlInfo {
    sql: String,
    params: Vec<SqlParam>,
}

impl SqlInfo {
    /// Create a new statement description.
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Statement with no bind parameters.
    pub fn of(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// The SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The bind parameters, in positional order.
    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }
}
