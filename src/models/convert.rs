//! Per-field type coercion.
//!
//! Row-maps carry loosely-typed column values (JSON numbers, strings,
//! booleans, base64 binary). [`FieldCoerce`] converts one column value into a
//! concrete field type, tolerating the usual driver looseness: numeric
//! strings parse into numbers, 0/1 and "true"/"false" coerce into booleans,
//! and anything stringifies into `String`. A conversion that cannot succeed
//! yields a [`ConvertError`] naming the target type and the offending value.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("cannot convert {found} into {target}")]
    Incompatible {
        target: &'static str,
        found: &'static str,
    },

    #[error("failed to parse {value:?} as {target}: {message}")]
    Parse {
        target: &'static str,
        value: String,
        message: String,
    },

    #[error("value {value} out of range for {target}")]
    OutOfRange {
        target: &'static str,
        value: String,
    },

    #[error("unexpected null for non-optional {target}")]
    UnexpectedNull { target: &'static str },
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Conversion of one column value into a concrete Rust field type.
pub trait FieldCoerce: Sized {
    /// Name used in conversion errors.
    const TARGET: &'static str;

    fn from_column(value: &JsonValue) -> Result<Self, ConvertError>;
}

fn parse_str<T: FromStr>(target: &'static str, s: &str) -> Result<T, ConvertError>
where
    T::Err: std::fmt::Display,
{
    s.trim().parse().map_err(|e: T::Err| ConvertError::Parse {
        target,
        value: s.to_string(),
        message: e.to_string(),
    })
}

macro_rules! coerce_int {
    ($($ty:ty => $name:literal),* $(,)?) => {$(
        impl FieldCoerce for $ty {
            const TARGET: &'static str = $name;

            fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
                match value {
                    JsonValue::Number(n) => {
                        if let Some(i) = n.as_i64() {
                            <$ty>::try_from(i).map_err(|_| ConvertError::OutOfRange {
                                target: Self::TARGET,
                                value: n.to_string(),
                            })
                        } else if let Some(f) = n.as_f64() {
                            // drivers report COUNT(*) etc. as floats on some backends
                            if f.fract() == 0.0 {
                                <$ty>::try_from(f as i64).map_err(|_| ConvertError::OutOfRange {
                                    target: Self::TARGET,
                                    value: n.to_string(),
                                })
                            } else {
                                Err(ConvertError::Parse {
                                    target: Self::TARGET,
                                    value: n.to_string(),
                                    message: "fractional value".to_string(),
                                })
                            }
                        } else {
                            Err(ConvertError::OutOfRange {
                                target: Self::TARGET,
                                value: n.to_string(),
                            })
                        }
                    }
                    JsonValue::String(s) => parse_str(Self::TARGET, s),
                    JsonValue::Bool(b) => Ok(if *b { 1 } else { 0 }),
                    JsonValue::Null => Err(ConvertError::UnexpectedNull {
                        target: Self::TARGET,
                    }),
                    other => Err(ConvertError::Incompatible {
                        target: Self::TARGET,
                        found: kind_of(other),
                    }),
                }
            }
        }
    )*};
}

coerce_int! {
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u32 => "u32",
    u64 => "u64",
}

macro_rules! coerce_float {
    ($($ty:ty => $name:literal),* $(,)?) => {$(
        impl FieldCoerce for $ty {
            const TARGET: &'static str = $name;

            fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
                match value {
                    JsonValue::Number(n) => n.as_f64().map(|f| f as $ty).ok_or_else(|| {
                        ConvertError::OutOfRange {
                            target: Self::TARGET,
                            value: n.to_string(),
                        }
                    }),
                    JsonValue::String(s) => parse_str(Self::TARGET, s),
                    JsonValue::Null => Err(ConvertError::UnexpectedNull {
                        target: Self::TARGET,
                    }),
                    other => Err(ConvertError::Incompatible {
                        target: Self::TARGET,
                        found: kind_of(other),
                    }),
                }
            }
        }
    )*};
}

coerce_float! {
    f32 => "f32",
    f64 => "f64",
}

impl FieldCoerce for bool {
    const TARGET: &'static str = "bool";

    fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
        match value {
            JsonValue::Bool(b) => Ok(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(ConvertError::Parse {
                    target: Self::TARGET,
                    value: n.to_string(),
                    message: "expected 0 or 1".to_string(),
                }),
            },
            JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "t" | "yes" => Ok(true),
                "false" | "0" | "f" | "no" => Ok(false),
                _ => Err(ConvertError::Parse {
                    target: Self::TARGET,
                    value: s.clone(),
                    message: "not a boolean literal".to_string(),
                }),
            },
            JsonValue::Null => Err(ConvertError::UnexpectedNull {
                target: Self::TARGET,
            }),
            other => Err(ConvertError::Incompatible {
                target: Self::TARGET,
                found: kind_of(other),
            }),
        }
    }
}

impl FieldCoerce for String {
    const TARGET: &'static str = "String";

    fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
        match value {
            JsonValue::String(s) => Ok(s.clone()),
            JsonValue::Number(n) => Ok(n.to_string()),
            JsonValue::Bool(b) => Ok(b.to_string()),
            JsonValue::Null => Err(ConvertError::UnexpectedNull {
                target: Self::TARGET,
            }),
            other => Err(ConvertError::Incompatible {
                target: Self::TARGET,
                found: kind_of(other),
            }),
        }
    }
}

impl FieldCoerce for Vec<u8> {
    const TARGET: &'static str = "Vec<u8>";

    fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
        match value {
            // binary columns land in the row-map as base64 when the bytes are
            // not valid utf-8, plain text otherwise
            JsonValue::String(s) => Ok(BASE64
                .decode(s.as_bytes())
                .unwrap_or_else(|_| s.as_bytes().to_vec())),
            JsonValue::Null => Err(ConvertError::UnexpectedNull {
                target: Self::TARGET,
            }),
            other => Err(ConvertError::Incompatible {
                target: Self::TARGET,
                found: kind_of(other),
            }),
        }
    }
}

impl FieldCoerce for Decimal {
    const TARGET: &'static str = "Decimal";

    fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
        match value {
            JsonValue::String(s) => parse_str(Self::TARGET, s),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Decimal::from(i))
                } else if let Some(f) = n.as_f64() {
                    Decimal::try_from(f).map_err(|e| ConvertError::Parse {
                        target: Self::TARGET,
                        value: n.to_string(),
                        message: e.to_string(),
                    })
                } else {
                    Err(ConvertError::OutOfRange {
                        target: Self::TARGET,
                        value: n.to_string(),
                    })
                }
            }
            JsonValue::Null => Err(ConvertError::UnexpectedNull {
                target: Self::TARGET,
            }),
            other => Err(ConvertError::Incompatible {
                target: Self::TARGET,
                found: kind_of(other),
            }),
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

fn parse_naive_datetime(target: &'static str, s: &str) -> Result<NaiveDateTime, ConvertError> {
    let trimmed = s.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    Err(ConvertError::Parse {
        target,
        value: s.to_string(),
        message: "unrecognized datetime format".to_string(),
    })
}

impl FieldCoerce for NaiveDateTime {
    const TARGET: &'static str = "NaiveDateTime";

    fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
        match value {
            JsonValue::String(s) => parse_naive_datetime(Self::TARGET, s),
            JsonValue::Null => Err(ConvertError::UnexpectedNull {
                target: Self::TARGET,
            }),
            other => Err(ConvertError::Incompatible {
                target: Self::TARGET,
                found: kind_of(other),
            }),
        }
    }
}

impl FieldCoerce for DateTime<Utc> {
    const TARGET: &'static str = "DateTime<Utc>";

    fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
        match value {
            JsonValue::String(s) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
                    return Ok(dt.with_timezone(&Utc));
                }
                parse_naive_datetime(Self::TARGET, s).map(|naive| naive.and_utc())
            }
            JsonValue::Null => Err(ConvertError::UnexpectedNull {
                target: Self::TARGET,
            }),
            other => Err(ConvertError::Incompatible {
                target: Self::TARGET,
                found: kind_of(other),
            }),
        }
    }
}

impl FieldCoerce for NaiveDate {
    const TARGET: &'static str = "NaiveDate";

    fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
        match value {
            JsonValue::String(s) => {
                if let Ok(date) = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
                    return Ok(date);
                }
                parse_naive_datetime(Self::TARGET, s).map(|dt| dt.date())
            }
            JsonValue::Null => Err(ConvertError::UnexpectedNull {
                target: Self::TARGET,
            }),
            other => Err(ConvertError::Incompatible {
                target: Self::TARGET,
                found: kind_of(other),
            }),
        }
    }
}

impl FieldCoerce for JsonValue {
    const TARGET: &'static str = "Value";

    fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
        Ok(value.clone())
    }
}

impl<T: FieldCoerce> FieldCoerce for Option<T> {
    const TARGET: &'static str = T::TARGET;

    fn from_column(value: &JsonValue) -> Result<Self, ConvertError> {
        match value {
            JsonValue::Null => Ok(None),
            other => T::from_column(other).map(Some),
        }
    }
}
