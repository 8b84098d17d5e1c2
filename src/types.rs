use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Portable parameter/column type exposed to application code.
///
/// Every variant except [`DbType::Guid`] and [`DbType::Currency`] has a
/// registered native mapping in [`crate::bridge::TypeBridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    AnsiString,
    AnsiStringFixedLength,
    Binary,
    Boolean,
    Byte,
    Currency,
    Date,
    DateTime,
    DateTime2,
    DateTimeOffset,
    Decimal,
    Double,
    Guid,
    Int16,
    Int32,
    Int64,
    Object,
    SByte,
    Single,
    String,
    StringFixedLength,
    Time,
    UInt16,
    UInt32,
    UInt64,
    VarNumeric,
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Native type code as reported by the underlying driver (JDBC numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeTypeCode(pub i32);

impl NativeTypeCode {
    pub const NULL: Self = Self(0);
    pub const CHAR: Self = Self(1);
    pub const DECIMAL: Self = Self(3);
    pub const INTEGER: Self = Self(4);
    pub const SMALLINT: Self = Self(5);
    pub const FLOAT: Self = Self(6);
    pub const DOUBLE: Self = Self(8);
    pub const VARCHAR: Self = Self(12);
    pub const BOOLEAN: Self = Self(16);
    pub const DATE: Self = Self(91);
    pub const TIME: Self = Self(92);
    pub const TIMESTAMP: Self = Self(93);
    pub const BIGINT: Self = Self(-5);
    pub const TINYINT: Self = Self(-6);
    pub const BINARY: Self = Self(-2);
    pub const LONGVARBINARY: Self = Self(-4);
    pub const NVARCHAR: Self = Self(-9);
    pub const NCHAR: Self = Self(-15);
    pub const JAVA_OBJECT: Self = Self(2000);
    pub const ARRAY: Self = Self(2003);
}

impl fmt::Display for NativeTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Values that can be bound as parameters or read back from a row.
///
/// ```rust
/// use sql_bridge::prelude::*;
///
/// let values = vec![Value::Int32(1), Value::from("alice"), Value::Null];
/// assert!(values[2].is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// NULL value
    #[default]
    Null,
    Bool(bool),
    Byte(u8),
    SByte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Single(f32),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the variant, used in conversion diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Byte(_) => "Byte",
            Value::SByte(_) => "SByte",
            Value::Int16(_) => "Int16",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::UInt16(_) => "UInt16",
            Value::UInt32(_) => "UInt32",
            Value::UInt64(_) => "UInt64",
            Value::Single(_) => "Single",
            Value::Double(_) => "Double",
            Value::Decimal(_) => "Decimal",
            Value::Text(_) => "Text",
            Value::Binary(_) => "Binary",
            Value::Date(_) => "Date",
            Value::Time(_) => "Time",
            Value::DateTime(_) => "DateTime",
            Value::DateTimeOffset(_) => "DateTimeOffset",
        }
    }

    /// Widen any integral variant to `i64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::SByte(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Single(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            other => match other.as_i64() {
                Some(1) => Some(true),
                Some(0) => Some(false),
                _ => None,
            },
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Binary(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    u8 => Byte,
    i8 => SByte,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Single,
    f64 => Double,
    Decimal => Decimal,
    String => Text,
    Vec<u8> => Binary,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Value in the representation the underlying driver binds and returns.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl NativeValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The native type code a driver would report for this value.
    #[must_use]
    pub fn type_code(&self) -> NativeTypeCode {
        match self {
            NativeValue::Null => NativeTypeCode::NULL,
            NativeValue::Boolean(_) => NativeTypeCode::BOOLEAN,
            NativeValue::TinyInt(_) => NativeTypeCode::TINYINT,
            NativeValue::SmallInt(_) => NativeTypeCode::SMALLINT,
            NativeValue::Integer(_) => NativeTypeCode::INTEGER,
            NativeValue::BigInt(_) => NativeTypeCode::BIGINT,
            NativeValue::Real(_) => NativeTypeCode::FLOAT,
            NativeValue::Double(_) => NativeTypeCode::DOUBLE,
            NativeValue::Decimal(_) => NativeTypeCode::DECIMAL,
            NativeValue::Text(_) => NativeTypeCode::VARCHAR,
            NativeValue::Bytes(_) => NativeTypeCode::BINARY,
            NativeValue::Date(_) => NativeTypeCode::DATE,
            NativeValue::Time(_) => NativeTypeCode::TIME,
            NativeValue::Timestamp(_) => NativeTypeCode::TIMESTAMP,
        }
    }
}

/// Transaction isolation requested when beginning a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    Unspecified,
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_values_widen() {
        assert_eq!(Value::Byte(7).as_i64(), Some(7));
        assert_eq!(Value::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(Value::Int32(1).as_bool(), Some(true));
        assert_eq!(Value::Text("x".into()).as_i64(), None);
    }

    #[test]
    fn option_into_value_maps_none_to_null() {
        let none: Option<i32> = None;
        assert!(Value::from(none).is_null());
        assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
    }

    #[test]
    fn native_value_reports_type_code() {
        assert_eq!(NativeValue::BigInt(1).type_code(), NativeTypeCode::BIGINT);
        assert_eq!(NativeValue::Null.type_code(), NativeTypeCode::NULL);
    }
}
