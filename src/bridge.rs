//! Mapping between portable [`DbType`]s and native driver type codes.
//!
//! The table is an ordered registration list and both directions are
//! first-wins. A native code may be the target of several portable types, in
//! which case the first registration owns the native → portable direction (for
//! example `INTEGER` reads back as `Int32`, never `UInt32`). A portable type
//! listed under several native codes writes to the first one, while the later
//! codes still read back as that type (`BINARY` reads as `Binary`).

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::LazyLock;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::SqlBridgeError;
use crate::types::{DbType, IsolationLevel, NativeTypeCode, NativeValue, Value};

/// Converts a portable value into the native representation.
pub type ToNativeFn = fn(&Value) -> Result<NativeValue, SqlBridgeError>;
/// Converts a native value back into a portable one.
pub type ToPortableFn = fn(NativeValue) -> Result<Value, SqlBridgeError>;

/// One row of the registration list.
#[derive(Clone, Copy)]
pub struct Registration {
    pub native: NativeTypeCode,
    pub portable: DbType,
    pub rust_type: Option<&'static str>,
    pub to_native: ToNativeFn,
    pub to_portable: ToPortableFn,
}

const fn reg(
    native: NativeTypeCode,
    portable: DbType,
    rust_type: Option<&'static str>,
    to_native: ToNativeFn,
    to_portable: ToPortableFn,
) -> Registration {
    Registration {
        native,
        portable,
        rust_type,
        to_native,
        to_portable,
    }
}

/// Built-in registrations, in priority order.
pub const BUILTIN_REGISTRATIONS: &[Registration] = &[
    reg(NativeTypeCode::VARCHAR, DbType::AnsiString, Some("String"), text_to_native, native_to_text),
    reg(NativeTypeCode::CHAR, DbType::AnsiStringFixedLength, Some("String"), text_to_native, native_to_text),
    reg(NativeTypeCode::LONGVARBINARY, DbType::Binary, Some("Vec<u8>"), binary_to_native, native_to_binary),
    reg(NativeTypeCode::BINARY, DbType::Binary, Some("Vec<u8>"), binary_to_native, native_to_binary),
    reg(NativeTypeCode::BOOLEAN, DbType::Boolean, Some("bool"), bool_to_native, native_to_bool),
    reg(NativeTypeCode::TINYINT, DbType::Byte, Some("u8"), byte_to_native, native_to_byte),
    reg(NativeTypeCode::DATE, DbType::Date, Some("chrono::NaiveDate"), date_to_native, native_to_date),
    reg(NativeTypeCode::TIMESTAMP, DbType::DateTime, Some("chrono::NaiveDateTime"), timestamp_to_native, native_to_timestamp),
    reg(NativeTypeCode::TIMESTAMP, DbType::DateTime2, Some("chrono::NaiveDateTime"), timestamp_to_native, native_to_timestamp),
    reg(NativeTypeCode::TIMESTAMP, DbType::DateTimeOffset, Some("chrono::DateTime<FixedOffset>"), timestamp_to_native, native_to_timestamp),
    reg(NativeTypeCode::DECIMAL, DbType::Decimal, Some("rust_decimal::Decimal"), decimal_to_native, native_to_decimal),
    reg(NativeTypeCode::DOUBLE, DbType::Double, Some("f64"), double_to_native, native_to_double),
    reg(NativeTypeCode::SMALLINT, DbType::Int16, Some("i16"), int16_to_native, native_to_int16),
    reg(NativeTypeCode::INTEGER, DbType::Int32, Some("i32"), int32_to_native, native_to_int32),
    reg(NativeTypeCode::BIGINT, DbType::Int64, Some("i64"), int64_to_native, native_to_int64),
    reg(NativeTypeCode::SMALLINT, DbType::UInt16, Some("u16"), uint16_to_native, native_to_int16),
    reg(NativeTypeCode::INTEGER, DbType::UInt32, Some("u32"), uint32_to_native, native_to_int32),
    reg(NativeTypeCode::BIGINT, DbType::UInt64, Some("u64"), uint64_to_native, native_to_int64),
    reg(NativeTypeCode::JAVA_OBJECT, DbType::Object, Some("sql_bridge::Value"), natural_to_native, natural_to_portable),
    reg(NativeTypeCode::TINYINT, DbType::SByte, Some("i8"), sbyte_to_native, native_to_byte),
    reg(NativeTypeCode::FLOAT, DbType::Single, Some("f32"), single_to_native, native_to_single),
    reg(NativeTypeCode::NVARCHAR, DbType::String, Some("String"), text_to_native, native_to_text),
    reg(NativeTypeCode::NCHAR, DbType::StringFixedLength, Some("String"), text_to_native, native_to_text),
    reg(NativeTypeCode::TIME, DbType::Time, Some("chrono::NaiveTime"), time_to_native, native_to_time),
    reg(NativeTypeCode::ARRAY, DbType::VarNumeric, None, natural_to_native, natural_to_portable),
];

static GLOBAL: LazyLock<TypeBridge> = LazyLock::new(TypeBridge::builtin);

/// Bidirectional lookup tables built from a registration list.
pub struct TypeBridge {
    native_to_portable: HashMap<NativeTypeCode, DbType>,
    portable_to_native: HashMap<DbType, NativeTypeCode>,
    rust_types: HashMap<NativeTypeCode, &'static str>,
    to_native: HashMap<DbType, ToNativeFn>,
    to_portable: HashMap<NativeTypeCode, ToPortableFn>,
}

impl std::fmt::Debug for TypeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeBridge")
            .field("portable_types", &self.portable_to_native.len())
            .field("native_codes", &self.native_to_portable.len())
            .finish()
    }
}

impl TypeBridge {
    /// Shared instance built from [`BUILTIN_REGISTRATIONS`].
    #[must_use]
    pub fn global() -> &'static TypeBridge {
        &GLOBAL
    }

    fn builtin() -> Self {
        Self::from_registrations(BUILTIN_REGISTRATIONS)
    }

    /// Build lookup tables from an ordered registration list.
    ///
    /// Each direction is first-wins: a later registration for a portable type
    /// or native code that already has a mapping only fills the direction that
    /// is still empty.
    #[must_use]
    pub fn from_registrations(registrations: &[Registration]) -> Self {
        let mut bridge = TypeBridge {
            native_to_portable: HashMap::new(),
            portable_to_native: HashMap::new(),
            rust_types: HashMap::new(),
            to_native: HashMap::new(),
            to_portable: HashMap::new(),
        };

        for registration in registrations {
            match bridge.portable_to_native.entry(registration.portable) {
                Entry::Occupied(existing) => {
                    debug!(
                        portable = %registration.portable,
                        kept = %existing.get(),
                        ignored = %registration.native,
                        "portable type already mapped"
                    );
                }
                Entry::Vacant(slot) => {
                    slot.insert(registration.native);
                    bridge
                        .to_native
                        .insert(registration.portable, registration.to_native);
                }
            }

            bridge
                .native_to_portable
                .entry(registration.native)
                .or_insert(registration.portable);
            bridge
                .to_portable
                .entry(registration.native)
                .or_insert(registration.to_portable);
            if let Some(name) = registration.rust_type {
                bridge.rust_types.entry(registration.native).or_insert(name);
            }
        }

        bridge
    }

    /// Native type code for a portable type.
    ///
    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if no mapping is registered.
    pub fn to_native(&self, db_type: DbType) -> Result<NativeTypeCode, SqlBridgeError> {
        self.portable_to_native.get(&db_type).copied().ok_or_else(|| {
            SqlBridgeError::UnsupportedType(format!(
                "cannot convert portable type {db_type} to a native type"
            ))
        })
    }

    /// Portable type for a native type code.
    ///
    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if no mapping is registered.
    pub fn to_portable(&self, code: NativeTypeCode) -> Result<DbType, SqlBridgeError> {
        self.native_to_portable.get(&code).copied().ok_or_else(|| {
            SqlBridgeError::UnsupportedType(format!(
                "cannot convert native type {code} to a portable type"
            ))
        })
    }

    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if no converter is registered.
    pub fn converter_to_native(&self, db_type: DbType) -> Result<ToNativeFn, SqlBridgeError> {
        self.to_native.get(&db_type).copied().ok_or_else(|| {
            SqlBridgeError::UnsupportedType(format!(
                "no converter from portable type {db_type} to a native value"
            ))
        })
    }

    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if no converter is registered.
    pub fn converter_to_portable(
        &self,
        code: NativeTypeCode,
    ) -> Result<ToPortableFn, SqlBridgeError> {
        self.to_portable.get(&code).copied().ok_or_else(|| {
            SqlBridgeError::UnsupportedType(format!(
                "no converter from native type {code} to a portable value"
            ))
        })
    }

    /// Rust type a column of the given native code reads back as.
    ///
    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if the code has no Rust type.
    pub fn rust_type_name(&self, code: NativeTypeCode) -> Result<&'static str, SqlBridgeError> {
        self.rust_types.get(&code).copied().ok_or_else(|| {
            SqlBridgeError::UnsupportedType(format!("native type {code} has no Rust type"))
        })
    }

    /// Convert a portable value for binding as `db_type`. NULL passes through.
    ///
    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if the type has no converter
    /// or the value cannot be represented as `db_type`.
    pub fn value_to_native(
        &self,
        db_type: DbType,
        value: &Value,
    ) -> Result<NativeValue, SqlBridgeError> {
        if value.is_null() {
            return Ok(NativeValue::Null);
        }
        (self.converter_to_native(db_type)?)(value)
    }

    /// Convert a native column value reported with `code`. NULL passes through.
    ///
    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if the code has no converter
    /// or the value does not fit the portable type.
    pub fn value_to_portable(
        &self,
        code: NativeTypeCode,
        value: NativeValue,
    ) -> Result<Value, SqlBridgeError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        (self.converter_to_portable(code)?)(value)
    }
}

/// Native isolation code (JDBC numbering) for a portable isolation level.
#[must_use]
pub fn isolation_to_native(level: IsolationLevel) -> i32 {
    match level {
        IsolationLevel::Unspecified => 0,
        IsolationLevel::ReadUncommitted => 1,
        IsolationLevel::ReadCommitted => 2,
        IsolationLevel::RepeatableRead => 4,
        IsolationLevel::Serializable => 8,
    }
}

/// # Errors
/// Returns `SqlBridgeError::UnsupportedType` for an unknown isolation code.
pub fn isolation_from_native(code: i32) -> Result<IsolationLevel, SqlBridgeError> {
    match code {
        0 => Ok(IsolationLevel::Unspecified),
        1 => Ok(IsolationLevel::ReadUncommitted),
        2 => Ok(IsolationLevel::ReadCommitted),
        4 => Ok(IsolationLevel::RepeatableRead),
        8 => Ok(IsolationLevel::Serializable),
        other => Err(SqlBridgeError::UnsupportedType(format!(
            "unsupported transaction isolation code {other}"
        ))),
    }
}

fn to_native_mismatch(value: &Value, target: DbType) -> SqlBridgeError {
    SqlBridgeError::UnsupportedType(format!(
        "cannot convert {} value to {target}",
        value.kind()
    ))
}

fn to_portable_mismatch(value: &NativeValue, target: &str) -> SqlBridgeError {
    SqlBridgeError::UnsupportedType(format!("cannot read native {value:?} as {target}"))
}

fn narrow<T: TryFrom<i64>>(value: &Value, target: DbType) -> Result<T, SqlBridgeError> {
    value
        .as_i64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| to_native_mismatch(value, target))
}

fn native_i64(value: &NativeValue) -> Option<i64> {
    match value {
        NativeValue::TinyInt(v) => Some(i64::from(*v)),
        NativeValue::SmallInt(v) => Some(i64::from(*v)),
        NativeValue::Integer(v) => Some(i64::from(*v)),
        NativeValue::BigInt(v) => Some(*v),
        NativeValue::Boolean(v) => Some(i64::from(*v)),
        _ => None,
    }
}

fn native_f64(value: &NativeValue) -> Option<f64> {
    match value {
        NativeValue::Real(v) => Some(f64::from(*v)),
        NativeValue::Double(v) => Some(*v),
        other => native_i64(other).map(|v| v as f64),
    }
}

fn text_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    match value {
        Value::Text(s) => Ok(NativeValue::Text(s.clone())),
        other => Err(to_native_mismatch(other, DbType::String)),
    }
}

fn binary_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    match value {
        Value::Binary(bytes) => Ok(NativeValue::Bytes(bytes.clone())),
        other => Err(to_native_mismatch(other, DbType::Binary)),
    }
}

fn bool_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    value
        .as_bool()
        .map(NativeValue::Boolean)
        .ok_or_else(|| to_native_mismatch(value, DbType::Boolean))
}

fn byte_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    // Unsigned bytes are stored in the signed native slot bit-for-bit.
    narrow::<u8>(value, DbType::Byte).map(|v| NativeValue::TinyInt(v as i8))
}

fn sbyte_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    narrow::<i8>(value, DbType::SByte).map(NativeValue::TinyInt)
}

fn int16_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    narrow::<i16>(value, DbType::Int16).map(NativeValue::SmallInt)
}

fn int32_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    narrow::<i32>(value, DbType::Int32).map(NativeValue::Integer)
}

fn int64_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    narrow::<i64>(value, DbType::Int64).map(NativeValue::BigInt)
}

fn uint16_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    narrow::<u16>(value, DbType::UInt16).map(|v| NativeValue::SmallInt(v as i16))
}

fn uint32_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    narrow::<u32>(value, DbType::UInt32).map(|v| NativeValue::Integer(v as i32))
}

fn uint64_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    match value {
        Value::UInt64(v) => Ok(NativeValue::BigInt(*v as i64)),
        other => narrow::<u64>(other, DbType::UInt64).map(|v| NativeValue::BigInt(v as i64)),
    }
}

fn single_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    match value {
        Value::Single(v) => Ok(NativeValue::Real(*v)),
        Value::Double(v) => Ok(NativeValue::Real(*v as f32)),
        other => Err(to_native_mismatch(other, DbType::Single)),
    }
}

fn double_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    value
        .as_f64()
        .map(NativeValue::Double)
        .ok_or_else(|| to_native_mismatch(value, DbType::Double))
}

fn decimal_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    match value {
        Value::Decimal(d) => Ok(NativeValue::Decimal(*d)),
        other => other
            .as_i64()
            .map(|v| NativeValue::Decimal(Decimal::from(v)))
            .ok_or_else(|| to_native_mismatch(other, DbType::Decimal)),
    }
}

fn date_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    match value {
        Value::Date(d) => Ok(NativeValue::Date(*d)),
        Value::DateTime(dt) => Ok(NativeValue::Date(dt.date())),
        other => Err(to_native_mismatch(other, DbType::Date)),
    }
}

fn timestamp_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    match value {
        Value::DateTime(dt) => Ok(NativeValue::Timestamp(*dt)),
        Value::DateTimeOffset(dt) => Ok(NativeValue::Timestamp(dt.naive_utc())),
        Value::Date(d) => Ok(NativeValue::Timestamp(d.and_time(chrono::NaiveTime::MIN))),
        other => Err(to_native_mismatch(other, DbType::DateTime)),
    }
}

fn time_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    match value {
        Value::Time(t) => Ok(NativeValue::Time(*t)),
        Value::DateTime(dt) => Ok(NativeValue::Time(dt.time())),
        other => Err(to_native_mismatch(other, DbType::Time)),
    }
}

/// Converter used for `Object`: each value takes its closest native form.
fn natural_to_native(value: &Value) -> Result<NativeValue, SqlBridgeError> {
    Ok(match value {
        Value::Null => NativeValue::Null,
        Value::Bool(v) => NativeValue::Boolean(*v),
        Value::Byte(v) => NativeValue::TinyInt(*v as i8),
        Value::SByte(v) => NativeValue::TinyInt(*v),
        Value::Int16(v) => NativeValue::SmallInt(*v),
        Value::Int32(v) => NativeValue::Integer(*v),
        Value::Int64(v) => NativeValue::BigInt(*v),
        Value::UInt16(v) => NativeValue::SmallInt(*v as i16),
        Value::UInt32(v) => NativeValue::Integer(*v as i32),
        Value::UInt64(v) => NativeValue::BigInt(*v as i64),
        Value::Single(v) => NativeValue::Real(*v),
        Value::Double(v) => NativeValue::Double(*v),
        Value::Decimal(v) => NativeValue::Decimal(*v),
        Value::Text(v) => NativeValue::Text(v.clone()),
        Value::Binary(v) => NativeValue::Bytes(v.clone()),
        Value::Date(v) => NativeValue::Date(*v),
        Value::Time(v) => NativeValue::Time(*v),
        Value::DateTime(v) => NativeValue::Timestamp(*v),
        Value::DateTimeOffset(v) => NativeValue::Timestamp(v.naive_utc()),
    })
}

fn natural_to_portable(value: NativeValue) -> Result<Value, SqlBridgeError> {
    Ok(match value {
        NativeValue::Null => Value::Null,
        NativeValue::Boolean(v) => Value::Bool(v),
        NativeValue::TinyInt(v) => Value::SByte(v),
        NativeValue::SmallInt(v) => Value::Int16(v),
        NativeValue::Integer(v) => Value::Int32(v),
        NativeValue::BigInt(v) => Value::Int64(v),
        NativeValue::Real(v) => Value::Single(v),
        NativeValue::Double(v) => Value::Double(v),
        NativeValue::Decimal(v) => Value::Decimal(v),
        NativeValue::Text(v) => Value::Text(v),
        NativeValue::Bytes(v) => Value::Binary(v),
        NativeValue::Date(v) => Value::Date(v),
        NativeValue::Time(v) => Value::Time(v),
        NativeValue::Timestamp(v) => Value::DateTime(v),
    })
}

fn native_to_text(value: NativeValue) -> Result<Value, SqlBridgeError> {
    match value {
        NativeValue::Text(s) => Ok(Value::Text(s)),
        other => Err(to_portable_mismatch(&other, "text")),
    }
}

fn native_to_binary(value: NativeValue) -> Result<Value, SqlBridgeError> {
    match value {
        NativeValue::Bytes(b) => Ok(Value::Binary(b)),
        NativeValue::Text(s) => Ok(Value::Binary(s.into_bytes())),
        other => Err(to_portable_mismatch(&other, "binary")),
    }
}

fn native_to_bool(value: NativeValue) -> Result<Value, SqlBridgeError> {
    match native_i64(&value) {
        Some(0) => Ok(Value::Bool(false)),
        Some(1) => Ok(Value::Bool(true)),
        _ => Err(to_portable_mismatch(&value, "bool")),
    }
}

fn native_to_byte(value: NativeValue) -> Result<Value, SqlBridgeError> {
    match value {
        NativeValue::TinyInt(v) => Ok(Value::Byte(v as u8)),
        other => native_i64(&other)
            .and_then(|v| u8::try_from(v).ok())
            .map(Value::Byte)
            .ok_or_else(|| to_portable_mismatch(&other, "u8")),
    }
}

fn native_to_int16(value: NativeValue) -> Result<Value, SqlBridgeError> {
    native_i64(&value)
        .and_then(|v| i16::try_from(v).ok())
        .map(Value::Int16)
        .ok_or_else(|| to_portable_mismatch(&value, "i16"))
}

fn native_to_int32(value: NativeValue) -> Result<Value, SqlBridgeError> {
    native_i64(&value)
        .and_then(|v| i32::try_from(v).ok())
        .map(Value::Int32)
        .ok_or_else(|| to_portable_mismatch(&value, "i32"))
}

fn native_to_int64(value: NativeValue) -> Result<Value, SqlBridgeError> {
    native_i64(&value)
        .map(Value::Int64)
        .ok_or_else(|| to_portable_mismatch(&value, "i64"))
}

fn native_to_single(value: NativeValue) -> Result<Value, SqlBridgeError> {
    native_f64(&value)
        .map(|v| Value::Single(v as f32))
        .ok_or_else(|| to_portable_mismatch(&value, "f32"))
}

fn native_to_double(value: NativeValue) -> Result<Value, SqlBridgeError> {
    native_f64(&value)
        .map(Value::Double)
        .ok_or_else(|| to_portable_mismatch(&value, "f64"))
}

fn native_to_decimal(value: NativeValue) -> Result<Value, SqlBridgeError> {
    match value {
        NativeValue::Decimal(d) => Ok(Value::Decimal(d)),
        NativeValue::Text(ref s) => s
            .parse::<Decimal>()
            .map(Value::Decimal)
            .map_err(|_| to_portable_mismatch(&value, "decimal")),
        NativeValue::Double(v) => Decimal::try_from(v)
            .map(Value::Decimal)
            .map_err(|_| to_portable_mismatch(&value, "decimal")),
        other => native_i64(&other)
            .map(|v| Value::Decimal(Decimal::from(v)))
            .ok_or_else(|| to_portable_mismatch(&other, "decimal")),
    }
}

fn native_to_date(value: NativeValue) -> Result<Value, SqlBridgeError> {
    match value {
        NativeValue::Date(d) => Ok(Value::Date(d)),
        NativeValue::Timestamp(dt) => Ok(Value::Date(dt.date())),
        NativeValue::Text(ref s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| to_portable_mismatch(&value, "date")),
        other => Err(to_portable_mismatch(&other, "date")),
    }
}

fn native_to_timestamp(value: NativeValue) -> Result<Value, SqlBridgeError> {
    match value {
        NativeValue::Timestamp(dt) => Ok(Value::DateTime(dt)),
        NativeValue::Date(d) => Ok(Value::DateTime(d.and_time(chrono::NaiveTime::MIN))),
        NativeValue::Text(ref s) => {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .map(Value::DateTime)
                .map_err(|_| to_portable_mismatch(&value, "timestamp"))
        }
        other => Err(to_portable_mismatch(&other, "timestamp")),
    }
}

fn native_to_time(value: NativeValue) -> Result<Value, SqlBridgeError> {
    match value {
        NativeValue::Time(t) => Ok(Value::Time(t)),
        NativeValue::Timestamp(dt) => Ok(Value::Time(dt.time())),
        NativeValue::Text(ref s) => chrono::NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .map(Value::Time)
            .map_err(|_| to_portable_mismatch(&value, "time")),
        other => Err(to_portable_mismatch(&other, "time")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Portable types intentionally listed under more than one native code.
    const PORTABLE_ALIASES: &[DbType] = &[DbType::Binary];

    #[test]
    fn only_known_aliases_repeat_a_portable_type() {
        let mut seen = std::collections::HashSet::new();
        let repeated: Vec<DbType> = BUILTIN_REGISTRATIONS
            .iter()
            .filter(|r| !seen.insert(r.portable))
            .map(|r| r.portable)
            .collect();
        assert_eq!(repeated, PORTABLE_ALIASES);
    }

    #[test]
    fn repeated_portable_registration_keeps_the_first() {
        let mut second = BUILTIN_REGISTRATIONS[0];
        second.native = NativeTypeCode::NVARCHAR;
        let bridge = TypeBridge::from_registrations(&[BUILTIN_REGISTRATIONS[0], second]);
        assert_eq!(bridge.to_native(DbType::AnsiString).unwrap(), NativeTypeCode::VARCHAR);
        assert_eq!(bridge.to_portable(NativeTypeCode::NVARCHAR).unwrap(), DbType::AnsiString);
    }

    #[test]
    fn global_bridge_serves_binary_in_both_directions() {
        let bridge = TypeBridge::global();
        assert_eq!(bridge.to_portable(NativeTypeCode::BINARY).unwrap(), DbType::Binary);
        let value = bridge
            .value_to_portable(NativeTypeCode::BINARY, NativeValue::Bytes(vec![1, 2]))
            .unwrap();
        assert_eq!(value, Value::Binary(vec![1, 2]));
    }

    #[test]
    fn first_registration_owns_the_native_slot() {
        let bridge = TypeBridge::global();
        assert_eq!(bridge.to_native(DbType::UInt32).unwrap(), NativeTypeCode::INTEGER);
        assert_eq!(bridge.to_native(DbType::Int32).unwrap(), NativeTypeCode::INTEGER);
        assert_eq!(bridge.to_portable(NativeTypeCode::INTEGER).unwrap(), DbType::Int32);
        assert_eq!(bridge.to_portable(NativeTypeCode::TINYINT).unwrap(), DbType::Byte);
        assert_eq!(bridge.to_portable(NativeTypeCode::TIMESTAMP).unwrap(), DbType::DateTime);
        assert_eq!(bridge.to_portable(NativeTypeCode::LONGVARBINARY).unwrap(), DbType::Binary);
        assert_eq!(bridge.to_native(DbType::Binary).unwrap(), NativeTypeCode::LONGVARBINARY);
    }

    #[test]
    fn unregistered_types_are_unsupported() {
        let bridge = TypeBridge::global();
        assert!(matches!(
            bridge.to_native(DbType::Guid),
            Err(SqlBridgeError::UnsupportedType(_))
        ));
        assert!(matches!(
            bridge.to_portable(NativeTypeCode(1111)),
            Err(SqlBridgeError::UnsupportedType(_))
        ));
        assert!(bridge.converter_to_native(DbType::Currency).is_err());
        assert!(bridge.rust_type_name(NativeTypeCode::ARRAY).is_err());
    }

    #[test]
    fn unsigned_values_wrap_into_signed_native_slots() {
        let bridge = TypeBridge::global();
        let native = bridge
            .value_to_native(DbType::UInt32, &Value::UInt32(u32::MAX))
            .unwrap();
        assert_eq!(native, NativeValue::Integer(-1));
        let native = bridge.value_to_native(DbType::Byte, &Value::Byte(200)).unwrap();
        assert_eq!(native, NativeValue::TinyInt(200u8 as i8));
        assert_eq!(
            bridge
                .value_to_portable(NativeTypeCode::TINYINT, native)
                .unwrap(),
            Value::Byte(200)
        );
    }

    #[test]
    fn null_passes_through_both_directions() {
        let bridge = TypeBridge::global();
        assert_eq!(
            bridge.value_to_native(DbType::Int32, &Value::Null).unwrap(),
            NativeValue::Null
        );
        assert_eq!(
            bridge
                .value_to_portable(NativeTypeCode::VARCHAR, NativeValue::Null)
                .unwrap(),
            Value::Null
        );
    }

    #[test]
    fn mismatched_value_is_rejected() {
        let bridge = TypeBridge::global();
        let err = bridge
            .value_to_native(DbType::Int16, &Value::Text("abc".into()))
            .unwrap_err();
        assert!(matches!(err, SqlBridgeError::UnsupportedType(_)));
        assert!(bridge
            .value_to_native(DbType::Int16, &Value::Int64(70_000))
            .is_err());
    }

    #[test]
    fn integer_columns_accept_wider_native_values() {
        let bridge = TypeBridge::global();
        assert_eq!(
            bridge
                .value_to_portable(NativeTypeCode::INTEGER, NativeValue::BigInt(42))
                .unwrap(),
            Value::Int32(42)
        );
        assert_eq!(
            bridge
                .value_to_portable(NativeTypeCode::BOOLEAN, NativeValue::BigInt(1))
                .unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn isolation_codes_round_trip() {
        for level in [
            IsolationLevel::Unspecified,
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
        ] {
            assert_eq!(isolation_from_native(isolation_to_native(level)).unwrap(), level);
        }
        assert!(isolation_from_native(3).is_err());
    }
}
