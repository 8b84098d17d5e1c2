use std::ops::{Index, IndexMut};

use crate::bridge::TypeBridge;
use crate::error::SqlBridgeError;
use crate::native::NativeStatement;
use crate::types::{DbType, NativeTypeCode, NativeValue, Value};

/// An input parameter of a [`crate::command::Command`].
///
/// The native form of the value is computed on first bind and reused until
/// either the value or the declared type changes.
#[derive(Debug, Clone, Default)]
pub struct Parameter {
    name: Option<String>,
    declared: Option<(DbType, NativeTypeCode)>,
    value: Value,
    native: Option<NativeValue>,
}

impl Parameter {
    /// Unnamed parameter, bound by position.
    pub fn positional(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Named parameter with an explicit portable type.
    ///
    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if `db_type` has no native mapping.
    pub fn typed(
        name: impl Into<String>,
        db_type: DbType,
        value: impl Into<Value>,
    ) -> Result<Self, SqlBridgeError> {
        let mut param = Self::named(name, value);
        param.set_db_type(db_type)?;
        Ok(param)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    /// The declared type, or `Object` when none was declared.
    #[must_use]
    pub fn db_type(&self) -> DbType {
        self.declared.map_or(DbType::Object, |(db_type, _)| db_type)
    }

    #[must_use]
    pub fn is_type_declared(&self) -> bool {
        self.declared.is_some()
    }

    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if `db_type` has no native mapping;
    /// the previous declaration is kept in that case.
    pub fn set_db_type(&mut self, db_type: DbType) -> Result<(), SqlBridgeError> {
        let code = TypeBridge::global().to_native(db_type)?;
        if self.declared != Some((db_type, code)) {
            self.declared = Some((db_type, code));
            self.native = None;
        }
        Ok(())
    }

    /// Forget the declared type; the value is bound untyped again.
    pub fn reset_db_type(&mut self) {
        if self.declared.take().is_some() {
            self.native = None;
        }
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = value.into();
        self.native = None;
    }

    /// Native form of the current value, converted through the declared type.
    ///
    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if the value does not fit the declared type.
    pub fn native_value(&mut self) -> Result<&NativeValue, SqlBridgeError> {
        let native = match self.native.take() {
            Some(native) => native,
            None => TypeBridge::global().value_to_native(self.db_type(), &self.value)?,
        };
        Ok(self.native.insert(native))
    }

    pub(crate) fn bind_to(
        &mut self,
        ordinal: usize,
        statement: &mut dyn NativeStatement,
    ) -> Result<(), SqlBridgeError> {
        let type_code = self.declared.map(|(_, code)| code);
        let native = self.native_value()?.clone();
        statement
            .bind(ordinal, native, type_code)
            .map_err(SqlBridgeError::Execution)
    }
}

/// Ordered parameter list owned by a command.
#[derive(Debug, Clone, Default)]
pub struct ParameterCollection {
    params: Vec<Parameter>,
}

impl ParameterCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter, returning its index.
    pub fn add(&mut self, param: Parameter) -> usize {
        self.params.push(param);
        self.params.len() - 1
    }

    pub fn add_with_value(&mut self, name: impl Into<String>, value: impl Into<Value>) -> usize {
        self.add(Parameter::named(name, value))
    }

    /// # Errors
    /// Returns `SqlBridgeError::UnsupportedType` if `db_type` has no native mapping.
    pub fn add_typed(
        &mut self,
        name: impl Into<String>,
        db_type: DbType,
        value: impl Into<Value>,
    ) -> Result<usize, SqlBridgeError> {
        Ok(self.add(Parameter::typed(name, db_type, value)?))
    }

    /// # Panics
    /// Panics if `index > len`, like [`Vec::insert`].
    pub fn insert(&mut self, index: usize, param: Parameter) {
        self.params.insert(index, param);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Parameter> {
        self.params.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Parameter> {
        self.params.get_mut(index)
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name() == Some(name))
    }

    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name() == Some(name))
    }

    /// Index of the first parameter named `name` (case-sensitive).
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name() == Some(name))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Replace the value of the parameter named `name`.
    ///
    /// # Errors
    /// Returns `SqlBridgeError::MissingParameter` if no parameter has that name.
    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> Result<(), SqlBridgeError> {
        match self.by_name_mut(name) {
            Some(param) => {
                param.set_value(value);
                Ok(())
            }
            None => Err(SqlBridgeError::MissingParameter(name.to_string())),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        self.index_of(name).map(|index| self.params.remove(index))
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Parameter> {
        (index < self.params.len()).then(|| self.params.remove(index))
    }

    pub fn clear(&mut self) {
        self.params.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Parameter> {
        self.params.iter_mut()
    }

    /// Parameter names in declaration order; `None` for positional entries.
    pub(crate) fn names(&self) -> Vec<Option<String>> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }
}

impl Index<usize> for ParameterCollection {
    type Output = Parameter;

    fn index(&self, index: usize) -> &Parameter {
        &self.params[index]
    }
}

impl IndexMut<usize> for ParameterCollection {
    fn index_mut(&mut self, index: usize) -> &mut Parameter {
        &mut self.params[index]
    }
}

impl<'a> IntoIterator for &'a ParameterCollection {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_value_is_cached_until_type_changes() {
        let mut param = Parameter::named("id", 7i32);
        assert_eq!(param.native_value().unwrap(), &NativeValue::Integer(7));

        param.set_db_type(DbType::Int64).unwrap();
        assert_eq!(param.native_value().unwrap(), &NativeValue::BigInt(7));

        param.set_value(8i32);
        assert_eq!(param.native_value().unwrap(), &NativeValue::BigInt(8));

        param.reset_db_type();
        assert_eq!(param.db_type(), DbType::Object);
        assert_eq!(param.native_value().unwrap(), &NativeValue::Integer(8));
    }

    #[test]
    fn unsupported_declared_type_keeps_previous_declaration() {
        let mut param = Parameter::typed("id", DbType::Int16, 1i16).unwrap();
        let err = param.set_db_type(DbType::Guid).unwrap_err();
        assert!(matches!(err, SqlBridgeError::UnsupportedType(_)));
        assert_eq!(param.db_type(), DbType::Int16);
    }

    #[test]
    fn collection_lookups_are_case_sensitive() {
        let mut params = ParameterCollection::new();
        params.add_with_value("x", 1i32);
        params.add_with_value("Y", 2i32);

        assert_eq!(params.index_of("Y"), Some(1));
        assert_eq!(params.index_of("y"), None);
        assert!(params.contains("x"));

        params.set_value("x", 10i32).unwrap();
        assert_eq!(params[0].value(), &Value::Int32(10));
        assert!(matches!(
            params.set_value("missing", 1i32),
            Err(SqlBridgeError::MissingParameter(_))
        ));
    }

    #[test]
    fn collection_remove_and_insert() {
        let mut params = ParameterCollection::new();
        params.add(Parameter::positional(1i32));
        params.add_with_value("b", 2i32);
        params.insert(0, Parameter::named("a", 0i32));

        assert_eq!(params.len(), 3);
        assert_eq!(params.names()[0].as_deref(), Some("a"));
        assert!(params.remove("b").is_some());
        assert!(params.remove_at(5).is_none());
        assert_eq!(params.remove_at(1).map(|p| p.value().clone()), Some(Value::Int32(1)));
        params.clear();
        assert!(params.is_empty());
    }
}
