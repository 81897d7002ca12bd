//! Dynamic payload values
//!
//! A [`Payload`] is a JSON object keyed by field or element name. Nested
//! elements are stored as sub-objects under the element's protocol name; a
//! missing key or an explicit `null` means the element is absent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field-keyed record carried by a carrier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    /// Empty record
    pub fn new() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn is_object(&self) -> bool {
        self.0.is_object()
    }

    /// Value of a field, `None` when missing or `null`
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    /// Set a field, turning a non-object payload into an object first
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        if !self.0.is_object() {
            self.0 = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.0 {
            map.insert(field.into(), value.into());
        }
    }

    /// Builder form of [`Payload::set`]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Nested element as a standalone payload, if present
    pub fn element(&self, name: &str) -> Option<Payload> {
        self.get(name)
            .filter(|v| v.is_object())
            .map(|v| Payload(v.clone()))
    }

    /// Store a nested element payload under its protocol name
    pub fn set_element(&mut self, name: impl Into<String>, element: Payload) {
        self.set(name, element.0);
    }

    /// Remove a field or element, returning its previous value
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        match &mut self.0 {
            Value::Object(map) => map.remove(field),
            _ => None,
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        payload.0
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
