//! Protocol schema model
//!
//! A [`ProtocolDef`] is an ordered list of primitive fields plus an ordered list
//! of elements. Each element names another protocol, so a declaration set forms
//! a tree rooted at every top-level protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primitive field kinds a protocol may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Opaque JSON value, no default beyond `null`
    Any,
}

impl FieldKind {
    /// Value a freshly created payload holds for this kind
    pub fn default_value(&self) -> Value {
        match self {
            FieldKind::String => Value::String(String::new()),
            FieldKind::Integer => Value::from(0i64),
            FieldKind::Float => Value::from(0.0f64),
            FieldKind::Boolean => Value::Bool(false),
            FieldKind::Any => Value::Null,
        }
    }

    /// Check whether a JSON value is acceptable for this kind
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Any => true,
        }
    }
}

/// A primitive field of a protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// A nested element; the name is the name of the element's protocol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementDef {
    name: String,
}

impl ElementDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Name of the element, which is also the protocol it refers to
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Named message schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDef {
    name: String,
    #[serde(default)]
    fields: Vec<FieldDef>,
    #[serde(default)]
    elements: Vec<ElementDef>,
}

impl ProtocolDef {
    /// Start a declaration with no fields and no elements
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            elements: Vec::new(),
        }
    }

    /// Append a primitive field
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
        });
        self
    }

    /// Append a nested element referring to another protocol
    pub fn element(mut self, protocol: impl Into<String>) -> Self {
        self.elements.push(ElementDef::new(protocol));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn elements(&self) -> &[ElementDef] {
        &self.elements
    }

    /// Find a field declaration by name
    pub fn find_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// True when the protocol has no nested elements
    pub fn is_leaf(&self) -> bool {
        self.elements.is_empty()
    }
}
