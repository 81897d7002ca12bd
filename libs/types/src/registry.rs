//! Type registry contract and the in-memory schema registry
//!
//! The routing engine never touches payload structure directly. Everything it
//! needs - element extraction during decomposition, the flattened type list
//! used for sub-protocol matching, fresh payload construction - goes through
//! [`TypeRegistry`].

use crate::{ElementDef, FieldKind, Payload, ProtocolDef, SchemaFile, TypeError, TypeResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Schema authority consumed by the router
pub trait TypeRegistry: Send + Sync {
    /// Structure of a declared protocol
    fn get_struct(&self, name: &str) -> TypeResult<Arc<ProtocolDef>>;

    /// Fresh payload for a protocol with every field defaulted and every
    /// element absent
    fn create(&self, name: &str) -> TypeResult<Payload>;

    /// Copy one element of `parent` out as a standalone payload of the
    /// element's protocol. `None` when the element is absent in `parent` or
    /// cannot be cloned; callers treat both as "branch absent".
    fn clone_element(&self, parent: &Payload, element: &ElementDef) -> Option<Payload>;

    /// The protocol itself followed by every nested element type, depth first,
    /// without duplicates
    fn flatten_types(&self, name: &str) -> TypeResult<Vec<String>>;

    /// Check that `payload` has the shape `name` declares: declared fields
    /// hold values of their kind and present elements are records of their
    /// own protocol. Missing fields and elements are fine.
    fn check_payload(&self, name: &str, payload: &Payload) -> TypeResult<()>;

    /// Names of all declared protocols, sorted
    fn protocol_names(&self) -> Vec<String>;

    fn contains(&self, name: &str) -> bool {
        self.get_struct(name).is_ok()
    }

    /// Declared protocols whose name ends with `suffix`
    fn protocols_ending_with(&self, suffix: &str) -> Vec<String> {
        self.protocol_names()
            .into_iter()
            .filter(|name| name.ends_with(suffix))
            .collect()
    }
}

/// Fully-qualified primitive field of a protocol tree
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    /// Dotted path from the root protocol, e.g. `RSSFeedItem.RSSFeedUrl.value`
    pub path: String,
    pub kind: FieldKind,
    /// Only populated by [`SchemaRegistry::field_values`]
    pub value: Option<Value>,
}

impl FieldPath {
    /// Last path segment, the field's own name
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }
}

/// In-memory registry of protocol declarations
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    protocols: RwLock<HashMap<String, Arc<ProtocolDef>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a validated registry from TOML declarations
    pub fn from_toml_str(toml_str: &str) -> TypeResult<Self> {
        let schema = SchemaFile::from_toml_str(toml_str)?;
        Self::from_schema(schema)
    }

    /// Build a validated registry from a TOML schema file
    pub fn from_file<P: AsRef<Path>>(path: P) -> TypeResult<Self> {
        let schema = SchemaFile::from_file(path)?;
        Self::from_schema(schema)
    }

    fn from_schema(schema: SchemaFile) -> TypeResult<Self> {
        let registry = Self::new();
        registry.declare_all(schema.protocols)?;
        registry.validate()?;
        info!(
            protocols = registry.len(),
            "Schema registry loaded"
        );
        Ok(registry)
    }

    /// Declare a protocol; redeclaring an existing name is an error
    pub fn declare(&self, protocol: ProtocolDef) -> TypeResult<()> {
        let mut protocols = self.protocols.write();
        if protocols.contains_key(protocol.name()) {
            return Err(TypeError::DuplicateProtocol(protocol.name().to_string()));
        }
        debug!(protocol = %protocol.name(), "Declared protocol");
        protocols.insert(protocol.name().to_string(), Arc::new(protocol));
        Ok(())
    }

    /// Declare several protocols, stopping at the first duplicate
    pub fn declare_all<I>(&self, protocols: I) -> TypeResult<()>
    where
        I: IntoIterator<Item = ProtocolDef>,
    {
        for protocol in protocols {
            self.declare(protocol)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.protocols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.read().is_empty()
    }

    /// Check that every element refers to a declared protocol and that no
    /// protocol contains itself
    pub fn validate(&self) -> TypeResult<()> {
        let protocols = self.protocols.read();

        for protocol in protocols.values() {
            for element in protocol.elements() {
                if !protocols.contains_key(element.name()) {
                    return Err(TypeError::UnknownElement {
                        protocol: protocol.name().to_string(),
                        element: element.name().to_string(),
                    });
                }
            }
        }

        let mut finished = HashSet::new();
        let mut names: Vec<&String> = protocols.keys().collect();
        names.sort();
        for name in names {
            let mut visiting = Vec::new();
            Self::check_acyclic(&protocols, name, &mut visiting, &mut finished)?;
        }

        Ok(())
    }

    fn check_acyclic(
        protocols: &HashMap<String, Arc<ProtocolDef>>,
        name: &str,
        visiting: &mut Vec<String>,
        finished: &mut HashSet<String>,
    ) -> TypeResult<()> {
        if finished.contains(name) {
            return Ok(());
        }
        if visiting.iter().any(|v| v == name) {
            return Err(TypeError::CyclicProtocol(name.to_string()));
        }

        visiting.push(name.to_string());
        if let Some(protocol) = protocols.get(name) {
            for element in protocol.elements() {
                Self::check_acyclic(protocols, element.name(), visiting, finished)?;
            }
        }
        visiting.pop();
        finished.insert(name.to_string());
        Ok(())
    }

    /// Every primitive field reachable from `name`, as dotted paths
    pub fn field_paths(&self, name: &str) -> TypeResult<Vec<FieldPath>> {
        let mut paths = Vec::new();
        self.collect_fields(name, name, None, &mut Vec::new(), &mut paths)?;
        Ok(paths)
    }

    /// Like [`SchemaRegistry::field_paths`], paired with the values found in
    /// `payload`; absent branches yield `None` values
    pub fn field_values(&self, payload: &Payload, name: &str) -> TypeResult<Vec<FieldPath>> {
        let mut paths = Vec::new();
        self.collect_fields(name, name, Some(payload), &mut Vec::new(), &mut paths)?;
        Ok(paths)
    }

    fn collect_fields(
        &self,
        name: &str,
        prefix: &str,
        payload: Option<&Payload>,
        stack: &mut Vec<String>,
        out: &mut Vec<FieldPath>,
    ) -> TypeResult<()> {
        if stack.iter().any(|s| s == name) {
            return Err(TypeError::CyclicProtocol(name.to_string()));
        }
        let protocol = self.get_struct(name)?;
        stack.push(name.to_string());

        for field in protocol.fields() {
            out.push(FieldPath {
                path: format!("{}.{}", prefix, field.name),
                kind: field.kind,
                value: payload.and_then(|p| p.get(&field.name).cloned()),
            });
        }

        for element in protocol.elements() {
            // Absent branches still contribute their paths, with no values
            let child = payload.map(|p| p.element(element.name()).unwrap_or_default());
            let child_prefix = format!("{}.{}", prefix, element.name());
            self.collect_fields(element.name(), &child_prefix, child.as_ref(), stack, out)?;
        }

        stack.pop();
        Ok(())
    }

    fn copy_structure(&self, source: &Payload, protocol: &ProtocolDef) -> Payload {
        let mut copy = Payload::new();

        for field in protocol.fields() {
            let value = source
                .get(&field.name)
                .cloned()
                .unwrap_or_else(|| field.kind.default_value());
            copy.set(field.name.clone(), value);
        }

        for element in protocol.elements() {
            if let Some(child) = self.clone_element(source, element) {
                copy.set_element(element.name(), child);
            }
        }

        copy
    }

    fn check_shape(&self, name: &str, payload: &Value, stack: &mut Vec<String>) -> TypeResult<()> {
        let invalid = |reason: String| TypeError::InvalidPayload {
            protocol: name.to_string(),
            reason,
        };
        if !payload.is_object() {
            return Err(invalid("payload is not a record".to_string()));
        }
        if stack.iter().any(|s| s == name) {
            return Err(TypeError::CyclicProtocol(name.to_string()));
        }
        let protocol = self.get_struct(name)?;

        for field in protocol.fields() {
            match payload.get(&field.name) {
                Some(value) if !value.is_null() && !field.kind.accepts(value) => {
                    return Err(invalid(format!(
                        "field {} expects {:?}, got {}",
                        field.name, field.kind, value
                    )));
                }
                _ => {}
            }
        }

        stack.push(name.to_string());
        for element in protocol.elements() {
            match payload.get(element.name()) {
                None | Some(Value::Null) => {}
                Some(child) if child.is_object() => {
                    self.check_shape(element.name(), child, stack)?;
                }
                Some(_) => {
                    return Err(invalid(format!("element {} is not a record", element.name())));
                }
            }
        }
        stack.pop();
        Ok(())
    }

    fn flatten_into(&self, name: &str, out: &mut Vec<String>) -> TypeResult<()> {
        if out.iter().any(|n| n == name) {
            return Ok(());
        }
        let protocol = self.get_struct(name)?;
        out.push(name.to_string());
        for element in protocol.elements() {
            self.flatten_into(element.name(), out)?;
        }
        Ok(())
    }
}

impl TypeRegistry for SchemaRegistry {
    fn get_struct(&self, name: &str) -> TypeResult<Arc<ProtocolDef>> {
        self.protocols
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TypeError::UnknownProtocol(name.to_string()))
    }

    fn create(&self, name: &str) -> TypeResult<Payload> {
        let protocol = self.get_struct(name)?;
        let mut payload = Payload::new();
        for field in protocol.fields() {
            payload.set(field.name.clone(), field.kind.default_value());
        }
        Ok(payload)
    }

    fn clone_element(&self, parent: &Payload, element: &ElementDef) -> Option<Payload> {
        let source = parent.element(element.name())?;
        let protocol = self.get_struct(element.name()).ok()?;
        Some(self.copy_structure(&source, &protocol))
    }

    fn flatten_types(&self, name: &str) -> TypeResult<Vec<String>> {
        let mut out = Vec::new();
        self.flatten_into(name, &mut out)?;
        Ok(out)
    }

    fn check_payload(&self, name: &str, payload: &Payload) -> TypeResult<()> {
        self.check_shape(name, payload.as_value(), &mut Vec::new())
    }

    fn protocol_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.protocols.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed_registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .declare_all(vec![
                ProtocolDef::new("Url").field("value", FieldKind::String),
                ProtocolDef::new("Author")
                    .field("name", FieldKind::String)
                    .element("Url"),
                ProtocolDef::new("FeedItem")
                    .field("title", FieldKind::String)
                    .field("rank", FieldKind::Integer)
                    .element("Url")
                    .element("Author"),
            ])
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let registry = feed_registry();
        let err = registry.declare(ProtocolDef::new("Url")).unwrap_err();
        assert_eq!(err, TypeError::DuplicateProtocol("Url".to_string()));
    }

    #[test]
    fn test_unknown_protocol_lookup() {
        let registry = feed_registry();
        assert!(matches!(
            registry.get_struct("Nope"),
            Err(TypeError::UnknownProtocol(_))
        ));
        assert!(!registry.contains("Nope"));
        assert!(registry.contains("Url"));
    }

    #[test]
    fn test_create_defaults_fields_and_leaves_elements_absent() {
        let registry = feed_registry();
        let payload = registry.create("FeedItem").unwrap();

        assert_eq!(payload.get_str("title"), Some(""));
        assert_eq!(payload.get_i64("rank"), Some(0));
        assert!(payload.element("Url").is_none());
    }

    #[test]
    fn test_clone_element_copies_declared_fields_only() {
        let registry = feed_registry();
        let item = Payload::from(json!({
            "title": "t",
            "Url": { "value": "https://a", "extra": 1 },
        }));
        let protocol = registry.get_struct("FeedItem").unwrap();

        let url = registry.clone_element(&item, &protocol.elements()[0]).unwrap();
        assert_eq!(url.get_str("value"), Some("https://a"));
        assert!(url.get("extra").is_none());

        // Author absent in the parent
        assert!(registry.clone_element(&item, &protocol.elements()[1]).is_none());
    }

    #[test]
    fn test_clone_element_recurses_into_nested_elements() {
        let registry = feed_registry();
        let item = Payload::from(json!({
            "Author": { "name": "ann", "Url": { "value": "https://ann" } },
        }));
        let protocol = registry.get_struct("FeedItem").unwrap();

        let author = registry.clone_element(&item, &protocol.elements()[1]).unwrap();
        assert_eq!(author.get_str("name"), Some("ann"));
        assert_eq!(
            author.element("Url").unwrap().get_str("value"),
            Some("https://ann")
        );
    }

    #[test]
    fn test_flatten_types_depth_first_without_duplicates() {
        let registry = feed_registry();
        let flat = registry.flatten_types("FeedItem").unwrap();
        assert_eq!(flat, vec!["FeedItem", "Url", "Author"]);
        assert_eq!(registry.flatten_types("Url").unwrap(), vec!["Url"]);
    }

    #[test]
    fn test_validate_detects_unknown_element() {
        let registry = SchemaRegistry::new();
        registry
            .declare(ProtocolDef::new("Outer").element("Missing"))
            .unwrap();
        assert!(matches!(
            registry.validate(),
            Err(TypeError::UnknownElement { .. })
        ));
    }

    #[test]
    fn test_validate_detects_cycle() {
        let registry = SchemaRegistry::new();
        registry
            .declare_all(vec![
                ProtocolDef::new("A").element("B"),
                ProtocolDef::new("B").element("A"),
            ])
            .unwrap();
        assert!(matches!(
            registry.validate(),
            Err(TypeError::CyclicProtocol(_))
        ));
    }

    #[test]
    fn test_field_paths() {
        let registry = feed_registry();
        let paths: Vec<String> = registry
            .field_paths("FeedItem")
            .unwrap()
            .into_iter()
            .map(|p| p.path)
            .collect();

        assert_eq!(
            paths,
            vec![
                "FeedItem.title",
                "FeedItem.rank",
                "FeedItem.Url.value",
                "FeedItem.Author.name",
                "FeedItem.Author.Url.value",
            ]
        );
    }

    #[test]
    fn test_field_values() {
        let registry = feed_registry();
        let item = Payload::from(json!({ "title": "t", "Url": { "value": "u" } }));
        let values = registry.field_values(&item, "FeedItem").unwrap();

        let url = values.iter().find(|p| p.path == "FeedItem.Url.value").unwrap();
        assert_eq!(url.value, Some(json!("u")));
        assert_eq!(url.name(), "value");

        let author = values.iter().find(|p| p.path == "FeedItem.Author.name").unwrap();
        assert!(author.value.is_none());
    }

    #[test]
    fn test_check_payload_shape() {
        let registry = feed_registry();

        let partial = Payload::from(json!({ "title": "t", "Url": { "value": "u" } }));
        assert!(registry.check_payload("FeedItem", &partial).is_ok());
        assert!(registry.check_payload("FeedItem", &Payload::new()).is_ok());

        let wrong_field = Payload::from(json!({ "rank": "first" }));
        assert!(matches!(
            registry.check_payload("FeedItem", &wrong_field),
            Err(TypeError::InvalidPayload { protocol, .. }) if protocol == "FeedItem"
        ));

        // Nested elements are checked against their own protocol
        let wrong_nested = Payload::from(json!({ "Author": { "Url": { "value": 7 } } }));
        assert!(matches!(
            registry.check_payload("FeedItem", &wrong_nested),
            Err(TypeError::InvalidPayload { protocol, .. }) if protocol == "Url"
        ));

        let scalar_element = Payload::from(json!({ "Url": "https://example.org" }));
        assert!(matches!(
            registry.check_payload("FeedItem", &scalar_element),
            Err(TypeError::InvalidPayload { .. })
        ));
        assert!(matches!(
            registry.check_payload("Url", &Payload::from_value(json!(3))),
            Err(TypeError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_protocols_ending_with() {
        let registry = SchemaRegistry::new();
        registry
            .declare_all(vec![
                ProtocolDef::new("FeedRecordset"),
                ProtocolDef::new("Feed"),
                ProtocolDef::new("UserRecordset"),
            ])
            .unwrap();

        assert_eq!(
            registry.protocols_ending_with("Recordset"),
            vec!["FeedRecordset", "UserRecordset"]
        );
    }
}
