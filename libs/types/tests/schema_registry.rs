//! Schema files driving the registry end to end

use semantic_types::{Payload, SchemaRegistry, TypeError, TypeRegistry};
use serde_json::json;

const RSS_SCHEMA: &str = r#"
[[protocol]]
name = "RSSFeedUrl"
fields = [{ name = "value", kind = "string" }]

[[protocol]]
name = "RSSFeedTitle"
fields = [{ name = "value", kind = "string" }]

[[protocol]]
name = "RSSFeedItem"
fields = [{ name = "published", kind = "string" }]
elements = ["RSSFeedUrl", "RSSFeedTitle"]

[[protocol]]
name = "RSSFeedItemRecordset"
fields = [{ name = "rows", kind = "any" }]
"#;

#[test]
fn test_registry_from_toml_schema() {
    let registry = SchemaRegistry::from_toml_str(RSS_SCHEMA).unwrap();

    assert_eq!(registry.len(), 4);
    assert_eq!(
        registry.flatten_types("RSSFeedItem").unwrap(),
        vec!["RSSFeedItem", "RSSFeedUrl", "RSSFeedTitle"]
    );
    assert_eq!(
        registry.protocols_ending_with("Recordset"),
        vec!["RSSFeedItemRecordset"]
    );
}

#[test]
fn test_optional_branch_is_absent_after_clone() {
    let registry = SchemaRegistry::from_toml_str(RSS_SCHEMA).unwrap();
    let item = Payload::from(json!({
        "published": "today",
        "RSSFeedUrl": { "value": "https://feeds.example.com/rss" },
    }));
    let protocol = registry.get_struct("RSSFeedItem").unwrap();

    let cloned: Vec<Option<Payload>> = protocol
        .elements()
        .iter()
        .map(|element| registry.clone_element(&item, element))
        .collect();

    assert_eq!(
        cloned[0].as_ref().and_then(|p| p.get_str("value")),
        Some("https://feeds.example.com/rss")
    );
    assert!(cloned[1].is_none());
}

#[test]
fn test_schema_with_dangling_element_is_rejected() {
    let err = SchemaRegistry::from_toml_str(
        r#"
        [[protocol]]
        name = "Outer"
        elements = ["Inner"]
        "#,
    )
    .unwrap_err();

    assert_eq!(
        err,
        TypeError::UnknownElement {
            protocol: "Outer".to_string(),
            element: "Inner".to_string(),
        }
    );
}

#[test]
fn test_schema_registry_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rss.toml");
    std::fs::write(&path, RSS_SCHEMA).unwrap();

    let registry = SchemaRegistry::from_file(&path).unwrap();
    assert!(registry.contains("RSSFeedTitle"));
}
