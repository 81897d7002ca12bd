//! # Semantic Types
//!
//! Message schemas ("protocols") and the dynamic payloads that carry them.
//!
//! A protocol is a named structure made of primitive fields and nested
//! elements, where every element is itself a protocol. Payloads are schema-less
//! JSON records; the [`TypeRegistry`] is the authority on their shape and is the
//! only component allowed to build, clone or flatten them.
//!
//! ## Registry Contract
//!
//! The routing engine consumes the registry through five operations:
//!
//! - [`TypeRegistry::get_struct`] - fields and elements of a protocol
//! - [`TypeRegistry::clone_element`] - extract an element of a parent payload as
//!   a standalone payload, `None` when the branch is absent
//! - [`TypeRegistry::create`] - a fresh payload with defaulted fields
//! - [`TypeRegistry::flatten_types`] - the protocol plus every nested element type
//! - [`TypeRegistry::check_payload`] - reject payloads whose fields or elements
//!   do not match the declared shape
//!
//! [`SchemaRegistry`] is the in-memory implementation used by bootstraps and tests.
//!
//! ## Quick Start
//!
//! ```rust
//! use semantic_types::{FieldKind, Payload, ProtocolDef, SchemaRegistry, TypeRegistry};
//!
//! let registry = SchemaRegistry::new();
//! registry.declare(ProtocolDef::new("Url").field("value", FieldKind::String))?;
//! registry.declare(
//!     ProtocolDef::new("FeedItem")
//!         .field("title", FieldKind::String)
//!         .element("Url"),
//! )?;
//!
//! let item = Payload::new()
//!     .with("title", "hello")
//!     .with("Url", serde_json::json!({ "value": "https://example.com" }));
//!
//! let protocol = registry.get_struct("FeedItem")?;
//! let url = registry.clone_element(&item, &protocol.elements()[0]).unwrap();
//! assert_eq!(url.get_str("value"), Some("https://example.com"));
//! # Ok::<(), semantic_types::TypeError>(())
//! ```

pub mod error;
pub mod payload;
pub mod protocol;
pub mod registry;
pub mod schema;

pub use error::{TypeError, TypeResult};
pub use payload::Payload;
pub use protocol::{ElementDef, FieldDef, FieldKind, ProtocolDef};
pub use registry::{FieldPath, SchemaRegistry, TypeRegistry};
pub use schema::SchemaFile;
