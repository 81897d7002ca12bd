//! TOML schema files
//!
//! ```toml
//! [[protocol]]
//! name = "Greeting"
//! fields = [{ name = "text", kind = "string" }]
//!
//! [[protocol]]
//! name = "RSSFeedItem"
//! fields = [{ name = "title", kind = "string" }]
//! elements = ["RSSFeedUrl"]
//! ```

use crate::{ProtocolDef, TypeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parsed set of protocol declarations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaFile {
    #[serde(rename = "protocol", default)]
    pub protocols: Vec<ProtocolDef>,
}

impl SchemaFile {
    /// Parse declarations from a TOML string
    pub fn from_toml_str(toml_str: &str) -> TypeResult<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Parse declarations from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> TypeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::TypeError::Schema(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}
