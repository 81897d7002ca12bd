//! Error types for schema declaration and registry lookups

use thiserror::Error;

/// Errors raised by the type registry
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    /// Lookup of a protocol that was never declared
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// A protocol with the same name is already declared
    #[error("Protocol {0} is already declared")]
    DuplicateProtocol(String),

    /// An element references a protocol that is not declared
    #[error("Protocol {protocol} references undeclared element {element}")]
    UnknownElement { protocol: String, element: String },

    /// A protocol contains itself through its elements
    #[error("Protocol {0} contains itself through its elements")]
    CyclicProtocol(String),

    /// Payload does not have the shape the protocol requires
    #[error("Invalid payload for {protocol}: {reason}")]
    InvalidPayload { protocol: String, reason: String },

    /// Schema file could not be parsed
    #[error("Schema error: {0}")]
    Schema(String),
}

impl From<toml::de::Error> for TypeError {
    fn from(err: toml::de::Error) -> Self {
        TypeError::Schema(err.to_string())
    }
}

/// Result type for registry operations
pub type TypeResult<T> = std::result::Result<T, TypeError>;
