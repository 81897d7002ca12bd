//! Carriers: immutable protocol + payload envelopes
//!
//! A carrier created for a composite protocol spawns sub-carriers for each
//! element present in its payload. Sub-carriers point back at the carrier
//! they were cut from and carry a dotted `protocol_path`
//! (`RSSFeedItem.RSSFeedUrl`) naming the nesting level they represent.

use semantic_types::{Payload, ProtocolDef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Unique identifier for a carrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarrierId(Uuid);

impl CarrierId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CarrierId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "carrier-{}", self.0)
    }
}

/// One message instance
#[derive(Debug)]
pub struct Carrier {
    id: CarrierId,
    protocol: Arc<ProtocolDef>,
    protocol_path: String,
    payload: Payload,
    parent: Option<Arc<Carrier>>,
    /// Decomposition depth; 0 for carriers created directly by a sender
    depth: usize,
    created_at: Instant,
}

impl Carrier {
    /// Top-level carrier, optionally linked to a causal parent
    pub fn new(protocol: Arc<ProtocolDef>, payload: Payload, parent: Option<Arc<Carrier>>) -> Self {
        let protocol_path = protocol.name().to_string();
        Self {
            id: CarrierId::new(),
            protocol,
            protocol_path,
            payload,
            parent,
            depth: 0,
            created_at: Instant::now(),
        }
    }

    /// Sub-carrier for one element of `parent`
    pub fn element_of(parent: &Arc<Carrier>, protocol: Arc<ProtocolDef>, payload: Payload) -> Self {
        let protocol_path = format!("{}.{}", parent.protocol_path, protocol.name());
        Self {
            id: CarrierId::new(),
            protocol,
            protocol_path,
            payload,
            parent: Some(Arc::clone(parent)),
            depth: parent.depth + 1,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> CarrierId {
        self.id
    }

    pub fn protocol(&self) -> &Arc<ProtocolDef> {
        &self.protocol
    }

    pub fn protocol_name(&self) -> &str {
        self.protocol.name()
    }

    pub fn protocol_path(&self) -> &str {
        &self.protocol_path
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn parent(&self) -> Option<&Arc<Carrier>> {
        self.parent.as_ref()
    }

    /// False for carriers produced by decomposition
    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Walk the parent chain to the outermost carrier
    pub fn origin(self: &Arc<Self>) -> Arc<Carrier> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.protocol_path, self.id)
    }
}
