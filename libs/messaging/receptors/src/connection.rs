//! Explicit from→to routing graph
//!
//! Connections are consulted before the protocol index. Identical
//! `(from, to, protocol)` edges collapse on insert; a pair of receptors may
//! still be joined by several edges for different protocols.

use crate::ReceptorId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Directed, protocol-qualified edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from: ReceptorId,
    pub to: ReceptorId,
    /// Top-level protocol this edge carries
    pub protocol: String,
    /// Edge only fires for carriers that were not produced by decomposition
    pub root_only: bool,
}

impl Connection {
    pub fn new(from: ReceptorId, to: ReceptorId, protocol: impl Into<String>) -> Self {
        Self {
            from,
            to,
            protocol: protocol.into(),
            root_only: false,
        }
    }

    pub fn root_only(mut self) -> Self {
        self.root_only = true;
        self
    }

    /// Whether this edge may carry `protocol` at the given decomposition level
    pub fn carries(&self, protocol: &str, is_root: bool) -> bool {
        self.protocol == protocol && (!self.root_only || is_root)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConnectionGraph {
    outgoing: BTreeMap<ReceptorId, Vec<Connection>>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge; returns false when an identical edge already exists
    pub fn add(&mut self, connection: Connection) -> bool {
        let edges = self.outgoing.entry(connection.from).or_default();
        if edges.contains(&connection) {
            return false;
        }
        edges.push(connection);
        true
    }

    pub fn remove(&mut self, connection: &Connection) -> bool {
        let Some(edges) = self.outgoing.get_mut(&connection.from) else {
            return false;
        };
        let before = edges.len();
        edges.retain(|c| c != connection);
        let removed = edges.len() != before;
        if edges.is_empty() {
            self.outgoing.remove(&connection.from);
        }
        removed
    }

    /// Edges leaving `from`, in insertion order
    pub fn outgoing(&self, from: ReceptorId) -> &[Connection] {
        self.outgoing.get(&from).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop every edge touching `id`; returns how many were removed
    pub fn remove_receptor(&mut self, id: ReceptorId) -> usize {
        let mut removed = self.outgoing.remove(&id).map_or(0, |edges| edges.len());
        for edges in self.outgoing.values_mut() {
            let before = edges.len();
            edges.retain(|c| c.to != id);
            removed += before - edges.len();
        }
        self.outgoing.retain(|_, edges| !edges.is_empty());
        removed
    }

    /// Replace the whole graph
    pub fn replace<I>(&mut self, connections: I)
    where
        I: IntoIterator<Item = Connection>,
    {
        self.outgoing.clear();
        for connection in connections {
            self.add(connection);
        }
    }

    pub fn clear(&mut self) {
        self.outgoing.clear();
    }

    pub fn len(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }

    /// All edges ordered by sender
    pub fn all(&self) -> Vec<Connection> {
        self.outgoing.values().flatten().cloned().collect()
    }
}
