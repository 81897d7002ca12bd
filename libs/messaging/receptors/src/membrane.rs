//! # Membranes - Nested Receptor Scopes
//!
//! A membrane owns one [`Router`], any number of child membranes and a
//! permeability table keyed by `(protocol, direction)`. A router only ever
//! delivers to its own receptors; carriers reach other membranes by being
//! re-created in their routers as system carriers.
//!
//! ## Crossing rules
//!
//! Every membrane guards its own boundary:
//!
//! - child → parent needs the child's `(protocol, Out)` entry
//! - parent → child needs the child's `(protocol, In)` entry
//!
//! Only the child's entry is read for either hop. The parent's own `In` and
//! `Out` entries guard the parent's boundary with its own parent and play no
//! part in traffic with its children. So a carrier moving between siblings
//! needs `Out` on the sender's membrane and `In` on the receiver's, whatever
//! the shared parent lists. Unlisted entries are closed. Only carriers
//! created directly by a sender cross; their decomposed elements are rebuilt
//! by the receiving router.

use crate::router::CarrierBoundary;
use crate::{
    Carrier, Receptor, ReceptorCatalog, ReceptorId, Router, RouterError, RouterObserver,
    RouterResult,
};
use parking_lot::Mutex;
use receptor_config::ReceptorConfig;
use semantic_types::{Payload, TypeRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Direction of a boundary crossing, seen from the membrane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PermeabilityDirection {
    /// Entering the membrane
    In,
    /// Leaving the membrane
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembraneState {
    Active,
    /// Terminal; every operation returns [`RouterError::Dissolved`]
    Dissolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermeabilityKey {
    pub protocol: String,
    pub direction: PermeabilityDirection,
}

impl PermeabilityKey {
    pub fn new(protocol: impl Into<String>, direction: PermeabilityDirection) -> Self {
        Self {
            protocol: protocol.into(),
            direction,
        }
    }
}

struct MembraneShared {
    state: MembraneState,
    parent: Option<Weak<MembraneInner>>,
    children: Vec<Membrane>,
    permeability: BTreeMap<PermeabilityKey, bool>,
    observers: Vec<Arc<dyn RouterObserver>>,
}

struct MembraneInner {
    name: String,
    router: Router,
    shared: Mutex<MembraneShared>,
}

/// Forwards carriers accepted by a membrane's router into the crossing walk
struct MembraneBoundary {
    membrane: Weak<MembraneInner>,
}

impl CarrierBoundary for MembraneBoundary {
    fn carrier_emitted(&self, carrier: &Arc<Carrier>) {
        if let Some(inner) = self.membrane.upgrade() {
            Membrane { inner }.propagate(carrier);
        }
    }
}

/// Handle to a membrane; clones share the same scope
#[derive(Clone)]
pub struct Membrane {
    inner: Arc<MembraneInner>,
}

impl Membrane {
    /// Top of a new membrane tree
    pub fn root(
        name: impl Into<String>,
        registry: Arc<dyn TypeRegistry>,
        config: ReceptorConfig,
    ) -> Self {
        let membrane = Self::build(name.into(), registry, config, None, Vec::new());
        info!(membrane = %membrane.name(), "Root membrane created");
        membrane
    }

    fn build(
        name: String,
        registry: Arc<dyn TypeRegistry>,
        config: ReceptorConfig,
        parent: Option<Weak<MembraneInner>>,
        observers: Vec<Arc<dyn RouterObserver>>,
    ) -> Self {
        let router = Router::new(name.clone(), registry, config);
        for observer in &observers {
            router.add_observer(Arc::clone(observer));
        }

        let inner = Arc::new(MembraneInner {
            name,
            router,
            shared: Mutex::new(MembraneShared {
                state: MembraneState::Active,
                parent,
                children: Vec::new(),
                permeability: BTreeMap::new(),
                observers,
            }),
        });
        inner.router.set_boundary(Some(Arc::new(MembraneBoundary {
            membrane: Arc::downgrade(&inner),
        })));

        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    pub fn state(&self) -> MembraneState {
        self.inner.shared.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == MembraneState::Active
    }

    fn ensure_active(&self) -> RouterResult<()> {
        match self.state() {
            MembraneState::Active => Ok(()),
            MembraneState::Dissolved => Err(RouterError::Dissolved(self.inner.name.clone())),
        }
    }

    /// Observers are inherited by membranes created below this one
    pub fn add_observer(&self, observer: Arc<dyn RouterObserver>) {
        self.inner.router.add_observer(Arc::clone(&observer));
        self.inner.shared.lock().observers.push(observer);
    }

    // ---- Tree ----

    /// Create a child membrane. Names are unique across the whole tree.
    pub fn create_child(&self, name: impl Into<String>) -> RouterResult<Membrane> {
        self.ensure_active()?;
        let name = name.into();
        if self.tree_root().find(&name).is_some() {
            return Err(RouterError::DuplicateMembrane(name));
        }

        let observers = self.inner.shared.lock().observers.clone();
        let child = Self::build(
            name,
            Arc::clone(self.inner.router.registry()),
            self.inner.router.config().clone(),
            Some(Arc::downgrade(&self.inner)),
            observers.clone(),
        );
        self.inner.shared.lock().children.push(child.clone());

        info!(membrane = %child.name(), parent = %self.name(), "Membrane created");
        for observer in &observers {
            observer.on_new_membrane(&child);
        }
        Ok(child)
    }

    pub fn parent(&self) -> Option<Membrane> {
        let shared = self.inner.shared.lock();
        shared
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Membrane { inner })
    }

    pub fn children(&self) -> Vec<Membrane> {
        self.inner.shared.lock().children.clone()
    }

    /// Outermost membrane of this tree
    pub fn tree_root(&self) -> Membrane {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Depth-first search of this membrane and its descendants
    pub fn find(&self, name: &str) -> Option<Membrane> {
        if self.inner.name == name {
            return Some(self.clone());
        }
        self.children().iter().find_map(|child| child.find(name))
    }

    /// Like [`Membrane::find`], as an error when absent
    pub fn get(&self, name: &str) -> RouterResult<Membrane> {
        self.find(name)
            .ok_or_else(|| RouterError::UnknownMembrane(name.to_string()))
    }

    // ---- Permeability ----

    pub fn set_permeability(
        &self,
        protocol: impl Into<String>,
        direction: PermeabilityDirection,
        permeable: bool,
    ) -> RouterResult<()> {
        self.ensure_active()?;
        let key = PermeabilityKey::new(protocol, direction);
        debug!(membrane = %self.name(), protocol = %key.protocol, ?direction, permeable, "Permeability set");
        self.inner.shared.lock().permeability.insert(key, permeable);
        Ok(())
    }

    /// Unlisted entries are closed
    pub fn is_permeable(&self, protocol: &str, direction: PermeabilityDirection) -> bool {
        self.inner
            .shared
            .lock()
            .permeability
            .get(&PermeabilityKey::new(protocol, direction))
            .copied()
            .unwrap_or(false)
    }

    pub fn permeability(&self) -> BTreeMap<PermeabilityKey, bool> {
        self.inner.shared.lock().permeability.clone()
    }

    /// Add closed entries for every protocol the receptors here emit (`Out`)
    /// or listen to (`In`). Existing entries keep their setting.
    pub fn update_permeability(&self) -> RouterResult<()> {
        self.ensure_active()?;
        let emitted = self.emitted_protocols();
        let listening = self.listening_protocols();

        let mut shared = self.inner.shared.lock();
        for protocol in emitted {
            shared
                .permeability
                .entry(PermeabilityKey::new(protocol, PermeabilityDirection::Out))
                .or_insert(false);
        }
        for protocol in listening {
            shared
                .permeability
                .entry(PermeabilityKey::new(protocol, PermeabilityDirection::In))
                .or_insert(false);
        }
        Ok(())
    }

    pub fn emitted_protocols(&self) -> BTreeSet<String> {
        self.inner.router.emitted_protocols()
    }

    pub fn listening_protocols(&self) -> BTreeSet<String> {
        self.inner.router.listening_protocols()
    }

    // ---- Receptors ----

    pub fn register_receptor(&self, receptor: Arc<dyn Receptor>) -> RouterResult<ReceptorId> {
        self.ensure_active()?;
        self.inner.router.register_receptor(receptor)
    }

    pub fn register_from_catalog(
        &self,
        name: &str,
        factory_ref: &str,
        catalog: &ReceptorCatalog,
    ) -> RouterResult<ReceptorId> {
        self.ensure_active()?;
        self.inner
            .router
            .register_from_catalog(name, factory_ref, catalog)
    }

    pub fn load_receptors(&self) -> RouterResult<()> {
        self.ensure_active()?;
        self.inner.router.load_receptors()
    }

    pub fn remove(&self, id: ReceptorId) -> RouterResult<()> {
        self.ensure_active()?;
        self.inner.router.remove(id)
    }

    pub fn end_system_init(&self) -> RouterResult<()> {
        self.ensure_active()?;
        self.inner.router.end_system_init()
    }

    pub fn process_queued_carriers(&self) -> RouterResult<usize> {
        self.ensure_active()?;
        self.inner.router.process_queued_carriers()
    }

    pub fn move_receptor_to(&self, id: ReceptorId, target: &Membrane) -> RouterResult<()> {
        self.ensure_active()?;
        target.ensure_active()?;
        self.inner.router.move_receptor_to(id, &target.inner.router)
    }

    // ---- Carriers ----

    pub fn create_carrier(
        &self,
        from: Option<ReceptorId>,
        protocol: &str,
        payload: Payload,
    ) -> RouterResult<Option<Arc<Carrier>>> {
        self.ensure_active()?;
        self.inner.router.create_carrier(from, protocol, payload)
    }

    pub fn create_carrier_with(
        &self,
        from: Option<ReceptorId>,
        protocol: &str,
        payload: Payload,
        parent: Option<Arc<Carrier>>,
        emit_sub_elements: bool,
    ) -> RouterResult<Option<Arc<Carrier>>> {
        self.ensure_active()?;
        self.inner
            .router
            .create_carrier_with(from, protocol, payload, parent, emit_sub_elements)
    }

    pub fn create_carrier_if_receiver(
        &self,
        from: Option<ReceptorId>,
        protocol: &str,
        payload: Payload,
    ) -> RouterResult<()> {
        self.ensure_active()?;
        self.inner
            .router
            .create_carrier_if_receiver(from, protocol, payload)
    }

    pub fn create_internal_carrier(
        &self,
        protocol: &str,
        payload: Payload,
    ) -> RouterResult<Arc<Carrier>> {
        self.ensure_active()?;
        self.inner.router.create_internal_carrier(protocol, payload)
    }

    /// Walk outward and inward from this membrane, re-creating `carrier` in
    /// every membrane whose boundary lets it through
    fn propagate(&self, carrier: &Arc<Carrier>) {
        let protocol = carrier.protocol_name();
        let mut visited: HashSet<*const MembraneInner> = HashSet::new();
        visited.insert(Arc::as_ptr(&self.inner));
        let mut work = vec![self.clone()];

        while let Some(current) = work.pop() {
            let mut hops = Vec::new();
            if let Some(parent) = current.parent() {
                if current.is_permeable(protocol, PermeabilityDirection::Out) {
                    hops.push(parent);
                }
            }
            for child in current.children() {
                if child.is_permeable(protocol, PermeabilityDirection::In) {
                    hops.push(child);
                }
            }

            for next in hops {
                if !visited.insert(Arc::as_ptr(&next.inner)) || !next.is_active() {
                    continue;
                }
                match next.inner.router.inject(carrier) {
                    Ok(_) => debug!(
                        from = %current.name(),
                        to = %next.name(),
                        protocol = %protocol,
                        "Carrier crossed membrane"
                    ),
                    Err(e) => debug!(to = %next.name(), error = %e, "Carrier crossing failed"),
                }
                work.push(next);
            }
        }
    }

    // ---- Lifecycle ----

    /// Terminate every receptor and return to an empty registration state
    pub fn reset(&self) -> RouterResult<()> {
        self.ensure_active()?;
        self.inner.router.reset()
    }

    /// Dissolve children, shut the router down and detach from the parent
    pub fn dissolve(&self) -> RouterResult<()> {
        self.ensure_active()?;

        let children = std::mem::take(&mut self.inner.shared.lock().children);
        for child in children {
            child.dissolve()?;
        }

        self.inner.router.shutdown();

        let parent = {
            let mut shared = self.inner.shared.lock();
            shared.state = MembraneState::Dissolved;
            shared.parent.take().and_then(|p| p.upgrade())
        };
        if let Some(parent) = parent {
            parent
                .shared
                .lock()
                .children
                .retain(|c| !Arc::ptr_eq(&c.inner, &self.inner));
        }

        info!(membrane = %self.name(), "Membrane dissolved");
        Ok(())
    }
}

impl fmt::Debug for Membrane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Membrane")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FnReceptor;
    use semantic_types::{FieldKind, ProtocolDef, SchemaRegistry};
    use serde_json::json;

    fn registry() -> Arc<dyn TypeRegistry> {
        let registry = SchemaRegistry::new();
        registry
            .declare(ProtocolDef::new("X").field("n", FieldKind::Integer))
            .unwrap();
        Arc::new(registry)
    }

    fn tree() -> (Membrane, Membrane, Membrane) {
        let root = Membrane::root("root", registry(), ReceptorConfig::default());
        let left = root.create_child("left").unwrap();
        let right = root.create_child("right").unwrap();
        (root, left, right)
    }

    fn counter(membrane: &Membrane) -> Arc<Mutex<usize>> {
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        membrane
            .register_receptor(
                FnReceptor::new("Counter", move |_, _| {
                    *sink.lock() += 1;
                    Ok(())
                })
                .receiving("X")
                .into_arc(),
            )
            .unwrap();
        membrane.load_receptors().unwrap();
        count
    }

    fn send(membrane: &Membrane) {
        let sender = membrane
            .register_receptor(FnReceptor::emitter("Sender").emitting("X").into_arc())
            .unwrap();
        membrane.load_receptors().unwrap();
        membrane
            .create_carrier(Some(sender), "X", Payload::from(json!({"n": 1})))
            .unwrap();
    }

    #[test]
    fn test_parent_entries_do_not_gate_child_traffic() {
        let (root, left, right) = tree();
        let at_root = counter(&root);
        let at_right = counter(&right);

        root.set_permeability("X", PermeabilityDirection::In, false).unwrap();
        root.set_permeability("X", PermeabilityDirection::Out, false).unwrap();
        left.set_permeability("X", PermeabilityDirection::Out, true).unwrap();
        right.set_permeability("X", PermeabilityDirection::In, true).unwrap();

        send(&left);
        assert_eq!(*at_root.lock(), 1);
        assert_eq!(*at_right.lock(), 1);

        // Opening the root's entries does not stand in for a closed child entry
        left.set_permeability("X", PermeabilityDirection::Out, false).unwrap();
        root.set_permeability("X", PermeabilityDirection::In, true).unwrap();
        root.set_permeability("X", PermeabilityDirection::Out, true).unwrap();
        send(&left);
        assert_eq!(*at_root.lock(), 1);
        assert_eq!(*at_right.lock(), 1);
    }

    #[test]
    fn test_tree_navigation() {
        let (root, left, right) = tree();
        let leaf = left.create_child("leaf").unwrap();

        assert_eq!(leaf.tree_root().name(), "root");
        assert_eq!(leaf.parent().unwrap().name(), "left");
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.find("leaf").unwrap().name(), "leaf");
        assert!(right.find("leaf").is_none());
        assert!(matches!(root.get("nope"), Err(RouterError::UnknownMembrane(_))));
    }

    #[test]
    fn test_duplicate_names_rejected_tree_wide() {
        let (_root, left, right) = tree();
        left.create_child("inner").unwrap();
        assert!(matches!(
            right.create_child("inner"),
            Err(RouterError::DuplicateMembrane(_))
        ));
    }

    #[test]
    fn test_permeability_defaults_closed() {
        let (_root, left, _right) = tree();
        assert!(!left.is_permeable("X", PermeabilityDirection::Out));

        left.set_permeability("X", PermeabilityDirection::Out, true).unwrap();
        assert!(left.is_permeable("X", PermeabilityDirection::Out));
        assert!(!left.is_permeable("X", PermeabilityDirection::In));
    }

    #[test]
    fn test_update_permeability_seeds_closed_entries() {
        let (_root, left, _right) = tree();
        left.register_receptor(
            FnReceptor::new("Both", |_, _| Ok(()))
                .emitting("X")
                .receiving("X")
                .into_arc(),
        )
        .unwrap();
        left.set_permeability("X", PermeabilityDirection::Out, true).unwrap();

        left.update_permeability().unwrap();
        let table = left.permeability();

        assert_eq!(table.get(&PermeabilityKey::new("X", PermeabilityDirection::Out)), Some(&true));
        assert_eq!(table.get(&PermeabilityKey::new("X", PermeabilityDirection::In)), Some(&false));
    }

    #[test]
    fn test_child_to_parent_needs_child_out() {
        let (root, left, _) = tree();
        let received = counter(&root);

        send(&left);
        assert_eq!(*received.lock(), 0);

        left.set_permeability("X", PermeabilityDirection::Out, true).unwrap();
        send(&left);
        assert_eq!(*received.lock(), 1);
    }

    #[test]
    fn test_parent_to_child_needs_child_in() {
        let (root, left, _) = tree();
        let received = counter(&left);

        send(&root);
        assert_eq!(*received.lock(), 0);

        left.set_permeability("X", PermeabilityDirection::In, true).unwrap();
        send(&root);
        assert_eq!(*received.lock(), 1);
    }

    #[test]
    fn test_sibling_crossing_needs_both_sides() {
        let (_root, left, right) = tree();
        let received = counter(&right);
        right.set_permeability("X", PermeabilityDirection::In, true).unwrap();

        send(&left);
        assert_eq!(*received.lock(), 0);

        left.set_permeability("X", PermeabilityDirection::Out, true).unwrap();
        send(&left);
        assert_eq!(*received.lock(), 1);
    }

    #[test]
    fn test_dissolve_children_first() {
        let (root, left, _) = tree();
        let leaf = left.create_child("leaf").unwrap();
        let terminated = Arc::new(Mutex::new(Vec::new()));

        struct Tracked(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl Receptor for Tracked {
            fn name(&self) -> &str {
                self.0
            }
            fn receive(
                &self,
                _: &crate::ReceptorContext<'_>,
                _: &Arc<Carrier>,
            ) -> crate::ReceptorResult {
                Ok(())
            }
            fn terminate(&self) {
                self.1.lock().push(self.0);
            }
        }

        left.register_receptor(Arc::new(Tracked("outer", Arc::clone(&terminated))))
            .unwrap();
        leaf.register_receptor(Arc::new(Tracked("inner", Arc::clone(&terminated))))
            .unwrap();

        left.dissolve().unwrap();

        assert_eq!(*terminated.lock(), vec!["inner", "outer"]);
        assert_eq!(left.state(), MembraneState::Dissolved);
        assert_eq!(leaf.state(), MembraneState::Dissolved);
        assert!(root.find("left").is_none());
        assert!(matches!(
            left.create_internal_carrier("X", Payload::new()),
            Err(RouterError::Dissolved(_))
        ));
    }

    #[test]
    fn test_reset_keeps_membrane_active() {
        let (root, _, _) = tree();
        let _ = counter(&root);
        root.reset().unwrap();

        assert!(root.is_active());
        assert!(root.router().receptors().is_empty());
    }

    #[test]
    fn test_move_receptor_between_membranes() {
        let (_root, left, right) = tree();
        let id = left
            .register_receptor(FnReceptor::new("Mover", |_, _| Ok(())).receiving("X").into_arc())
            .unwrap();
        left.load_receptors().unwrap();

        left.move_receptor_to(id, &right).unwrap();
        assert!(!left.router().contains(id));
        assert!(right.router().contains(id));
    }
}
