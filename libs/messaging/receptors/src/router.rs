//! # Router - Per-Scope Carrier Dispatch
//!
//! Owns the receptors of one scope, the protocol→receiver index, the explicit
//! connection graph and the queue of carriers still waiting for a receiver.
//!
//! ## Dispatch
//!
//! 1. The sender must emit the protocol. The system protocol, system-originated
//!    sends (`from = None`) and privileged senders skip this check.
//! 2. Candidates come from the sender's connections for the carrier's
//!    top-level protocol. If there are none, the protocol index is used
//!    instead (global `*` receivers included).
//! 3. Each candidate is matched against the carrier's flattened type list:
//!    one of its enabled receive entries must name a type in that list and
//!    its qualifier must accept the payload. Root-only entries and edges never
//!    match decomposed carriers.
//! 4. Targets run in registration order, at most once each. With no target a
//!    top-level carrier is queued; sub-carriers are simply not delivered.
//! 5. Composite protocols are then decomposed: every element present in the
//!    payload becomes a sub-carrier routed the same way, recursively.
//!
//! ## Re-entrancy
//!
//! The state lock is never held while receptor code runs, so handlers may
//! emit, register, remove and drain from inside `receive`. Qualifiers are the
//! exception: they run under the lock and must not call back into the router.

use crate::connection::{Connection, ConnectionGraph};
use crate::observer::{DeliveryGate, ImmediateGate, PendingDelivery, RouterObserver};
use crate::queue::{CarrierQueue, QueuedCarrier};
use crate::receptor::{
    EmitProtocol, ReceiveQualifier, Receptor, ReceptorContext, ReceptorId, ReceptorInfo,
};
use crate::{Carrier, ReceptorCatalog, ReceptorError, RouterError, RouterResult};
use parking_lot::Mutex;
use receptor_config::ReceptorConfig;
use semantic_types::{Payload, TypeRegistry};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hook told about every top-level carrier a router accepts
pub(crate) trait CarrierBoundary: Send + Sync {
    fn carrier_emitted(&self, carrier: &Arc<Carrier>);
}

struct ReceptorEntry {
    receptor: Arc<dyn Receptor>,
    name: String,
    enabled: bool,
    hidden: bool,
    emits: Vec<EmitProtocol>,
    receives: Vec<ReceiveQualifier>,
    indexed: bool,
    initialized: bool,
}

impl ReceptorEntry {
    fn new(receptor: Arc<dyn Receptor>) -> Self {
        Self {
            name: receptor.name().to_string(),
            hidden: receptor.is_hidden(),
            emits: receptor.emits(),
            receives: receptor.receives(),
            enabled: true,
            indexed: false,
            initialized: false,
            receptor,
        }
    }

    fn info(&self, id: ReceptorId) -> ReceptorInfo {
        ReceptorInfo {
            id,
            name: self.name.clone(),
            enabled: self.enabled,
            hidden: self.hidden,
            emits: self.emits.clone(),
            receives: self.receives.clone(),
        }
    }

    fn emits_protocol(&self, protocol: &str) -> bool {
        self.emits
            .iter()
            .any(|e| e.enabled && e.protocol == protocol)
    }

    fn listens_to(&self, protocol: &str) -> bool {
        self.receives
            .iter()
            .any(|r| r.enabled && (r.is_wildcard() || r.protocol == protocol))
    }

    /// Whether any enabled receive entry accepts `carrier` through one of
    /// its flattened types
    fn accepts(&self, carrier: &Carrier, flattened: &[String]) -> bool {
        let top_level = carrier.protocol_name();
        flattened.iter().any(|sub| {
            self.receives.iter().any(|entry| {
                entry.enabled
                    && (entry.protocol == *sub || (entry.is_wildcard() && sub == top_level))
                    && (!entry.root_only || carrier.is_root())
                    && entry.qualifies(carrier.payload())
            })
        })
    }
}

fn push_unique(ids: &mut Vec<ReceptorId>, id: ReceptorId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

struct RouterState {
    closed: bool,
    /// Bumped whenever a receiver may have become eligible
    generation: u64,
    receptors: BTreeMap<ReceptorId, ReceptorEntry>,
    protocol_index: HashMap<String, Vec<ReceptorId>>,
    global_receivers: Vec<ReceptorId>,
    connections: ConnectionGraph,
    queue: CarrierQueue,
    observers: Vec<Arc<dyn RouterObserver>>,
    gate: Arc<dyn DeliveryGate>,
    boundary: Option<Arc<dyn CarrierBoundary>>,
}

impl RouterState {
    fn ensure_open(&self, router: &str) -> RouterResult<()> {
        if self.closed {
            return Err(RouterError::Closed(router.to_string()));
        }
        Ok(())
    }

    fn entry(&self, id: ReceptorId) -> RouterResult<&ReceptorEntry> {
        self.receptors
            .get(&id)
            .ok_or(RouterError::UnknownReceptor(id))
    }

    fn entry_mut(&mut self, id: ReceptorId) -> RouterResult<&mut ReceptorEntry> {
        self.receptors
            .get_mut(&id)
            .ok_or(RouterError::UnknownReceptor(id))
    }

    fn index_receptor(&mut self, id: ReceptorId) {
        let Some(entry) = self.receptors.get_mut(&id) else {
            return;
        };
        entry.indexed = true;
        self.generation += 1;
        let protocols: Vec<String> = entry.receives.iter().map(|r| r.protocol.clone()).collect();

        for protocol in protocols {
            if protocol == crate::WILDCARD {
                for bucket in self.protocol_index.values_mut() {
                    push_unique(bucket, id);
                }
                push_unique(&mut self.global_receivers, id);
            } else {
                let globals = &self.global_receivers;
                let bucket = self
                    .protocol_index
                    .entry(protocol)
                    .or_insert_with(|| globals.clone());
                push_unique(bucket, id);
            }
        }
    }

    fn unindex_receptor(&mut self, id: ReceptorId) {
        for bucket in self.protocol_index.values_mut() {
            bucket.retain(|r| *r != id);
        }
        self.global_receivers.retain(|r| *r != id);
    }

    fn is_eligible(&self, id: ReceptorId, from: Option<ReceptorId>) -> bool {
        Some(id) != from && self.receptors.get(&id).is_some_and(|e| e.enabled)
    }

    fn resolve_targets(
        &self,
        from: Option<ReceptorId>,
        carrier: &Carrier,
        flattened: &[String],
    ) -> Vec<ReceptorId> {
        let protocol = carrier.protocol_name();
        let mut candidates = Vec::new();

        if let Some(sender) = from {
            for connection in self.connections.outgoing(sender) {
                if connection.carries(protocol, carrier.is_root())
                    && self.is_eligible(connection.to, from)
                {
                    push_unique(&mut candidates, connection.to);
                }
            }
        }

        if candidates.is_empty() {
            let bucket = self
                .protocol_index
                .get(protocol)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for id in bucket.iter().chain(self.global_receivers.iter()) {
                let listens = self
                    .receptors
                    .get(id)
                    .is_some_and(|e| e.listens_to(protocol));
                if listens && self.is_eligible(*id, from) {
                    push_unique(&mut candidates, *id);
                }
            }
        }

        candidates.sort();
        candidates.retain(|id| {
            self.receptors
                .get(id)
                .is_some_and(|e| e.accepts(carrier, flattened))
        });
        candidates
    }
}

#[derive(Debug, Default)]
struct RouterMetrics {
    carriers_created: AtomicU64,
    carriers_dispatched: AtomicU64,
    carriers_queued: AtomicU64,
    deliveries: AtomicU64,
    evicted: AtomicU64,
    expired: AtomicU64,
    handler_failures: AtomicU64,
}

impl RouterMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Router counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub receptors: usize,
    pub queued: usize,
    pub connections: usize,
    pub carriers_created: u64,
    pub carriers_dispatched: u64,
    pub carriers_queued: u64,
    pub deliveries: u64,
    pub evicted: u64,
    pub expired: u64,
    pub handler_failures: u64,
}

pub(crate) struct RouterInner {
    name: String,
    registry: Arc<dyn TypeRegistry>,
    config: ReceptorConfig,
    state: Mutex<RouterState>,
    metrics: RouterMetrics,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EmitMode {
    /// Queue the carrier when nothing receives it
    Queue,
    /// Drop the carrier when nothing receives it
    IfReceiver,
}

struct Emission {
    carrier: Arc<Carrier>,
    accepted: bool,
}

/// Receptor container for one scope
///
/// Cloning yields another handle to the same router.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<dyn TypeRegistry>,
        config: ReceptorConfig,
    ) -> Self {
        let state = RouterState {
            closed: false,
            generation: 0,
            receptors: BTreeMap::new(),
            protocol_index: HashMap::new(),
            global_receivers: Vec::new(),
            connections: ConnectionGraph::new(),
            queue: CarrierQueue::new(&config.queue),
            observers: Vec::new(),
            gate: Arc::new(ImmediateGate),
            boundary: None,
        };

        Self {
            inner: Arc::new(RouterInner {
                name: name.into(),
                registry,
                config,
                state: Mutex::new(state),
                metrics: RouterMetrics::default(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RouterInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn registry(&self) -> &Arc<dyn TypeRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &ReceptorConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn add_observer(&self, observer: Arc<dyn RouterObserver>) {
        self.inner.state.lock().observers.push(observer);
    }

    /// Replace the gate deliveries to non-hidden receptors pass through
    pub fn set_delivery_gate(&self, gate: Arc<dyn DeliveryGate>) {
        self.inner.state.lock().gate = gate;
    }

    pub(crate) fn set_boundary(&self, boundary: Option<Arc<dyn CarrierBoundary>>) {
        self.inner.state.lock().boundary = boundary;
    }

    // ---- Registration ----

    /// Register a receptor. It is not routable until [`Router::load_receptors`].
    pub fn register_receptor(&self, receptor: Arc<dyn Receptor>) -> RouterResult<ReceptorId> {
        let entry = ReceptorEntry::new(receptor);
        let mut state = self.inner.state.lock();
        state.ensure_open(&self.inner.name)?;

        let id = ReceptorId::next();
        debug!(router = %self.inner.name, receptor = %entry.name, id = %id, "Registered receptor");
        state.receptors.insert(id, entry);
        Ok(id)
    }

    /// Register a receptor built by a catalog factory
    pub fn register_from_catalog(
        &self,
        name: &str,
        factory_ref: &str,
        catalog: &ReceptorCatalog,
    ) -> RouterResult<ReceptorId> {
        let receptor = catalog.create(name, factory_ref)?;
        self.register_receptor(receptor)
    }

    /// Index newly registered receptors, announce them, initialize the
    /// enabled ones and retry the queue
    pub fn load_receptors(&self) -> RouterResult<()> {
        let (added, observers) = {
            let mut state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;

            let ids: Vec<ReceptorId> = state
                .receptors
                .iter()
                .filter(|(_, entry)| !entry.indexed)
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                state.index_receptor(*id);
            }

            let added: Vec<ReceptorInfo> = ids
                .iter()
                .filter_map(|id| state.receptors.get(id).map(|e| e.info(*id)))
                .collect();
            (added, state.observers.clone())
        };

        for receptor in &added {
            info!(router = %self.inner.name, receptor = %receptor.name, id = %receptor.id, "Receptor online");
            for observer in &observers {
                observer.on_new_receptor(receptor);
            }
        }

        for receptor in &added {
            self.initialize_receptor(receptor.id);
        }

        self.process_queued_carriers()?;
        Ok(())
    }

    fn initialize_receptor(&self, id: ReceptorId) {
        let receptor = {
            let mut state = self.inner.state.lock();
            match state.receptors.get_mut(&id) {
                Some(entry) if entry.enabled && entry.indexed && !entry.initialized => {
                    entry.initialized = true;
                    Arc::clone(&entry.receptor)
                }
                _ => return,
            }
        };

        let ctx = ReceptorContext::new(self, id);
        if let Err(err) = receptor.initialize(&ctx) {
            self.report_failure(receptor.name(), "initialize", &err, true);
        }
    }

    /// Terminate and unregister a receptor. Queued carriers it sent are
    /// discarded.
    pub fn remove(&self, id: ReceptorId) -> RouterResult<()> {
        let receptor = {
            let state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;
            Arc::clone(&state.entry(id)?.receptor)
        };

        receptor.terminate();

        let (removed, observers) = {
            let mut state = self.inner.state.lock();
            let Some(entry) = state.receptors.remove(&id) else {
                return Ok(());
            };
            state.unindex_receptor(id);
            let edges = state.connections.remove_receptor(id);
            let purged = state.queue.purge_from(id);
            debug!(router = %self.inner.name, id = %id, edges, purged, "Dropped receptor routes");
            (entry.info(id), state.observers.clone())
        };

        info!(router = %self.inner.name, receptor = %removed.name, id = %id, "Receptor removed");
        for observer in &observers {
            observer.on_receptor_removed(&removed);
        }
        Ok(())
    }

    /// Tell every receptor the applet has finished loading
    pub fn end_system_init(&self) -> RouterResult<()> {
        let receptors: Vec<(ReceptorId, Arc<dyn Receptor>)> = {
            let state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;
            state
                .receptors
                .iter()
                .map(|(id, e)| (*id, Arc::clone(&e.receptor)))
                .collect()
        };

        for (id, receptor) in receptors {
            receptor.end_system_init(&ReceptorContext::new(self, id));
        }
        Ok(())
    }

    // ---- Enable state ----

    pub fn set_enabled(&self, id: ReceptorId, enabled: bool) -> RouterResult<()> {
        let changed = {
            let mut state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;
            let entry = state.entry_mut(id)?;
            let changed = entry.enabled != enabled;
            entry.enabled = enabled;
            if changed && enabled {
                state.generation += 1;
            }
            changed
        };

        if changed {
            debug!(router = %self.inner.name, id = %id, enabled, "Receptor enable state changed");
            if enabled {
                self.initialize_receptor(id);
                self.process_queued_carriers()?;
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self, id: ReceptorId) -> bool {
        self.inner
            .state
            .lock()
            .receptors
            .get(&id)
            .is_some_and(|e| e.enabled)
    }

    /// Toggle every receive entry of `id` for `protocol`
    pub fn set_receive_enabled(
        &self,
        id: ReceptorId,
        protocol: &str,
        enabled: bool,
    ) -> RouterResult<()> {
        {
            let mut state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;
            let entry = state.entry_mut(id)?;
            for receive in entry.receives.iter_mut().filter(|r| r.protocol == protocol) {
                receive.enabled = enabled;
            }
            if enabled {
                state.generation += 1;
            }
        }

        if enabled {
            self.process_queued_carriers()?;
        }
        Ok(())
    }

    pub fn set_emit_enabled(&self, id: ReceptorId, protocol: &str, enabled: bool) -> RouterResult<()> {
        let mut state = self.inner.state.lock();
        state.ensure_open(&self.inner.name)?;
        let entry = state.entry_mut(id)?;
        for emit in entry.emits.iter_mut().filter(|e| e.protocol == protocol) {
            emit.enabled = enabled;
        }
        Ok(())
    }

    /// Re-read the receptor's declared protocol lists and re-index it.
    /// Per-entry enable toggles are replaced by the declared state.
    pub fn refresh_protocols(&self, id: ReceptorId) -> RouterResult<()> {
        {
            let mut state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;
            let entry = state.entry_mut(id)?;
            entry.emits = entry.receptor.emits();
            entry.receives = entry.receptor.receives();
            if entry.indexed {
                state.unindex_receptor(id);
                state.index_receptor(id);
            }
        }

        self.process_queued_carriers()?;
        Ok(())
    }

    // ---- Carrier creation ----

    /// Create and route a carrier. Returns `None` when the sender does not
    /// emit `protocol`; its elements are still decomposed and routed.
    pub fn create_carrier(
        &self,
        from: Option<ReceptorId>,
        protocol: &str,
        payload: Payload,
    ) -> RouterResult<Option<Arc<Carrier>>> {
        self.create_carrier_with(from, protocol, payload, None, true)
    }

    /// [`Router::create_carrier`] with a causal parent and control over
    /// element decomposition
    pub fn create_carrier_with(
        &self,
        from: Option<ReceptorId>,
        protocol: &str,
        payload: Payload,
        parent: Option<Arc<Carrier>>,
        emit_sub_elements: bool,
    ) -> RouterResult<Option<Arc<Carrier>>> {
        let emission = self.emit(
            from,
            protocol,
            payload,
            parent,
            emit_sub_elements,
            EmitMode::Queue,
            true,
        )?;
        Ok(emission.accepted.then_some(emission.carrier))
    }

    /// Deliver only if a receiver exists right now; never queues
    pub fn create_carrier_if_receiver(
        &self,
        from: Option<ReceptorId>,
        protocol: &str,
        payload: Payload,
    ) -> RouterResult<()> {
        self.emit(from, protocol, payload, None, true, EmitMode::IfReceiver, true)?;
        Ok(())
    }

    /// System-originated carrier (`from = None`)
    pub fn create_internal_carrier(&self, protocol: &str, payload: Payload) -> RouterResult<Arc<Carrier>> {
        let emission = self.emit(None, protocol, payload, None, true, EmitMode::Queue, true)?;
        Ok(emission.carrier)
    }

    /// Re-create `carrier` here as a system carrier without telling the
    /// boundary again
    pub(crate) fn inject(&self, carrier: &Arc<Carrier>) -> RouterResult<Arc<Carrier>> {
        let emission = self.emit(
            None,
            carrier.protocol_name(),
            carrier.payload().clone(),
            Some(Arc::clone(carrier)),
            true,
            EmitMode::Queue,
            false,
        )?;
        Ok(emission.carrier)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        from: Option<ReceptorId>,
        protocol: &str,
        payload: Payload,
        parent: Option<Arc<Carrier>>,
        emit_sub_elements: bool,
        mode: EmitMode,
        propagate: bool,
    ) -> RouterResult<Emission> {
        let definition = self.inner.registry.get_struct(protocol)?;
        self.inner.registry.check_payload(protocol, &payload)?;
        let system_protocol = protocol == self.inner.config.router.system_protocol;

        let (bypass, accepted, boundary) = {
            let state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;
            let (bypass, sender_emits) = match from {
                None => (true, true),
                Some(id) => {
                    let entry = state.entry(id)?;
                    (
                        self.inner.config.is_privileged_sender(&entry.name),
                        entry.emits_protocol(protocol),
                    )
                }
            };
            (
                bypass,
                system_protocol || bypass || sender_emits,
                state.boundary.clone(),
            )
        };

        let carrier = Arc::new(Carrier::new(definition, payload, parent));

        if accepted {
            RouterMetrics::bump(&self.inner.metrics.carriers_created);
            match mode {
                EmitMode::Queue => self.process_receptors(from, &carrier)?,
                EmitMode::IfReceiver => {
                    let targets = self.resolve(from, &carrier)?;
                    if !targets.is_empty() {
                        self.dispatch(from, &carrier, targets);
                    }
                }
            }

            if propagate {
                if let Some(boundary) = boundary {
                    boundary.carrier_emitted(&carrier);
                }
            }
        } else {
            debug!(
                router = %self.inner.name,
                protocol = %protocol,
                "Sender does not emit protocol; routing elements only"
            );
        }

        if emit_sub_elements && !system_protocol {
            self.emit_elements(from, &carrier, bypass)?;
        }

        Ok(Emission { carrier, accepted })
    }

    /// Route every element present in `parent`'s payload, depth first
    fn emit_elements(
        &self,
        from: Option<ReceptorId>,
        parent: &Arc<Carrier>,
        bypass: bool,
    ) -> RouterResult<()> {
        for element in parent.protocol().elements() {
            // Absent branch: nothing below it is routed
            let Some(payload) = self.inner.registry.clone_element(parent.payload(), element) else {
                continue;
            };
            let definition = self.inner.registry.get_struct(element.name())?;
            let carrier = Arc::new(Carrier::element_of(parent, definition, payload));

            let emits = bypass || {
                let state = self.inner.state.lock();
                from.and_then(|id| state.receptors.get(&id))
                    .is_some_and(|e| e.emits_protocol(element.name()))
            };

            if emits {
                let targets = self.resolve(from, &carrier)?;
                if !targets.is_empty() {
                    RouterMetrics::bump(&self.inner.metrics.carriers_created);
                    self.dispatch(from, &carrier, targets);
                }
            }

            self.emit_elements(from, &carrier, bypass)?;
        }
        Ok(())
    }

    // ---- Dispatch ----

    fn resolve(&self, from: Option<ReceptorId>, carrier: &Carrier) -> RouterResult<Vec<ReceptorId>> {
        let flattened = self.inner.registry.flatten_types(carrier.protocol_name())?;
        let state = self.inner.state.lock();
        Ok(state.resolve_targets(from, carrier, &flattened))
    }

    /// Receptors that would get `carrier` from `from` right now
    pub fn targets_for(
        &self,
        from: Option<ReceptorId>,
        carrier: &Carrier,
    ) -> RouterResult<Vec<ReceptorId>> {
        self.resolve(from, carrier)
    }

    fn process_receptors(&self, from: Option<ReceptorId>, carrier: &Arc<Carrier>) -> RouterResult<()> {
        let targets = self.resolve(from, carrier)?;
        if targets.is_empty() {
            self.enqueue(from, carrier);
        } else {
            self.dispatch(from, carrier, targets);
        }
        Ok(())
    }

    fn enqueue(&self, from: Option<ReceptorId>, carrier: &Arc<Carrier>) {
        let dropped = {
            let mut state = self.inner.state.lock();
            state
                .queue
                .push(QueuedCarrier::new(from, Arc::clone(carrier)))
        };
        RouterMetrics::bump(&self.inner.metrics.carriers_queued);
        debug!(router = %self.inner.name, protocol = %carrier.protocol_path(), "No receiver; carrier queued");

        if let Some(dropped) = dropped {
            RouterMetrics::bump(&self.inner.metrics.evicted);
            warn!(
                router = %self.inner.name,
                protocol = %dropped.carrier.protocol_path(),
                "Carrier queue full; carrier dropped"
            );
        }
    }

    fn dispatch(&self, from: Option<ReceptorId>, carrier: &Arc<Carrier>, targets: Vec<ReceptorId>) {
        RouterMetrics::bump(&self.inner.metrics.carriers_dispatched);
        debug!(
            router = %self.inner.name,
            protocol = %carrier.protocol_path(),
            targets = targets.len(),
            "Dispatching carrier"
        );

        let observers = self.inner.state.lock().observers.clone();
        for observer in &observers {
            observer.on_new_carrier(from, carrier);
        }

        for target in targets {
            let (hidden, gate) = {
                let state = self.inner.state.lock();
                match state.receptors.get(&target) {
                    Some(entry) if entry.enabled => (entry.hidden, Arc::clone(&state.gate)),
                    _ => {
                        debug!(router = %self.inner.name, id = %target, "Target gone before delivery");
                        continue;
                    }
                }
            };

            if hidden {
                self.deliver(target, carrier);
            } else {
                gate.admit(PendingDelivery {
                    router: Arc::downgrade(&self.inner),
                    from,
                    target,
                    carrier: Arc::clone(carrier),
                });
            }
        }
    }

    /// Invoke one receptor, re-checking that it is still registered and
    /// enabled
    pub(crate) fn deliver(&self, target: ReceptorId, carrier: &Arc<Carrier>) -> bool {
        let receptor = {
            let state = self.inner.state.lock();
            match state.receptors.get(&target) {
                Some(entry) if entry.enabled && !state.closed => Arc::clone(&entry.receptor),
                _ => return false,
            }
        };

        RouterMetrics::bump(&self.inner.metrics.deliveries);
        let ctx = ReceptorContext::new(self, target);
        if let Err(err) = receptor.receive(&ctx, carrier) {
            let is_exception = self.inner.config.router.exception_protocol.as_deref()
                == Some(carrier.protocol_name());
            self.report_failure(receptor.name(), carrier.protocol_path(), &err, !is_exception);
        }
        true
    }

    fn report_failure(&self, receptor: &str, context: &str, err: &ReceptorError, emit: bool) {
        RouterMetrics::bump(&self.inner.metrics.handler_failures);
        warn!(
            router = %self.inner.name,
            receptor = %receptor,
            protocol = %context,
            error = %err,
            "Receptor failed"
        );

        let Some(exception) = self.inner.config.router.exception_protocol.as_deref() else {
            return;
        };
        if !emit || !self.inner.registry.contains(exception) {
            return;
        }

        let payload = Payload::from(json!({
            "receptor": receptor,
            "protocol": context,
            "message": err.to_string(),
        }));
        if let Err(e) = self.create_internal_carrier(exception, payload) {
            warn!(router = %self.inner.name, error = %e, "Failed to emit exception carrier");
        }
    }

    // ---- Queue ----

    /// Retry queued carriers; returns how many were delivered. Entries are
    /// taken out before they run, so none runs twice in a pass. Carriers
    /// queued during a pass wait for the next one. Passes repeat while
    /// handlers keep making receivers eligible, since entries held back by
    /// this pass are invisible to a drain nested inside it.
    pub fn process_queued_carriers(&self) -> RouterResult<usize> {
        let mut delivered = 0;
        loop {
            let (started_at, count) = self.drain_pass()?;
            delivered += count;

            let state = self.inner.state.lock();
            if state.closed || state.generation == started_at {
                return Ok(delivered);
            }
        }
    }

    /// One bounded pass over the queue; returns the generation it started
    /// at and how many entries were delivered
    fn drain_pass(&self) -> RouterResult<(u64, usize)> {
        let (generation, pending, expired) = {
            let mut state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;
            let (pending, expired) = state.queue.take_all();
            (state.generation, pending, expired)
        };

        if !expired.is_empty() {
            self.inner
                .metrics
                .expired
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(router = %self.inner.name, expired = expired.len(), "Expired queued carriers");
        }

        let mut kept = Vec::new();
        let mut delivered = 0;
        for entry in pending {
            if let Some(sender) = entry.from {
                if !self.contains(sender) {
                    continue;
                }
            }

            let targets = match self.resolve(entry.from, &entry.carrier) {
                Ok(targets) => targets,
                Err(e) => {
                    warn!(router = %self.inner.name, error = %e, "Dropping unroutable queued carrier");
                    continue;
                }
            };

            if targets.is_empty() {
                kept.push(entry);
            } else {
                delivered += 1;
                self.dispatch(entry.from, &entry.carrier, targets);
            }
        }

        let dropped = {
            let mut state = self.inner.state.lock();
            if state.closed {
                Vec::new()
            } else {
                state.queue.restore(kept)
            }
        };
        if !dropped.is_empty() {
            self.inner
                .metrics
                .evicted
                .fetch_add(dropped.len() as u64, Ordering::Relaxed);
            warn!(router = %self.inner.name, dropped = dropped.len(), "Carrier queue full; carriers dropped");
        }

        Ok((generation, delivered))
    }

    pub fn queued_carriers(&self) -> Vec<QueuedCarrier> {
        self.inner.state.lock().queue.snapshot()
    }

    // ---- Connections ----

    /// Add an explicit edge; both ends must be registered here
    pub fn connect(&self, connection: Connection) -> RouterResult<bool> {
        let added = {
            let mut state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;
            state.entry(connection.from)?;
            state.entry(connection.to)?;
            let added = state.connections.add(connection);
            if added {
                state.generation += 1;
            }
            added
        };
        if added {
            self.process_queued_carriers()?;
        }
        Ok(added)
    }

    pub fn disconnect(&self, connection: &Connection) -> RouterResult<bool> {
        let mut state = self.inner.state.lock();
        state.ensure_open(&self.inner.name)?;
        Ok(state.connections.remove(connection))
    }

    /// Replace the whole connection graph
    pub fn set_connections<I>(&self, connections: I) -> RouterResult<()>
    where
        I: IntoIterator<Item = Connection>,
    {
        {
            let mut state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;
            state.connections.replace(connections);
            state.generation += 1;
        }
        self.process_queued_carriers()?;
        Ok(())
    }

    /// Rebuild the connection graph from what each receptor emits and what
    /// the others receive. Wildcard entries are not represented.
    pub fn derive_connections(&self) -> RouterResult<usize> {
        let mut state = self.inner.state.lock();
        state.ensure_open(&self.inner.name)?;

        let mut edges = Vec::new();
        for (from, sender) in &state.receptors {
            for emit in sender.emits.iter().filter(|e| e.enabled) {
                for (to, receiver) in &state.receptors {
                    if from == to {
                        continue;
                    }
                    for receive in receiver
                        .receives
                        .iter()
                        .filter(|r| !r.is_wildcard() && r.protocol == emit.protocol)
                    {
                        let mut edge = Connection::new(*from, *to, emit.protocol.clone());
                        edge.root_only = receive.root_only;
                        edges.push(edge);
                    }
                }
            }
        }

        state.connections.replace(edges);
        Ok(state.connections.len())
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.inner.state.lock().connections.all()
    }

    // ---- Introspection ----

    pub fn contains(&self, id: ReceptorId) -> bool {
        self.inner.state.lock().receptors.contains_key(&id)
    }

    /// Registered receptors in registration order
    pub fn receptors(&self) -> Vec<ReceptorInfo> {
        let state = self.inner.state.lock();
        state
            .receptors
            .iter()
            .map(|(id, entry)| entry.info(*id))
            .collect()
    }

    pub fn receptor(&self, id: ReceptorId) -> Option<ReceptorInfo> {
        self.inner
            .state
            .lock()
            .receptors
            .get(&id)
            .map(|e| e.info(id))
    }

    /// First receptor registered under `name`
    pub fn receptor_by_name(&self, name: &str) -> Option<ReceptorInfo> {
        let state = self.inner.state.lock();
        state
            .receptors
            .iter()
            .find(|(_, e)| e.name == name)
            .map(|(id, e)| e.info(*id))
    }

    /// Index bucket for `protocol`
    pub fn protocol_receivers(&self, protocol: &str) -> Vec<ReceptorId> {
        self.inner
            .state
            .lock()
            .protocol_index
            .get(protocol)
            .cloned()
            .unwrap_or_default()
    }

    pub fn global_receivers(&self) -> Vec<ReceptorId> {
        self.inner.state.lock().global_receivers.clone()
    }

    /// Enabled emit protocols across all receptors
    pub fn emitted_protocols(&self) -> BTreeSet<String> {
        let state = self.inner.state.lock();
        state
            .receptors
            .values()
            .flat_map(|e| e.emits.iter().filter(|emit| emit.enabled))
            .map(|emit| emit.protocol.clone())
            .collect()
    }

    /// Concrete receive protocols across all receptors
    pub fn listening_protocols(&self) -> BTreeSet<String> {
        let state = self.inner.state.lock();
        state
            .receptors
            .values()
            .flat_map(|e| e.receives.iter().filter(|r| !r.is_wildcard()))
            .map(|r| r.protocol.clone())
            .collect()
    }

    pub fn stats(&self) -> RouterStats {
        let (receptors, queued, connections) = {
            let state = self.inner.state.lock();
            (
                state.receptors.len(),
                state.queue.len(),
                state.connections.len(),
            )
        };
        let metrics = &self.inner.metrics;

        RouterStats {
            receptors,
            queued,
            connections,
            carriers_created: metrics.carriers_created.load(Ordering::Relaxed),
            carriers_dispatched: metrics.carriers_dispatched.load(Ordering::Relaxed),
            carriers_queued: metrics.carriers_queued.load(Ordering::Relaxed),
            deliveries: metrics.deliveries.load(Ordering::Relaxed),
            evicted: metrics.evicted.load(Ordering::Relaxed),
            expired: metrics.expired.load(Ordering::Relaxed),
            handler_failures: metrics.handler_failures.load(Ordering::Relaxed),
        }
    }

    // ---- Lifecycle ----

    /// Move a receptor to `target` without terminating or announcing it
    pub fn move_receptor_to(&self, id: ReceptorId, target: &Router) -> RouterResult<()> {
        if Arc::ptr_eq(&self.inner, &target.inner) {
            return Ok(());
        }
        target
            .inner
            .state
            .lock()
            .ensure_open(&target.inner.name)?;

        let entry = {
            let mut state = self.inner.state.lock();
            state.ensure_open(&self.inner.name)?;
            let entry = state
                .receptors
                .remove(&id)
                .ok_or(RouterError::UnknownReceptor(id))?;
            state.unindex_receptor(id);
            state.connections.remove_receptor(id);
            state.queue.purge_from(id);
            entry
        };

        {
            let mut state = target.inner.state.lock();
            let indexed = entry.indexed;
            info!(
                from = %self.inner.name,
                to = %target.inner.name,
                receptor = %entry.name,
                "Moved receptor"
            );
            state.receptors.insert(id, entry);
            if indexed {
                state.index_receptor(id);
            }
        }

        target.process_queued_carriers()?;
        Ok(())
    }

    /// Terminate every receptor and clear all routing state
    pub fn reset(&self) -> RouterResult<()> {
        self.inner.state.lock().ensure_open(&self.inner.name)?;
        self.clear(false);
        info!(router = %self.inner.name, "Router reset");
        Ok(())
    }

    /// Reset, then refuse all further operations
    pub fn shutdown(&self) {
        if self.is_closed() {
            return;
        }
        self.clear(true);
        info!(router = %self.inner.name, "Router shut down");
    }

    fn clear(&self, close: bool) {
        let receptors: Vec<Arc<dyn Receptor>> = {
            let state = self.inner.state.lock();
            state
                .receptors
                .values()
                .map(|e| Arc::clone(&e.receptor))
                .collect()
        };

        for receptor in &receptors {
            receptor.terminate();
        }

        let mut state = self.inner.state.lock();
        state.receptors.clear();
        state.protocol_index.clear();
        state.global_receivers.clear();
        state.connections.clear();
        state.queue.clear();
        if close {
            state.closed = true;
            state.boundary = None;
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}
