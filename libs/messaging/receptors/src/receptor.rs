//! Receptor contract
//!
//! A receptor is a named handler that declares which protocols it emits and
//! which it receives. Receive entries can carry a qualifier predicate over
//! the payload and a root-only flag. The router reads these declarations when
//! the receptor is registered (and again on `refresh_protocols`); enabled
//! state lives in the router, not in the receptor.

use crate::{Carrier, ReceptorResult, Router, RouterResult};
use semantic_types::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receive entry that matches every protocol
pub const WILDCARD: &str = "*";

static NEXT_RECEPTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide receptor identifier; allocation order is registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReceptorId(u64);

impl ReceptorId {
    pub(crate) fn next() -> Self {
        Self(NEXT_RECEPTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReceptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "receptor-{}", self.0)
    }
}

/// Payload predicate attached to a receive entry
pub type Qualifier = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// One entry of a receptor's receive list
#[derive(Clone)]
pub struct ReceiveQualifier {
    pub protocol: String,
    pub root_only: bool,
    pub enabled: bool,
    qualifier: Option<Qualifier>,
}

impl ReceiveQualifier {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            root_only: false,
            enabled: true,
            qualifier: None,
        }
    }

    /// Entry matching every protocol
    pub fn wildcard() -> Self {
        Self::new(WILDCARD)
    }

    pub fn qualified<F>(mut self, qualifier: F) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.qualifier = Some(Arc::new(qualifier));
        self
    }

    /// Only match carriers that were not produced by decomposition
    pub fn root_only(mut self) -> Self {
        self.root_only = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.protocol == WILDCARD
    }

    /// Evaluate the qualifier; unqualified entries accept everything
    pub fn qualifies(&self, payload: &Payload) -> bool {
        self.qualifier.as_ref().map_or(true, |q| q(payload))
    }
}

impl fmt::Debug for ReceiveQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveQualifier")
            .field("protocol", &self.protocol)
            .field("root_only", &self.root_only)
            .field("enabled", &self.enabled)
            .field("qualified", &self.qualifier.is_some())
            .finish()
    }
}

impl From<&str> for ReceiveQualifier {
    fn from(protocol: &str) -> Self {
        Self::new(protocol)
    }
}

impl From<String> for ReceiveQualifier {
    fn from(protocol: String) -> Self {
        Self::new(protocol)
    }
}

/// One entry of a receptor's emit list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitProtocol {
    pub protocol: String,
    pub enabled: bool,
}

impl EmitProtocol {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            enabled: true,
        }
    }
}

impl From<&str> for EmitProtocol {
    fn from(protocol: &str) -> Self {
        Self::new(protocol)
    }
}

/// Handle passed to receptor callbacks for emitting back into the router
/// that invoked them
pub struct ReceptorContext<'a> {
    router: &'a Router,
    id: ReceptorId,
}

impl<'a> ReceptorContext<'a> {
    pub(crate) fn new(router: &'a Router, id: ReceptorId) -> Self {
        Self { router, id }
    }

    /// The receptor being called
    pub fn id(&self) -> ReceptorId {
        self.id
    }

    pub fn router(&self) -> &Router {
        self.router
    }

    /// Emit a carrier as this receptor
    pub fn create_carrier(
        &self,
        protocol: &str,
        payload: Payload,
    ) -> RouterResult<Option<Arc<Carrier>>> {
        self.router.create_carrier(Some(self.id), protocol, payload)
    }

    /// Emit a carrier caused by `parent`
    pub fn create_reply(
        &self,
        protocol: &str,
        payload: Payload,
        parent: &Arc<Carrier>,
    ) -> RouterResult<Option<Arc<Carrier>>> {
        self.router
            .create_carrier_with(Some(self.id), protocol, payload, Some(Arc::clone(parent)), true)
    }

    /// Emit only if something would receive it right now
    pub fn create_carrier_if_receiver(&self, protocol: &str, payload: Payload) -> RouterResult<()> {
        self.router
            .create_carrier_if_receiver(Some(self.id), protocol, payload)
    }
}

/// Message handler hosted by a [`Router`]
///
/// Implementations use interior mutability for their own state; the router
/// only ever holds them behind `Arc<dyn Receptor>`.
pub trait Receptor: Send + Sync {
    fn name(&self) -> &str;

    fn emits(&self) -> Vec<EmitProtocol> {
        Vec::new()
    }

    fn receives(&self) -> Vec<ReceiveQualifier> {
        Vec::new()
    }

    /// Handle one carrier. Errors are isolated to this receptor.
    fn receive(&self, ctx: &ReceptorContext<'_>, carrier: &Arc<Carrier>) -> ReceptorResult;

    /// Called once after the first `load_receptors` that finds this receptor
    /// enabled
    fn initialize(&self, _ctx: &ReceptorContext<'_>) -> ReceptorResult {
        Ok(())
    }

    /// Called when the whole applet has finished loading
    fn end_system_init(&self, _ctx: &ReceptorContext<'_>) {}

    /// Called before removal
    fn terminate(&self) {}

    /// Hidden receptors are never routed through the delivery gate
    fn is_hidden(&self) -> bool {
        false
    }
}

type Handler = dyn Fn(&ReceptorContext<'_>, &Arc<Carrier>) -> ReceptorResult + Send + Sync;
type InitHook = dyn Fn(&ReceptorContext<'_>) -> ReceptorResult + Send + Sync;

/// Closure-backed receptor
///
/// ```rust
/// use receptors::FnReceptor;
///
/// let echo = FnReceptor::new("Echo", |_ctx, carrier| {
///     println!("{}", carrier.payload());
///     Ok(())
/// })
/// .receiving("Greeting");
/// # let _ = echo;
/// ```
pub struct FnReceptor {
    name: String,
    emits: Vec<EmitProtocol>,
    receives: Vec<ReceiveQualifier>,
    hidden: bool,
    handler: Box<Handler>,
    on_initialize: Option<Box<InitHook>>,
}

impl FnReceptor {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ReceptorContext<'_>, &Arc<Carrier>) -> ReceptorResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            emits: Vec::new(),
            receives: Vec::new(),
            hidden: false,
            handler: Box::new(handler),
            on_initialize: None,
        }
    }

    /// Receptor that only emits
    pub fn emitter(name: impl Into<String>) -> Self {
        Self::new(name, |_, _| Ok(()))
    }

    pub fn emitting(mut self, protocol: impl Into<EmitProtocol>) -> Self {
        self.emits.push(protocol.into());
        self
    }

    pub fn receiving(mut self, entry: impl Into<ReceiveQualifier>) -> Self {
        self.receives.push(entry.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn on_initialize<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ReceptorContext<'_>) -> ReceptorResult + Send + Sync + 'static,
    {
        self.on_initialize = Some(Box::new(hook));
        self
    }

    pub fn into_arc(self) -> Arc<dyn Receptor> {
        Arc::new(self)
    }
}

impl Receptor for FnReceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn emits(&self) -> Vec<EmitProtocol> {
        self.emits.clone()
    }

    fn receives(&self) -> Vec<ReceiveQualifier> {
        self.receives.clone()
    }

    fn receive(&self, ctx: &ReceptorContext<'_>, carrier: &Arc<Carrier>) -> ReceptorResult {
        (self.handler)(ctx, carrier)
    }

    fn initialize(&self, ctx: &ReceptorContext<'_>) -> ReceptorResult {
        match &self.on_initialize {
            Some(hook) => hook(ctx),
            None => Ok(()),
        }
    }

    fn is_hidden(&self) -> bool {
        self.hidden
    }
}

/// Snapshot of a registered receptor, handed to observers
#[derive(Debug, Clone)]
pub struct ReceptorInfo {
    pub id: ReceptorId,
    pub name: String,
    pub enabled: bool,
    pub hidden: bool,
    pub emits: Vec<EmitProtocol>,
    pub receives: Vec<ReceiveQualifier>,
}

impl ReceptorInfo {
    /// Enabled emit protocols
    pub fn emitted_protocols(&self) -> impl Iterator<Item = &str> {
        self.emits
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.protocol.as_str())
    }

    pub fn is_global_receiver(&self) -> bool {
        self.receives.iter().any(|r| r.is_wildcard())
    }
}
