//! Observer notifications and the delivery gate
//!
//! Observers are told about receptors coming and going and about every
//! carrier that is dispatched. They must not block. An observer that wants to
//! hold deliveries back (to animate a carrier before its handler runs, say)
//! installs a [`DeliveryGate`] instead of delaying inside a notification.

use crate::router::RouterInner;
use crate::{Carrier, Membrane, ReceptorId, ReceptorInfo, Router};
use std::fmt;
use std::sync::{Arc, Weak};

/// Fire-and-forget notifications from a router or membrane
pub trait RouterObserver: Send + Sync {
    fn on_new_receptor(&self, _receptor: &ReceptorInfo) {}

    /// Called once per dispatched carrier, before any receiver runs
    fn on_new_carrier(&self, _from: Option<ReceptorId>, _carrier: &Arc<Carrier>) {}

    fn on_receptor_removed(&self, _receptor: &ReceptorInfo) {}

    fn on_new_membrane(&self, _membrane: &Membrane) {}
}

/// Decides when a delivery to a non-hidden receptor actually runs
pub trait DeliveryGate: Send + Sync {
    fn admit(&self, delivery: PendingDelivery);
}

/// Runs every delivery as soon as it is admitted
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateGate;

impl DeliveryGate for ImmediateGate {
    fn admit(&self, delivery: PendingDelivery) {
        delivery.deliver();
    }
}

/// A delivery that has been resolved but not yet run
pub struct PendingDelivery {
    pub(crate) router: Weak<RouterInner>,
    pub(crate) from: Option<ReceptorId>,
    pub(crate) target: ReceptorId,
    pub(crate) carrier: Arc<Carrier>,
}

impl PendingDelivery {
    pub fn from(&self) -> Option<ReceptorId> {
        self.from
    }

    pub fn target(&self) -> ReceptorId {
        self.target
    }

    pub fn carrier(&self) -> &Arc<Carrier> {
        &self.carrier
    }

    /// Run the delivery. Returns false when the router is gone or the target
    /// has since been removed or disabled.
    pub fn deliver(self) -> bool {
        match self.router.upgrade() {
            Some(inner) => Router::from_inner(inner).deliver(self.target, &self.carrier),
            None => false,
        }
    }
}

impl fmt::Debug for PendingDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDelivery")
            .field("from", &self.from)
            .field("target", &self.target)
            .field("carrier", &self.carrier.protocol_path())
            .finish()
    }
}
