//! # Receptors - Protocol-Addressed Routing
//!
//! ## Purpose
//!
//! In-process publish/subscribe engine. Receptors declare the protocols they
//! emit and receive; carriers are routed to matching receptors, composite
//! protocols are decomposed so their elements can be routed on their own,
//! carriers with no receiver wait in a bounded queue, and membranes partition
//! receptors into nested scopes with permeability rules at each boundary.
//!
//! ## Architecture Role
//!
//! ```text
//!   Sender ──create_carrier──▶ Router ──resolve──▶ connections / protocol index
//!                                │                         │
//!                                │◀──── targets ───────────┘
//!                                ├──▶ DeliveryGate ──▶ Receptor::receive
//!                                ├──▶ CarrierQueue (no target yet)
//!                                └──▶ Membrane boundary ──▶ parent / child routers
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use receptors::{FnReceptor, Router};
//! use receptor_config::ReceptorConfig;
//! use semantic_types::{FieldKind, Payload, ProtocolDef, SchemaRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let registry = SchemaRegistry::new();
//! registry.declare(ProtocolDef::new("Greeting").field("text", FieldKind::String))?;
//! let router = Router::new("applet", Arc::new(registry), ReceptorConfig::default());
//!
//! let sender = router.register_receptor(FnReceptor::emitter("Sender").emitting("Greeting").into_arc())?;
//! router.register_receptor(
//!     FnReceptor::new("Echo", |_ctx, carrier| {
//!         assert_eq!(carrier.payload().get_str("text"), Some("hi"));
//!         Ok(())
//!     })
//!     .receiving("Greeting")
//!     .into_arc(),
//! )?;
//! router.load_receptors()?;
//!
//! router.create_carrier(Some(sender), "Greeting", Payload::from(json!({"text": "hi"})))?;
//! assert_eq!(router.stats().deliveries, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod carrier;
pub mod catalog;
pub mod connection;
pub mod error;
pub mod membrane;
pub mod observer;
pub mod queue;
pub mod receptor;
pub mod router;

pub use carrier::{Carrier, CarrierId};
pub use catalog::{ReceptorCatalog, ReceptorFactory};
pub use connection::{Connection, ConnectionGraph};
pub use error::{ReceptorError, ReceptorResult, RouterError, RouterResult};
pub use membrane::{Membrane, MembraneState, PermeabilityDirection, PermeabilityKey};
pub use observer::{DeliveryGate, ImmediateGate, PendingDelivery, RouterObserver};
pub use queue::{CarrierQueue, QueuedCarrier};
pub use receptor::{
    EmitProtocol, FnReceptor, Qualifier, ReceiveQualifier, Receptor, ReceptorContext, ReceptorId,
    ReceptorInfo, WILDCARD,
};
pub use router::{Router, RouterStats};
