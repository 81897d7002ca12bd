//! Shared fixtures for receptor integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use receptor_config::ReceptorConfig;
use receptors::{FnReceptor, ReceiveQualifier, Receptor, Router};
use semantic_types::{Payload, SchemaRegistry, TypeRegistry};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const SCHEMA: &str = r#"
[[protocol]]
name = "Greeting"
fields = [{ name = "text", kind = "string" }]

[[protocol]]
name = "Pair"
fields = [{ name = "a", kind = "integer" }, { name = "b", kind = "integer" }]

[[protocol]]
name = "Url"
fields = [{ name = "value", kind = "string" }]

[[protocol]]
name = "Title"
fields = [{ name = "value", kind = "string" }]

[[protocol]]
name = "FeedItem"
fields = [{ name = "published", kind = "string" }]
elements = ["Url", "Title"]

[[protocol]]
name = "Feed"
fields = [{ name = "name", kind = "string" }]
elements = ["FeedItem"]

[[protocol]]
name = "SystemMessage"
fields = [{ name = "text", kind = "string" }]

[[protocol]]
name = "ExceptionMessage"
fields = [
    { name = "receptor", kind = "string" },
    { name = "protocol", kind = "string" },
    { name = "message", kind = "string" },
]
"#;

/// Route test logs through the test writer; respects `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn registry() -> Arc<dyn TypeRegistry> {
    Arc::new(SchemaRegistry::from_toml_str(SCHEMA).unwrap())
}

pub fn router(name: &str) -> Router {
    init_tracing();
    Router::new(name, registry(), ReceptorConfig::default())
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub receptor: String,
    pub path: String,
    pub payload: Payload,
    pub is_root: bool,
}

/// Shared log of every delivery made to recording receptors
#[derive(Clone, Default)]
pub struct Deliveries(Arc<Mutex<Vec<Delivery>>>);

impl Deliveries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receptor that records each carrier it is given
    pub fn receiver<I, Q>(&self, name: &str, entries: I) -> Arc<dyn Receptor>
    where
        I: IntoIterator<Item = Q>,
        Q: Into<ReceiveQualifier>,
    {
        let log = Arc::clone(&self.0);
        let receptor_name = name.to_string();
        let mut receptor = FnReceptor::new(name, move |_, carrier| {
            log.lock().push(Delivery {
                receptor: receptor_name.clone(),
                path: carrier.protocol_path().to_string(),
                payload: carrier.payload().clone(),
                is_root: carrier.is_root(),
            });
            Ok(())
        });
        for entry in entries {
            receptor = receptor.receiving(entry);
        }
        receptor.into_arc()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn all(&self) -> Vec<Delivery> {
        self.0.lock().clone()
    }

    pub fn for_receptor(&self, name: &str) -> Vec<Delivery> {
        self.0
            .lock()
            .iter()
            .filter(|d| d.receptor == name)
            .cloned()
            .collect()
    }

    pub fn paths(&self) -> Vec<String> {
        self.0.lock().iter().map(|d| d.path.clone()).collect()
    }
}

/// Receptor that only emits the given protocols
pub fn emitter(name: &str, protocols: &[&str]) -> Arc<dyn Receptor> {
    protocols
        .iter()
        .fold(FnReceptor::emitter(name), |r, p| r.emitting(*p))
        .into_arc()
}
