//! Factory lookup for `(name, factory_ref)` registrations
//!
//! Bootstraps describe receptors by a factory reference string; the catalog
//! turns that reference into a constructed receptor.

use crate::{Receptor, RouterError, RouterResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a receptor given the name it is registered under
pub type ReceptorFactory = Arc<dyn Fn(&str) -> Arc<dyn Receptor> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ReceptorCatalog {
    factories: HashMap<String, ReceptorFactory>,
}

impl ReceptorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for `factory_ref`
    pub fn register<F>(&mut self, factory_ref: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Arc<dyn Receptor> + Send + Sync + 'static,
    {
        self.factories.insert(factory_ref.into(), Arc::new(factory));
    }

    pub fn with<F>(mut self, factory_ref: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn Receptor> + Send + Sync + 'static,
    {
        self.register(factory_ref, factory);
        self
    }

    pub fn contains(&self, factory_ref: &str) -> bool {
        self.factories.contains_key(factory_ref)
    }

    /// Registered references, sorted
    pub fn factory_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.factories.keys().cloned().collect();
        refs.sort();
        refs
    }

    pub fn create(&self, name: &str, factory_ref: &str) -> RouterResult<Arc<dyn Receptor>> {
        let factory = self
            .factories
            .get(factory_ref)
            .ok_or_else(|| RouterError::UnknownFactory(factory_ref.to_string()))?;
        Ok(factory(name))
    }
}

impl fmt::Debug for ReceptorCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceptorCatalog")
            .field("factories", &self.factory_refs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FnReceptor;

    #[test]
    fn test_create_by_reference() {
        let catalog = ReceptorCatalog::new().with("receptors::echo", |name| {
            FnReceptor::new(name, |_, _| Ok(()))
                .receiving("Greeting")
                .into_arc()
        });

        let receptor = catalog.create("Echo", "receptors::echo").unwrap();
        assert_eq!(receptor.name(), "Echo");
        assert!(catalog.contains("receptors::echo"));
        assert_eq!(catalog.factory_refs(), vec!["receptors::echo"]);
    }

    #[test]
    fn test_unknown_reference() {
        let catalog = ReceptorCatalog::new();
        assert!(matches!(
            catalog.create("Echo", "missing"),
            Err(RouterError::UnknownFactory(r)) if r == "missing"
        ));
    }
}
