//! Provider id → implementation mapping.

use super::Provider;
use crate::error::RegistryError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Registry of available providers.
///
/// Providers are singletons per id. The map is shared between the coordinator
/// and the bridge host, so access is serialized through a mutex.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Mutex<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Fails when the id is taken.
    pub fn register(
        &self,
        id: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Result<(), RegistryError> {
        let id = id.into();
        let mut providers = self.providers();
        if providers.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        debug!(provider = %id, "provider registered");
        providers.insert(id, provider);
        Ok(())
    }

    /// Remove a provider. Returns whether one was registered.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.providers().remove(id).is_some();
        if removed {
            debug!(provider = %id, "provider unregistered");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers().contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.providers().is_empty()
    }

    fn providers(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Provider>>> {
        self.providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;

    fn provider() -> Arc<dyn Provider> {
        Arc::new(ScriptedProvider::new(Vec::new()))
    }

    #[test]
    fn new_registry_is_empty() {
        assert!(ProviderRegistry::new().is_empty());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let registry = ProviderRegistry::new();
        registry.register("probe", provider()).expect("first");
        let err = registry
            .register("probe", provider())
            .expect_err("duplicate must fail");
        assert_eq!(err, RegistryError::Duplicate("probe".into()));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ProviderRegistry::new();
        registry.register("probe", provider()).expect("register");
        assert!(registry.unregister("probe"));
        assert!(!registry.unregister("probe"));
        assert!(!registry.contains("probe"));
        registry
            .register("probe", provider())
            .expect("re-register after removal");
    }

    #[test]
    fn ids_are_sorted() {
        let registry = ProviderRegistry::new();
        registry.register("zeta", provider()).expect("zeta");
        registry.register("alpha", provider()).expect("alpha");
        assert_eq!(registry.ids(), vec!["alpha", "zeta"]);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("beta").is_none());
    }
}
