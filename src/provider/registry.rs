use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use super::{BulkInsertProvider, StatementBulkInsertProvider};
use crate::context::{ConnectionIdentity, DbContext};
use crate::error::{Error, Result};

/// Zero-argument constructor for a fresh provider.
pub type ProviderFactory = Arc<dyn Fn() -> Box<dyn BulkInsertProvider> + Send + Sync>;

/// Maps connection identities to provider factories.
///
/// The map lock is held only while the map is read or written. Factories are
/// invoked, and providers bound, after it is released.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ConnectionIdentity, ProviderFactory>>,
    reported_fallbacks: Mutex<HashSet<ConnectionIdentity>>,
}

impl ProviderRegistry {
    /// Create a new empty provider registry.
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            reported_fallbacks: Mutex::new(HashSet::new()),
        }
    }

    /// Create a registry holding the bundled default provider under the
    /// empty key.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_self_identifying(StatementBulkInsertProvider::new);
        registry
    }

    /// Register `factory` under `key`, replacing any existing entry.
    pub fn register<F, P>(&self, key: impl Into<ConnectionIdentity>, factory: F)
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: BulkInsertProvider + 'static,
    {
        self.register_factory(key, Arc::new(move || Box::new(factory()) as Box<dyn BulkInsertProvider>));
    }

    pub fn register_factory(&self, key: impl Into<ConnectionIdentity>, factory: ProviderFactory) {
        let key = key.into();
        debug!("registering bulk insert provider for '{}'", key);
        self.providers.write().insert(key, factory);
    }

    /// Register `factory` under the identifier its providers declare.
    ///
    /// One provider is built and dropped to read that identifier, so the
    /// factory must not have side effects.
    pub fn register_self_identifying<F, P>(&self, factory: F) -> ConnectionIdentity
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: BulkInsertProvider + 'static,
    {
        let key = ConnectionIdentity::new(factory().provider_identifier());
        self.register(key.clone(), factory);
        key
    }

    /// Make `alias` resolve to the factory currently registered under `target`.
    pub fn register_alias(
        &self,
        alias: impl Into<ConnectionIdentity>,
        target: impl Into<ConnectionIdentity>,
    ) -> Result<()> {
        let alias = alias.into();
        let target = target.into();
        let mut providers = self.providers.write();
        let factory = providers
            .get(&target)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(target.clone()))?;
        debug!("registering '{}' as alias of '{}'", alias, target);
        providers.insert(alias, factory);
        Ok(())
    }

    /// Remove the entry under `key`. Returns whether one existed.
    pub fn unregister(&self, key: impl Into<ConnectionIdentity>) -> bool {
        let key = key.into();
        let removed = self.providers.write().remove(&key).is_some();
        if removed {
            debug!("unregistered bulk insert provider for '{}'", key);
        }
        removed
    }

    pub fn contains(&self, key: impl Into<ConnectionIdentity>) -> bool {
        self.providers.read().contains_key(&key.into())
    }

    /// List all registered keys, sorted.
    pub fn list_providers(&self) -> Vec<ConnectionIdentity> {
        let mut keys: Vec<_> = self.providers.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Factory for `identity`, falling back to the one under the empty key.
    pub fn resolve(&self, identity: &ConnectionIdentity) -> Result<ProviderFactory> {
        let (factory, fell_back) = {
            let providers = self.providers.read();
            match providers.get(identity) {
                Some(f) => (f.clone(), false),
                None => match providers.get(&ConnectionIdentity::fallback()) {
                    Some(f) => (f.clone(), true),
                    None => return Err(Error::ProviderNotFound(identity.clone())),
                },
            }
        };
        if fell_back {
            self.report_fallback(identity);
        }
        Ok(factory)
    }

    /// Resolve a provider for `context` and bind it.
    pub fn get_provider(&self, context: Arc<dyn DbContext>) -> Result<Box<dyn BulkInsertProvider>> {
        let identity = context.connection_identity();
        let factory = self.resolve(&identity)?;
        let mut provider = factory();
        provider.set_context(context)?;
        debug!(
            "bound bulk insert provider '{}' for connection '{}'",
            provider.provider_identifier(),
            identity
        );
        Ok(provider)
    }

    fn report_fallback(&self, identity: &ConnectionIdentity) {
        if self.reported_fallbacks.lock().insert(identity.clone()) {
            warn!(
                "no bulk insert provider registered for connection '{}'; using the default provider",
                identity
            );
        } else {
            debug!("using default bulk insert provider for connection '{}'", identity);
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Lazy<ProviderRegistry> = Lazy::new(|| {
    debug!("initializing bulk insert provider registry");
    ProviderRegistry::with_builtins()
});

/// The process-wide registry, populated with the bundled default provider on
/// first access.
pub fn registry() -> &'static ProviderRegistry {
    &REGISTRY
}
