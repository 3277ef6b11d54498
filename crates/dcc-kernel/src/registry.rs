//! In-process capability registry

use crate::provider::{CapabilityRegistry, HandlerProvider, ProviderListener, ProviderRef};
use crate::types::{ProviderId, SubscriptionId};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

type Subscription = (SubscriptionId, Weak<dyn ProviderListener>);

/// Registry keeping providers in memory and notifying listeners
/// synchronously on the publishing thread.
///
/// No lock is held while listeners run, so listeners may call back into
/// the registry.
pub struct InMemoryRegistry {
    providers: DashMap<ProviderId, ProviderRef>,
    listeners: RwLock<Vec<Subscription>>,
    next_provider: AtomicU64,
    next_subscription: AtomicU64,
}

impl InMemoryRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            next_provider: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Publish a provider and notify listeners
    pub fn register(&self, provider: Arc<dyn HandlerProvider>) -> ProviderRef {
        let id = ProviderId(self.next_provider.fetch_add(1, Ordering::Relaxed));
        let reference = ProviderRef::new(id, provider);
        self.providers.insert(id, reference.clone());

        info!("Provider registered: {} ({})", reference.full_name(), id);

        for listener in self.live_listeners() {
            listener.provider_added(&reference);
        }
        reference
    }

    /// Withdraw a provider and notify listeners
    pub fn unregister(&self, id: ProviderId) -> Option<ProviderRef> {
        let (_, reference) = self.providers.remove(&id)?;

        info!("Provider unregistered: {} ({})", reference.full_name(), id);

        for listener in self.live_listeners() {
            listener.provider_removed(&reference);
        }
        Some(reference)
    }

    /// Announce a property change of a published provider
    pub fn modify(&self, id: ProviderId) -> bool {
        let Some(reference) = self.providers.get(&id).map(|r| r.value().clone()) else {
            return false;
        };
        for listener in self.live_listeners() {
            listener.provider_modified(&reference);
        }
        true
    }

    /// Provider by id
    #[must_use]
    pub fn get(&self, id: ProviderId) -> Option<ProviderRef> {
        self.providers.get(&id).map(|r| r.value().clone())
    }

    /// Number of published providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// True when nothing is published
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|(_, l)| l.strong_count() > 0)
            .count()
    }

    fn live_listeners(&self) -> Vec<Arc<dyn ProviderListener>> {
        let snapshot: Vec<Subscription> = self.listeners.read().clone();
        let live: Vec<Arc<dyn ProviderListener>> =
            snapshot.iter().filter_map(|(_, l)| l.upgrade()).collect();

        if live.len() != snapshot.len() {
            self.listeners.write().retain(|(_, l)| l.strong_count() > 0);
        }
        live
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry for InMemoryRegistry {
    fn find(
        &self,
        name: &str,
        namespace: Option<&str>,
        filter: Option<&dyn Fn(&ProviderRef) -> bool>,
    ) -> Option<ProviderRef> {
        self.providers()
            .into_iter()
            .filter(|p| p.serves(name, namespace))
            .find(|p| filter.map_or(true, |f| f(p)))
    }

    fn providers(&self) -> Vec<ProviderRef> {
        let mut all: Vec<ProviderRef> = self.providers.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(ProviderRef::id);
        all
    }

    fn subscribe(&self, listener: Weak<dyn ProviderListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        debug!("Registry subscription added: {:?}", id);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.write().retain(|(sid, _)| *sid != id);
        debug!("Registry subscription removed: {:?}", id);
    }
}

impl std::fmt::Debug for InMemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRegistry")
            .field("providers", &self.providers.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
