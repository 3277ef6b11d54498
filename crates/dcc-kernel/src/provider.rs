//! Capability registry boundary: handler providers and their tracking
//!
//! A [`HandlerProvider`] is published in a [`CapabilityRegistry`] under a
//! name and namespace. Type Containers subscribe as [`ProviderListener`]s
//! and bind providers to their requirements. Every user of a provider
//! holds a [`ProviderLease`]; the lease count is the provider's usage.

use crate::error::HandlerError;
use crate::handler::Handler;
use crate::metadata::DEFAULT_NAMESPACE;
use crate::types::{ProviderId, SubscriptionId};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Produces handlers of one kind
pub trait HandlerProvider: Send + Sync {
    /// Handler name
    fn name(&self) -> &str;

    /// Handler namespace; `None` is the default namespace
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// Ordering priority, lower first
    fn level(&self) -> Option<i32> {
        None
    }

    /// Create a fresh handler
    ///
    /// # Errors
    ///
    /// [`HandlerError::Creation`] when no handler can be produced.
    fn create_handler(&self) -> Result<Arc<dyn Handler>, HandlerError>;
}

struct ProviderRecord {
    id: ProviderId,
    name: String,
    namespace: Option<String>,
    level: Option<i32>,
    provider: Arc<dyn HandlerProvider>,
    usage: AtomicUsize,
}

/// Registry-issued reference to a published provider
#[derive(Clone)]
pub struct ProviderRef {
    inner: Arc<ProviderRecord>,
}

impl ProviderRef {
    /// Capture a provider's identity under the given id
    pub fn new(id: ProviderId, provider: Arc<dyn HandlerProvider>) -> Self {
        Self {
            inner: Arc::new(ProviderRecord {
                id,
                name: provider.name().to_owned(),
                namespace: provider.namespace().map(str::to_owned),
                level: provider.level(),
                provider,
                usage: AtomicUsize::new(0),
            }),
        }
    }

    /// Registry id
    #[must_use]
    pub fn id(&self) -> ProviderId {
        self.inner.id
    }

    /// Handler name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Handler namespace as published
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.inner.namespace.as_deref()
    }

    /// Priority
    #[must_use]
    pub fn level(&self) -> Option<i32> {
        self.inner.level
    }

    /// `"ns:name"` with the default namespace substituted
    #[must_use]
    pub fn full_name(&self) -> String {
        format!(
            "{}:{}",
            self.namespace().unwrap_or(DEFAULT_NAMESPACE),
            self.name()
        )
    }

    /// True when this provider serves `name` in `namespace`.
    /// Comparison ignores ASCII case; a missing namespace on either side
    /// stands for the default namespace.
    #[must_use]
    pub fn serves(&self, name: &str, namespace: Option<&str>) -> bool {
        let ours = self.namespace().unwrap_or(DEFAULT_NAMESPACE);
        let theirs = namespace.unwrap_or(DEFAULT_NAMESPACE);
        self.name().eq_ignore_ascii_case(name) && ours.eq_ignore_ascii_case(theirs)
    }

    /// Acquire the provider; the usage count drops when the lease does
    #[must_use]
    pub fn acquire(&self) -> ProviderLease {
        self.inner.usage.fetch_add(1, Ordering::AcqRel);
        ProviderLease {
            provider: self.clone(),
        }
    }

    /// Number of live leases
    #[must_use]
    pub fn usage_count(&self) -> usize {
        self.inner.usage.load(Ordering::Acquire)
    }

    /// Same registration
    #[must_use]
    pub fn same(&self, other: &ProviderRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRef")
            .field("id", &self.inner.id)
            .field("name", &self.full_name())
            .field("level", &self.inner.level)
            .field("usage", &self.usage_count())
            .finish()
    }
}

/// Counted use of a provider, released exactly once on drop
pub struct ProviderLease {
    provider: ProviderRef,
}

impl ProviderLease {
    /// Leased provider
    #[must_use]
    pub fn provider(&self) -> &ProviderRef {
        &self.provider
    }

    /// Create a handler from the leased provider
    ///
    /// # Errors
    ///
    /// Propagates the provider's creation failure.
    pub fn create_handler(&self) -> Result<Arc<dyn Handler>, HandlerError> {
        self.provider.inner.provider.create_handler()
    }
}

impl Drop for ProviderLease {
    fn drop(&mut self) {
        self.provider.inner.usage.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for ProviderLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProviderLease").field(&self.provider.id()).finish()
    }
}

/// Receives provider arrival, departure and modification events
pub trait ProviderListener: Send + Sync {
    /// A provider was published
    fn provider_added(&self, provider: &ProviderRef);

    /// A provider was withdrawn
    fn provider_removed(&self, provider: &ProviderRef);

    /// A provider's properties changed
    fn provider_modified(&self, _provider: &ProviderRef) {}
}

/// Where handler providers are published and discovered
pub trait CapabilityRegistry: Send + Sync {
    /// First provider serving `name` in `namespace` that passes `filter`
    fn find(
        &self,
        name: &str,
        namespace: Option<&str>,
        filter: Option<&dyn Fn(&ProviderRef) -> bool>,
    ) -> Option<ProviderRef>;

    /// All published providers, in publication order
    fn providers(&self) -> Vec<ProviderRef>;

    /// Start delivering events. Existing providers are not replayed.
    fn subscribe(&self, listener: Weak<dyn ProviderListener>) -> SubscriptionId;

    /// Stop delivering events
    fn unsubscribe(&self, id: SubscriptionId);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, Option<&'static str>);

    impl HandlerProvider for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn namespace(&self) -> Option<&str> {
            self.1
        }

        fn create_handler(&self) -> Result<Arc<dyn Handler>, HandlerError> {
            Err(HandlerError::Creation("unused".into()))
        }
    }

    #[test]
    fn test_serves_default_namespace() {
        let p = ProviderRef::new(ProviderId(1), Arc::new(Named("Props", None)));

        assert!(p.serves("props", None));
        assert!(p.serves("PROPS", Some("dcc.core")));
        assert!(!p.serves("props", Some("ext")));
        assert_eq!(p.full_name(), "dcc.core:Props");
    }

    #[test]
    fn test_serves_explicit_namespace() {
        let p = ProviderRef::new(ProviderId(1), Arc::new(Named("jmx", Some("Ext"))));

        assert!(p.serves("jmx", Some("ext")));
        assert!(!p.serves("jmx", None));
    }

    #[test]
    fn test_lease_counts_usage() {
        let p = ProviderRef::new(ProviderId(1), Arc::new(Named("x", None)));

        let a = p.acquire();
        let b = p.acquire();
        assert_eq!(p.usage_count(), 2);

        drop(a);
        assert_eq!(p.usage_count(), 1);
        drop(b);
        assert_eq!(p.usage_count(), 0);
    }
}
