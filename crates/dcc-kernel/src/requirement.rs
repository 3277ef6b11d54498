//! Capability requirements of a Type Container

use crate::metadata::{HandlerName, DEFAULT_NAMESPACE};
use crate::provider::{ProviderLease, ProviderRef};
use std::fmt;

/// Binding of a requirement to a provider
#[derive(Debug, Default)]
pub enum Binding {
    /// No provider yet
    #[default]
    Unbound,
    /// Bound; the lease keeps the provider's usage count up
    Bound(ProviderLease),
}

/// One handler a component type needs, bound to at most one provider.
///
/// Two requirements are equal when name and namespace match ignoring case.
#[derive(Debug)]
pub struct RequiredHandler {
    handler: HandlerName,
    level: i32,
    binding: Binding,
}

impl RequiredHandler {
    /// Unbound requirement
    #[must_use]
    pub fn new(handler: HandlerName) -> Self {
        Self {
            handler,
            level: i32::MAX,
            binding: Binding::Unbound,
        }
    }

    /// Handler name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.handler.name
    }

    /// Declared namespace
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.handler.namespace.as_deref()
    }

    /// Qualified handler name
    #[must_use]
    pub fn handler(&self) -> &HandlerName {
        &self.handler
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

    /// Ordering priority, `i32::MAX` until a provider supplies one
    #[must_use]
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Bound to a provider
    #[must_use]
    pub fn is_bound(&self) -> bool {
        matches!(self.binding, Binding::Bound(_))
    }

    /// Bound provider
    #[must_use]
    pub fn provider(&self) -> Option<&ProviderRef> {
        match &self.binding {
            Binding::Bound(lease) => Some(lease.provider()),
            Binding::Unbound => None,
        }
    }

    /// True when `provider` can satisfy this requirement
    #[must_use]
    pub fn matches(&self, provider: &ProviderRef) -> bool {
        provider.serves(self.name(), self.namespace())
    }

    /// Bind to `provider`, taking a lease. Returns whether the sort key changed.
    pub fn bind(&mut self, provider: &ProviderRef) -> bool {
        let before = self.sort_key();
        if let Some(level) = provider.level() {
            self.level = level;
        }
        self.binding = Binding::Bound(provider.acquire());
        before != self.sort_key()
    }

    /// Drop the binding and its lease. Returns the released provider.
    pub fn unbind(&mut self) -> Option<ProviderRef> {
        match std::mem::take(&mut self.binding) {
            Binding::Bound(lease) => Some(lease.provider().clone()),
            Binding::Unbound => None,
        }
    }

    /// Bound providers by level ascending, unbound ones last
    #[must_use]
    pub fn sort_key(&self) -> (bool, i32) {
        (!self.is_bound(), self.level)
    }
}

impl PartialEq for RequiredHandler {
    fn eq(&self, other: &Self) -> bool {
        self.handler == other.handler
    }
}

impl Eq for RequiredHandler {}

impl fmt::Display for RequiredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Stable sort by [`RequiredHandler::sort_key`]
pub fn sort_requirements(requirements: &mut [RequiredHandler]) {
    requirements.sort_by_key(RequiredHandler::sort_key);
}
