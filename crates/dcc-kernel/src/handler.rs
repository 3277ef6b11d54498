//! Handlers: pluggable units contributing behavior to instances

use crate::config::{Configuration, ObjectRef};
use crate::description::ComponentTypeDescription;
use crate::error::HandlerError;
use crate::instance::InstanceManager;
use crate::metadata::ComponentMetadata;
use crate::provider::ProviderLease;
use crate::types::{InstanceState, Validity};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Lifecycle hooks of a handler.
///
/// Every hook has a no-op default. A handler reports its own validity
/// through the [`HandlerContext`] it receives in [`Handler::init`].
pub trait Handler: Send + Sync {
    /// Contribute to the type description. Called on a throwaway handler
    /// the first time the Type Container turns valid.
    ///
    /// # Errors
    ///
    /// A failure stops the Type Container.
    fn initialize_component_factory(
        &self,
        _description: &mut ComponentTypeDescription,
        _metadata: &ComponentMetadata,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Configure against an instance
    ///
    /// # Errors
    ///
    /// A failure aborts instance creation.
    fn init(
        &self,
        _context: &HandlerContext,
        _metadata: &ComponentMetadata,
        _configuration: &Configuration,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Instance is starting
    ///
    /// # Errors
    ///
    /// A failure stops the instance.
    fn start(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Instance is stopping
    fn stop(&self) {}

    /// Instance is being disposed
    fn dispose(&self) {}

    /// Instance moved to `state`
    ///
    /// # Errors
    ///
    /// [`HandlerError::IllegalState`] force-stops the instance.
    fn state_changed(&self, _state: InstanceState) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Instance was reconfigured
    fn reconfigure(&self, _configuration: &Configuration) {}

    /// An implementation object was created or adopted
    fn on_creation(&self, _object: &ObjectRef) {}
}

/// Handler attached to one instance, owning its validity and provider lease
pub struct HandlerBinding {
    name: String,
    handler: Arc<dyn Handler>,
    valid: AtomicBool,
    lease: Mutex<Option<ProviderLease>>,
}

impl HandlerBinding {
    /// Bind a created handler. Bindings start valid.
    pub fn new(name: impl Into<String>, handler: Arc<dyn Handler>, lease: ProviderLease) -> Self {
        Self {
            name: name.into(),
            handler,
            valid: AtomicBool::new(true),
            lease: Mutex::new(Some(lease)),
        }
    }

    /// Qualified handler name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handler
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Current validity
    #[must_use]
    pub fn validity(&self) -> Validity {
        Validity::from_bool(self.valid.load(Ordering::Acquire))
    }

    /// Set validity, returning whether it changed
    pub(crate) fn set_validity(&self, validity: Validity) -> bool {
        self.valid.swap(validity.is_valid(), Ordering::AcqRel) != validity.is_valid()
    }

    /// Lease still held
    #[must_use]
    pub fn holds_provider(&self) -> bool {
        self.lease.lock().is_some()
    }

    /// Release the provider lease; later calls are no-ops
    pub(crate) fn release(&self) {
        self.lease.lock().take();
    }

    /// True when `name` is this binding's local or qualified name
    #[must_use]
    pub fn answers_to(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self
                .name
                .rsplit_once(':')
                .is_some_and(|(_, local)| local.eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("name", &self.name)
            .field("validity", &self.validity())
            .field("holds_provider", &self.holds_provider())
            .finish_non_exhaustive()
    }
}

/// A handler's view of the instance it is attached to
#[derive(Clone)]
pub struct HandlerContext {
    instance: Weak<InstanceManager>,
    index: usize,
}

impl HandlerContext {
    pub(crate) fn new(instance: Weak<InstanceManager>, index: usize) -> Self {
        Self { instance, index }
    }

    /// The instance, while it is alive
    #[must_use]
    pub fn instance(&self) -> Option<Arc<InstanceManager>> {
        self.instance.upgrade()
    }

    /// Position in the instance's handler list
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Report this handler's validity; the instance re-evaluates its state
    pub fn set_validity(&self, validity: Validity) {
        if let Some(instance) = self.instance.upgrade() {
            instance.set_handler_validity(self.index, validity);
        }
    }

    /// This handler's validity as recorded by the instance
    #[must_use]
    pub fn validity(&self) -> Validity {
        self.instance
            .upgrade()
            .and_then(|i| i.bindings().get(self.index).map(HandlerBinding::validity))
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("index", &self.index)
            .field("alive", &(self.instance.strong_count() > 0))
            .finish()
    }
}
