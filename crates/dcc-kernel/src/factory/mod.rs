//! Type Container: tracks capability requirements, validity and instances
//!
//! A Type Container is VALID exactly when every required handler is bound
//! to a provider. It subscribes to a [`CapabilityRegistry`] and rebinds as
//! providers come and go. All mutations run under one reentrant lock so
//! handler callbacks may call back into the Type Container on the same
//! thread.

mod builder;

pub use builder::FactoryBuilder;

use crate::config::{Configuration, LEGACY_NAME};
use crate::description::ComponentTypeDescription;
use crate::error::{ContainerError, Result};
use crate::handler::HandlerBinding;
use crate::instance::{ComponentClass, InstanceManager, InstanceParts};
use crate::metadata::ComponentMetadata;
use crate::options::ContainerConfig;
use crate::provider::{CapabilityRegistry, ProviderListener, ProviderRef};
use crate::requirement::{sort_requirements, RequiredHandler};
use crate::types::{FactoryState, SubscriptionId};
use dcc_naming::{NameGenerator, NameRegistry, UniquenessNameGenerator};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Observes Type Container validity changes
pub trait FactoryStateListener: Send + Sync {
    /// `factory` entered `state`
    fn state_changed(&self, factory: &ComponentFactory, state: FactoryState);
}

#[derive(Default)]
struct FactoryCore {
    requirements: Vec<RequiredHandler>,
    state: FactoryState,
    description: Option<Arc<ComponentTypeDescription>>,
    instances: BTreeMap<String, Arc<InstanceManager>>,
    listeners: Vec<Arc<dyn FactoryStateListener>>,
    subscription: Option<SubscriptionId>,
    started: bool,
    disposed: bool,
}

/// Type Container of one component type
pub struct ComponentFactory {
    name: String,
    class_name: String,
    version: Option<String>,
    metadata: ComponentMetadata,
    config: ContainerConfig,
    registry: Arc<dyn CapabilityRegistry>,
    names: Arc<NameRegistry>,
    generator: UniquenessNameGenerator,
    class: Option<Arc<dyn ComponentClass>>,
    self_ref: Weak<ComponentFactory>,
    valid: AtomicBool,
    core: ReentrantMutex<RefCell<FactoryCore>>,
}

impl ComponentFactory {
    /// Start building a Type Container for `metadata`
    pub fn builder(
        metadata: ComponentMetadata,
        registry: Arc<dyn CapabilityRegistry>,
        names: Arc<NameRegistry>,
    ) -> FactoryBuilder {
        FactoryBuilder::new(metadata, registry, names)
    }

    /// Type name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Implementation class name
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Declared version
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Type metadata
    #[must_use]
    pub fn metadata(&self) -> &ComponentMetadata {
        &self.metadata
    }

    /// Current state. Lock-free, may be read from any callback.
    #[must_use]
    pub fn state(&self) -> FactoryState {
        FactoryState::from_bool(self.valid.load(Ordering::Acquire))
    }

    /// Subscribed to the registry
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.core.lock().borrow().started
    }

    /// Type description, available once the Type Container has been valid
    #[must_use]
    pub fn component_description(&self) -> Option<Arc<ComponentTypeDescription>> {
        self.core.lock().borrow().description.clone()
    }

    /// Qualified names of all requirements, in binding order
    #[must_use]
    pub fn required_handlers(&self) -> Vec<String> {
        let guard = self.core.lock();
        let core = guard.borrow();
        core.requirements.iter().map(RequiredHandler::full_name).collect()
    }

    /// Qualified names of the unbound requirements
    #[must_use]
    pub fn missing_handlers(&self) -> Vec<String> {
        let guard = self.core.lock();
        let core = guard.borrow();
        core.requirements
            .iter()
            .filter(|r| !r.is_bound())
            .map(RequiredHandler::full_name)
            .collect()
    }

    /// Providers currently bound, in binding order
    #[must_use]
    pub fn bound_providers(&self) -> Vec<ProviderRef> {
        let guard = self.core.lock();
        let core = guard.borrow();
        core.requirements
            .iter()
            .filter_map(|r| r.provider().cloned())
            .collect()
    }

    /// Live instance by name
    #[must_use]
    pub fn instance_by_name(&self, name: &str) -> Option<Arc<InstanceManager>> {
        self.core.lock().borrow().instances.get(name).cloned()
    }

    /// Sorted names of the live instances
    #[must_use]
    pub fn instance_names(&self) -> Vec<String> {
        self.core.lock().borrow().instances.keys().cloned().collect()
    }

    /// Number of live instances
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.core.lock().borrow().instances.len()
    }

    /// Subscribe to validity changes
    pub fn add_factory_state_listener(&self, listener: Arc<dyn FactoryStateListener>) {
        self.core.lock().borrow_mut().listeners.push(listener);
    }

    /// Unsubscribe; returns whether the listener was registered
    pub fn remove_factory_state_listener(&self, listener: &Arc<dyn FactoryStateListener>) -> bool {
        let guard = self.core.lock();
        let mut core = guard.borrow_mut();
        let before = core.listeners.len();
        core.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        core.listeners.len() != before
    }

    /// Subscribe to the registry, bind the providers already published
    /// and compute the initial state. No-op when already started.
    ///
    /// # Errors
    ///
    /// [`ContainerError::Disposed`] after [`Self::dispose`];
    /// [`ContainerError::TypeDescription`] when the type turns valid but
    /// its description cannot be computed.
    pub fn start(&self) -> Result<()> {
        let guard = self.core.lock();
        {
            let mut core = guard.borrow_mut();
            if core.disposed {
                return Err(ContainerError::Disposed(self.name.clone()));
            }
            if core.started {
                return Ok(());
            }
            core.started = true;
        }

        let listener: Weak<dyn ProviderListener> = self.self_ref.clone();
        let subscription = self.registry.subscribe(listener);
        guard.borrow_mut().subscription = Some(subscription);

        for provider in self.registry.providers() {
            self.bind_provider(&provider);
        }

        info!("Factory started: {} ({})", self.name, self.class_name);
        self.compute_state()
    }

    /// Unsubscribe, turn invalid, dispose every instance and unbind every
    /// requirement. The description is recomputed on the next validation.
    pub fn stop(&self) {
        let guard = self.core.lock();
        let (was_valid, instances, listeners) = {
            let mut core = guard.borrow_mut();
            if !core.started {
                return;
            }
            core.started = false;
            if let Some(subscription) = core.subscription.take() {
                self.registry.unsubscribe(subscription);
            }
            let was_valid = core.state.is_valid();
            core.state = FactoryState::Invalid;
            self.valid.store(false, Ordering::Release);
            (
                was_valid,
                core.instances.values().cloned().collect::<Vec<_>>(),
                core.listeners.clone(),
            )
        };

        if was_valid {
            for listener in &listeners {
                listener.state_changed(self, FactoryState::Invalid);
            }
        }

        for instance in &instances {
            instance.dispose();
        }

        {
            let mut core = guard.borrow_mut();
            for requirement in &mut core.requirements {
                requirement.unbind();
            }
            sort_requirements(&mut core.requirements);
            core.description = None;
            core.instances.clear();
        }

        info!("Factory stopped: {}", self.name);
    }

    /// Stop, then forget requirements and listeners for good
    pub fn dispose(&self) {
        let guard = self.core.lock();
        self.stop();
        let mut core = guard.borrow_mut();
        core.requirements.clear();
        core.listeners.clear();
        core.disposed = true;
        info!("Factory disposed: {}", self.name);
    }

    /// Stop, recompute the requirement list from the metadata, start again
    ///
    /// # Errors
    ///
    /// See [`Self::start`].
    pub fn restart(&self) -> Result<()> {
        let guard = self.core.lock();
        self.stop();
        {
            let mut core = guard.borrow_mut();
            if core.disposed {
                return Err(ContainerError::Disposed(self.name.clone()));
            }
            core.requirements = self
                .metadata
                .required_handlers(&self.config)
                .into_iter()
                .map(RequiredHandler::new)
                .collect();
        }
        self.start()
    }

    /// Check a configuration against the type's property rules
    ///
    /// # Errors
    ///
    /// [`ContainerError::MissingHandler`] when the Type Container is
    /// invalid; [`ContainerError::UnacceptableConfiguration`] when an
    /// immutable property is overridden or a mandatory one is missing.
    pub fn check_acceptability(&self, configuration: &Configuration) -> Result<()> {
        let properties = {
            let guard = self.core.lock();
            let core = guard.borrow();
            if !core.state.is_valid() {
                return Err(ContainerError::MissingHandler(
                    core.requirements
                        .iter()
                        .filter(|r| !r.is_bound())
                        .map(RequiredHandler::full_name)
                        .collect(),
                ));
            }
            core.description
                .as_ref()
                .map(|d| d.properties.clone())
                .unwrap_or_default()
        };

        for property in &properties {
            if property.immutable && configuration.contains(&property.name) {
                return Err(ContainerError::unacceptable(format!(
                    "the property {} cannot be overridden: it is immutable",
                    property.name
                )));
            }
            if property.mandatory && property.value.is_none() && !configuration.contains(&property.name) {
                return Err(ContainerError::unacceptable(format!(
                    "the mandatory property {} is missing",
                    property.name
                )));
            }
        }
        Ok(())
    }

    /// True when [`Self::check_acceptability`] passes
    #[must_use]
    pub fn is_acceptable(&self, configuration: &Configuration) -> bool {
        self.check_acceptability(configuration).is_ok()
    }

    /// Create, configure and start a new instance
    ///
    /// # Errors
    ///
    /// [`ContainerError::MissingHandler`] when invalid, acceptability and
    /// naming errors, or a [`ContainerError::Configuration`] raised while
    /// configuring or starting. Nothing stays registered on failure.
    pub fn create_component_instance(&self, configuration: Configuration) -> Result<Arc<InstanceManager>> {
        let guard = self.core.lock();

        if let Err(e) = self.check_acceptability(&configuration) {
            error!("{}: cannot create instance: {}", self.name, e);
            return Err(e);
        }

        let mut configuration = configuration;
        let requested = Self::requested_name(&configuration)?.map(str::to_owned);
        let version = configuration
            .factory_version()
            .map(str::to_owned)
            .or_else(|| self.version.clone());

        let name = self.generator.generate(requested.as_deref(), version.as_deref())?;
        configuration.set_instance_name(&name);

        let (providers, description) = {
            let core = guard.borrow();
            let providers: Vec<ProviderRef> = core
                .requirements
                .iter()
                .filter_map(|r| r.provider().cloned())
                .collect();
            (providers, core.description.clone())
        };
        let Some(description) = description else {
            self.names.release(&name);
            return Err(ContainerError::configuration(format!(
                "{}: type description unavailable",
                self.name
            )));
        };

        let mut bindings = Vec::with_capacity(providers.len());
        for provider in &providers {
            let lease = provider.acquire();
            match lease.create_handler() {
                Ok(handler) => bindings.push(HandlerBinding::new(provider.full_name(), handler, lease)),
                Err(e) => {
                    // leases already taken drop with `bindings`
                    self.names.release(&name);
                    error!("{}: cannot create handler {}: {}", self.name, provider.full_name(), e);
                    return Err(ContainerError::configuration(format!(
                        "{name}: cannot create handler {}: {e}",
                        provider.full_name()
                    )));
                }
            }
        }

        let instance = InstanceManager::new(InstanceParts {
            name: name.clone(),
            factory_name: self.name.clone(),
            factory: self.self_ref.clone(),
            description,
            class: self.class.clone(),
            bindings,
            names: Arc::clone(&self.names),
        });

        let outcome = instance
            .configure(&self.metadata, &configuration)
            .and_then(|()| instance.start());
        if let Err(e) = outcome {
            error!("{}: instance {} failed: {}", self.name, name, e);
            // releases the name and the leases
            instance.dispose();
            return Err(e);
        }

        // a provider may have left while the instance was starting
        let still_bound = {
            let core = guard.borrow();
            core.state.is_valid()
                && providers.iter().all(|p| {
                    core.requirements
                        .iter()
                        .any(|r| r.provider().is_some_and(|bound| bound.same(p)))
                })
        };
        if !still_bound {
            warn!("{}: required handlers changed while {} was starting", self.name, name);
            instance.dispose();
            return Err(ContainerError::configuration(format!(
                "{name}: required handlers changed during creation"
            )));
        }

        guard.borrow_mut().instances.insert(name.clone(), Arc::clone(&instance));
        info!("Instance created: {} ({})", name, self.name);
        Ok(instance)
    }

    /// Reconfigure the live instance named in `configuration`.
    /// Unknown instances are ignored.
    ///
    /// # Errors
    ///
    /// A missing instance name, acceptability errors, or a failed restart.
    pub fn reconfigure(&self, configuration: &Configuration) -> Result<()> {
        let guard = self.core.lock();
        let Some(name) = Self::requested_name(configuration)? else {
            return Err(ContainerError::unacceptable(format!(
                "{}: the configuration does not contain the instance.name property",
                self.name
            )));
        };

        let Some(instance) = guard.borrow().instances.get(name).cloned() else {
            debug!("{}: no instance {} to reconfigure", self.name, name);
            return Ok(());
        };

        self.check_acceptability(configuration)?;
        instance.reconfigure(configuration)
    }

    /// Managed-configuration entry point: reconfigure the instance `name`
    /// or create it when unknown
    ///
    /// # Errors
    ///
    /// See [`Self::reconfigure`] and [`Self::create_component_instance`].
    pub fn updated(&self, name: &str, mut configuration: Configuration) -> Result<()> {
        let guard = self.core.lock();
        configuration.set_instance_name(name);

        let existing = guard.borrow().instances.get(name).cloned();
        match existing {
            Some(instance) => {
                self.check_acceptability(&configuration)?;
                instance.reconfigure(&configuration)
            }
            None => self.create_component_instance(configuration).map(|_| ()),
        }
    }

    /// Managed-configuration entry point: dispose the instance `name`
    pub fn deleted(&self, name: &str) {
        let instance = self.core.lock().borrow_mut().instances.remove(name);
        match instance {
            Some(instance) => instance.dispose(),
            None => debug!("{}: no instance {} to delete", self.name, name),
        }
    }

    /// Called by an instance once disposed
    pub(crate) fn instance_disposed(&self, name: &str) {
        let guard = self.core.lock();
        if guard.borrow_mut().instances.remove(name).is_some() {
            debug!("{}: instance {} detached", self.name, name);
        }
    }

    fn requested_name(configuration: &Configuration) -> Result<Option<&str>> {
        use crate::config::INSTANCE_NAME;
        for key in [INSTANCE_NAME, LEGACY_NAME] {
            let Some(value) = configuration.get(key) else {
                continue;
            };
            let Some(name) = value.as_str() else {
                return Err(ContainerError::unacceptable(format!(
                    "the {key} property must be a string"
                )));
            };
            if key == LEGACY_NAME {
                warn!("The 'name' property is deprecated, use 'instance.name' instead");
            }
            return Ok(Some(name));
        }
        Ok(None)
    }

    /// Bind `provider` to the first matching unbound requirement
    fn bind_provider(&self, provider: &ProviderRef) -> bool {
        let guard = self.core.lock();
        let mut core = guard.borrow_mut();
        let Some(requirement) = core
            .requirements
            .iter_mut()
            .find(|r| !r.is_bound() && r.matches(provider))
        else {
            return false;
        };

        let reorder = requirement.bind(provider);
        debug!("{}: requirement {} bound to {}", self.name, requirement, provider.id());
        if reorder {
            sort_requirements(&mut core.requirements);
        }
        true
    }

    /// Re-evaluate validity. Called under the lock.
    fn compute_state(&self) -> Result<()> {
        let guard = self.core.lock();
        let (all_bound, state, described) = {
            let core = guard.borrow();
            (
                core.requirements.iter().all(RequiredHandler::is_bound),
                core.state,
                core.description.is_some(),
            )
        };

        if all_bound && !state.is_valid() {
            if !described {
                match self.compute_description() {
                    Ok(description) => guard.borrow_mut().description = Some(Arc::new(description)),
                    Err(e) => {
                        error!("{}: cannot compute the type description: {}", self.name, e);
                        self.stop();
                        return Err(ContainerError::TypeDescription {
                            factory: self.name.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            self.transition_to(FactoryState::Valid);
        } else if !all_bound && state.is_valid() {
            self.transition_to(FactoryState::Invalid);

            let instances: Vec<Arc<InstanceManager>> = {
                let core = guard.borrow();
                core.instances.values().cloned().collect()
            };
            for instance in &instances {
                instance.dispose();
            }
            guard.borrow_mut().instances.clear();
        }
        Ok(())
    }

    fn transition_to(&self, state: FactoryState) {
        let listeners = {
            let guard = self.core.lock();
            let mut core = guard.borrow_mut();
            core.state = state;
            self.valid.store(state.is_valid(), Ordering::Release);
            core.listeners.clone()
        };
        info!("Factory {} is now {}", self.name, state);
        for listener in &listeners {
            listener.state_changed(self, state);
        }
    }

    /// One throwaway handler per requirement contributes to the description
    fn compute_description(&self) -> Result<ComponentTypeDescription> {
        let (required, providers) = {
            let guard = self.core.lock();
            let core = guard.borrow();
            (
                core.requirements.iter().map(RequiredHandler::full_name).collect::<Vec<_>>(),
                core.requirements
                    .iter()
                    .filter_map(|r| r.provider().cloned())
                    .collect::<Vec<_>>(),
            )
        };

        let mut description = ComponentTypeDescription::new(
            self.name.clone(),
            self.class_name.clone(),
            self.version.clone(),
            required,
        );

        for provider in &providers {
            let lease = provider.acquire();
            let handler = lease.create_handler().map_err(|e| {
                ContainerError::configuration(format!("cannot create handler {}: {e}", provider.full_name()))
            })?;
            let contributed = handler.initialize_component_factory(&mut description, &self.metadata);
            handler.dispose();
            contributed.map_err(|e| {
                ContainerError::configuration(format!("handler {} rejected the type: {e}", provider.full_name()))
            })?;
        }

        debug!("{}: type description computed", self.name);
        Ok(description)
    }
}

impl ProviderListener for ComponentFactory {
    fn provider_added(&self, provider: &ProviderRef) {
        let guard = self.core.lock();
        if !guard.borrow().started {
            return;
        }
        if self.bind_provider(provider) && !self.state().is_valid() {
            if let Err(e) = self.compute_state() {
                error!("{}: {}", self.name, e);
            }
        }
    }

    fn provider_removed(&self, provider: &ProviderRef) {
        let guard = self.core.lock();
        let released = {
            let mut core = guard.borrow_mut();
            if !core.started {
                return;
            }
            let released = core
                .requirements
                .iter_mut()
                .find(|r| r.provider().is_some_and(|p| p.same(provider)))
                .map(|r| {
                    r.unbind();
                    r.handler().clone()
                });
            if released.is_some() {
                sort_requirements(&mut core.requirements);
            }
            released
        };

        let Some(handler) = released else {
            return;
        };
        debug!("{}: provider {} withdrawn", self.name, provider.full_name());

        // instances holding handlers of the withdrawn provider go away
        if let Err(e) = self.compute_state() {
            error!("{}: {}", self.name, e);
            return;
        }

        // another published provider may serve the same requirement
        let others = |p: &ProviderRef| !p.same(provider);
        let filter: &dyn Fn(&ProviderRef) -> bool = &others;
        if let Some(replacement) =
            self.registry
                .find(&handler.name, handler.namespace.as_deref(), Some(filter))
        {
            if self.bind_provider(&replacement) {
                if let Err(e) = self.compute_state() {
                    error!("{}: {}", self.name, e);
                }
            }
        }
    }
}

impl std::fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("name", &self.name)
            .field("class_name", &self.class_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
