//! Instance Container: the lifecycle of one component instance
//!
//! States move `Stopped -> Invalid <-> Valid -> ... -> Stopped -> Disposed`.
//! Forward moves notify handlers in declared order, backward moves in
//! reverse. A state change requested while another is being delivered on
//! the same thread is queued and applied after it; transitions from other
//! threads wait on the transition lock.

mod dispatch;
mod objects;

pub use objects::ComponentClass;

use crate::config::{Configuration, ObjectRef, Value};
use crate::description::ComponentTypeDescription;
use crate::error::{ContainerError, HandlerError, Result};
use crate::factory::ComponentFactory;
use crate::handler::{Handler, HandlerBinding, HandlerContext};
use crate::interception::{InterceptionKey, InterceptorTable};
use crate::metadata::ComponentMetadata;
use crate::state_machine::validate_transition;
use crate::types::{InstanceState, Validity};
use dcc_naming::NameRegistry;
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Observes instance state changes
pub trait InstanceStateListener: Send + Sync {
    /// `instance` entered `state`
    fn state_changed(&self, instance: &InstanceManager, state: InstanceState);
}

struct InstanceCore {
    state: InstanceState,
    /// Between `start()` entry and the first state assignment
    starting: bool,
    /// A transition is being delivered
    in_transition: bool,
    pending: VecDeque<InstanceState>,
    listeners: Vec<Arc<dyn InstanceStateListener>>,
    interceptors: InterceptorTable,
    fields: HashMap<String, Value>,
    objects: Vec<ObjectRef>,
    adopted: Option<ObjectRef>,
    configuration: Configuration,
    context: Option<ObjectRef>,
}

/// Everything a Type Container hands over to build an instance
pub(crate) struct InstanceParts {
    pub(crate) name: String,
    pub(crate) factory_name: String,
    pub(crate) factory: Weak<ComponentFactory>,
    pub(crate) description: Arc<ComponentTypeDescription>,
    pub(crate) class: Option<Arc<dyn ComponentClass>>,
    pub(crate) bindings: Vec<HandlerBinding>,
    pub(crate) names: Arc<NameRegistry>,
}

/// Container of one component instance
pub struct InstanceManager {
    name: String,
    factory_name: String,
    factory: Weak<ComponentFactory>,
    description: Arc<ComponentTypeDescription>,
    class: Option<Arc<dyn ComponentClass>>,
    bindings: Vec<HandlerBinding>,
    names: Arc<NameRegistry>,
    self_ref: Weak<InstanceManager>,
    transition: ReentrantMutex<()>,
    creation: Mutex<()>,
    core: Mutex<InstanceCore>,
}

enum Step {
    Applied,
    Skipped,
}

impl InstanceManager {
    pub(crate) fn new(parts: InstanceParts) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            name: parts.name,
            factory_name: parts.factory_name,
            factory: parts.factory,
            description: parts.description,
            class: parts.class,
            bindings: parts.bindings,
            names: parts.names,
            self_ref: self_ref.clone(),
            transition: ReentrantMutex::new(()),
            creation: Mutex::new(()),
            core: Mutex::new(InstanceCore {
                state: InstanceState::Stopped,
                starting: false,
                in_transition: false,
                pending: VecDeque::new(),
                listeners: Vec::new(),
                interceptors: InterceptorTable::default(),
                fields: HashMap::new(),
                objects: Vec::new(),
                adopted: None,
                configuration: Configuration::new(),
                context: None,
            }),
        })
    }

    /// Unique instance name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning Type Container
    #[must_use]
    pub fn factory_name(&self) -> &str {
        &self.factory_name
    }

    /// Owning Type Container, while it is alive
    #[must_use]
    pub fn factory(&self) -> Option<Arc<ComponentFactory>> {
        self.factory.upgrade()
    }

    /// Description of the component type
    #[must_use]
    pub fn description(&self) -> &Arc<ComponentTypeDescription> {
        &self.description
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.core.lock().state
    }

    /// `Invalid` or `Valid`
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state().is_started()
    }

    /// Attached handlers in declared order
    #[must_use]
    pub fn bindings(&self) -> &[HandlerBinding] {
        &self.bindings
    }

    /// Handler by local or qualified name
    #[must_use]
    pub fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.bindings
            .iter()
            .find(|b| b.answers_to(name))
            .map(|b| Arc::clone(b.handler()))
    }

    /// Qualified names of the attached handlers
    #[must_use]
    pub fn handler_names(&self) -> Vec<String> {
        self.bindings.iter().map(|b| b.name().to_owned()).collect()
    }

    /// Configuration the instance was created or last reconfigured with
    #[must_use]
    pub fn configuration(&self) -> Configuration {
        self.core.lock().configuration.clone()
    }

    /// Context object passed through `instance.context`
    #[must_use]
    pub fn context(&self) -> Option<ObjectRef> {
        self.core.lock().context.clone()
    }

    /// Registered interception keys, fields first
    #[must_use]
    pub fn registered_members(&self) -> Vec<InterceptionKey> {
        self.core.lock().interceptors.keys()
    }

    /// Subscribe to state changes
    pub fn add_state_listener(&self, listener: Arc<dyn InstanceStateListener>) {
        self.core.lock().listeners.push(listener);
    }

    /// Unsubscribe; returns whether the listener was registered
    pub fn remove_state_listener(&self, listener: &Arc<dyn InstanceStateListener>) -> bool {
        let mut core = self.core.lock();
        let before = core.listeners.len();
        core.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        core.listeners.len() != before
    }

    /// Configure every handler in declared order
    pub(crate) fn configure(
        &self,
        metadata: &ComponentMetadata,
        configuration: &Configuration,
    ) -> Result<()> {
        {
            let mut core = self.core.lock();
            core.configuration = configuration.clone();
            core.context = configuration.context().cloned();
            core.adopted = configuration.object().cloned();
        }

        for (index, binding) in self.bindings.iter().enumerate() {
            let context = HandlerContext::new(self.self_ref.clone(), index);
            binding
                .handler()
                .init(&context, metadata, configuration)
                .map_err(|e| {
                    ContainerError::configuration(format!(
                        "{}: handler {} cannot be configured: {e}",
                        self.name,
                        binding.name()
                    ))
                })?;
        }

        self.core.lock().interceptors.check_constructor_parameters()?;
        debug!("Instance configured: {} ({} handlers)", self.name, self.bindings.len());
        Ok(())
    }

    /// Start the handlers and compute the initial state.
    /// No-op unless `Stopped`.
    ///
    /// # Errors
    ///
    /// [`ContainerError::Configuration`] when a handler fails to start,
    /// stops the instance from its own `start`, or refuses the initial
    /// state; the instance is stopped.
    pub fn start(&self) -> Result<()> {
        let _transition = self.transition.lock();
        {
            let mut core = self.core.lock();
            if core.state != InstanceState::Stopped || core.starting {
                return Ok(());
            }
            core.starting = true;
        }
        info!("Starting instance {}", self.name);

        for binding in &self.bindings {
            if let Err(e) = binding.handler().start() {
                error!("{}: handler {} failed to start: {}", self.name, binding.name(), e);
                self.stop();
                return Err(ContainerError::configuration(format!(
                    "{}: handler {} failed to start: {e}",
                    self.name,
                    binding.name()
                )));
            }
            if !self.core.lock().starting {
                return Err(ContainerError::configuration(format!(
                    "{}: stopped by handler {} while starting",
                    self.name,
                    binding.name()
                )));
            }
        }

        let adopted = {
            let mut core = self.core.lock();
            match core.adopted.clone() {
                Some(object) if core.objects.is_empty() => {
                    core.objects.push(object.clone());
                    Some(object)
                }
                _ => None,
            }
        };
        if let Some(object) = adopted {
            self.notify_creation(&object);
        }

        let target = InstanceState::from(Validity::from_bool(self.all_handlers_valid()));
        let outcome = self.change_state(target);
        self.core.lock().starting = false;

        outcome.map_err(|e| {
            ContainerError::configuration(format!("{}: start aborted by a handler: {e}", self.name))
        })
    }

    /// Stop the handlers in reverse order. No-op when already stopped.
    pub fn stop(&self) {
        let _transition = self.transition.lock();
        {
            let mut core = self.core.lock();
            if core.state == InstanceState::Disposed
                || (core.state == InstanceState::Stopped && !core.starting)
            {
                return;
            }
            core.pending.clear();
            core.in_transition = false;
        }
        info!("Stopping instance {}", self.name);

        self.set_state(InstanceState::Invalid);
        if self.core.lock().state == InstanceState::Stopped {
            // a handler refused the move and the nested stop already ran
            return;
        }

        for binding in self.bindings.iter().rev() {
            binding.handler().stop();
        }

        let listeners = {
            let mut core = self.core.lock();
            core.state = InstanceState::Stopped;
            core.starting = false;
            core.pending.clear();
            core.objects.clear();
            core.listeners.clone()
        };

        for listener in &listeners {
            listener.state_changed(self, InstanceState::Stopped);
        }
    }

    /// Stop if needed, notify, dispose handlers in reverse order, release the
    /// name and detach from the Type Container. Idempotent.
    pub fn dispose(&self) {
        {
            let _transition = self.transition.lock();
            let (started, listeners) = {
                let mut core = self.core.lock();
                if core.state == InstanceState::Disposed {
                    return;
                }
                let started = core.state.is_started() || core.starting;
                (started, std::mem::take(&mut core.listeners))
            };

            if started {
                self.stop();
            }

            {
                let mut core = self.core.lock();
                if let Err(e) = validate_transition(core.state, InstanceState::Disposed) {
                    warn!("{}: {}", self.name, e);
                }
                core.state = InstanceState::Disposed;
                core.pending.clear();
            }

            for listener in &listeners {
                listener.state_changed(self, InstanceState::Disposed);
            }

            for binding in self.bindings.iter().rev() {
                binding.handler().dispose();
                binding.release();
            }

            self.names.release(&self.name);
            info!("Instance disposed: {}", self.name);
        }

        // detach outside the transition lock; the Type Container may be
        // disposing this instance under its own lock
        if let Some(factory) = self.factory.upgrade() {
            factory.instance_disposed(&self.name);
        }
    }

    /// Request a state. Reentrant: a request made while a transition is
    /// being delivered on this thread is queued and applied afterwards.
    /// Only `Invalid` and `Valid` are accepted; use [`Self::stop`] and
    /// [`Self::dispose`] for the others.
    pub fn set_state(&self, state: InstanceState) {
        if let Err(e) = self.change_state(state) {
            debug!("{}: transition to {} aborted: {}", self.name, state, e);
        }
    }

    /// Apply new configuration to every handler, then restart a stopped
    /// instance or revalidate an invalid one.
    ///
    /// # Errors
    ///
    /// Propagates a failed restart.
    pub fn reconfigure(&self, configuration: &Configuration) -> Result<()> {
        info!("Reconfiguring instance {}", self.name);
        for binding in &self.bindings {
            binding.handler().reconfigure(configuration);
        }

        let _transition = self.transition.lock();
        let state = {
            let mut core = self.core.lock();
            core.configuration = configuration.clone();
            core.state
        };

        match state {
            InstanceState::Stopped => {
                info!("Instance {} was stopped, restarting after reconfiguration", self.name);
                self.start()
            }
            InstanceState::Invalid => {
                if self.all_handlers_valid() {
                    info!("Instance {} is valid after reconfiguration", self.name);
                    self.set_state(InstanceState::Valid);
                }
                Ok(())
            }
            InstanceState::Valid | InstanceState::Disposed => Ok(()),
        }
    }

    /// A handler changed validity
    pub(crate) fn set_handler_validity(&self, index: usize, validity: Validity) {
        let Some(binding) = self.bindings.get(index) else {
            return;
        };
        let _transition = self.transition.lock();
        if !binding.set_validity(validity) {
            return;
        }
        debug!("{}: handler {} is now {}", self.name, binding.name(), validity);

        let state = self.core.lock().state;
        if !state.is_started() {
            return;
        }

        // decide on the aggregate, reports from other threads may interleave
        let all_valid = self.all_handlers_valid();
        match state {
            InstanceState::Valid if !all_valid => self.set_state(InstanceState::Invalid),
            InstanceState::Invalid if all_valid => self.set_state(InstanceState::Valid),
            _ => {}
        }
    }

    fn all_handlers_valid(&self) -> bool {
        self.bindings.iter().all(|b| b.validity().is_valid())
    }

    /// Queue-draining transition loop. Returns the error of the first
    /// transition when a handler aborted it.
    fn change_state(&self, state: InstanceState) -> std::result::Result<(), HandlerError> {
        let _transition = self.transition.lock();
        {
            let mut core = self.core.lock();
            if core.in_transition {
                core.pending.push_back(state);
                return Ok(());
            }
            core.in_transition = true;
        }

        let mut next = state;
        let mut first = true;
        loop {
            if let Err(e) = self.apply(next) {
                // stop() already cleared the queue and the in-flight flag
                return if first { Err(e) } else { Ok(()) };
            }
            first = false;

            let mut core = self.core.lock();
            match core.pending.pop_front() {
                Some(queued) => next = queued,
                None => {
                    core.in_transition = false;
                    return Ok(());
                }
            }
        }
    }

    fn apply(&self, target: InstanceState) -> std::result::Result<(), HandlerError> {
        let current = self.core.lock().state;
        if current == InstanceState::Stopped && target == InstanceState::Valid {
            if let Step::Skipped = self.apply_step(InstanceState::Invalid)? {
                return Ok(());
            }
        }
        self.apply_step(target).map(|_| ())
    }

    fn apply_step(&self, target: InstanceState) -> std::result::Result<Step, HandlerError> {
        let (from, listeners) = {
            let mut core = self.core.lock();
            let from = core.state;
            if from == target {
                return Ok(Step::Skipped);
            }
            if !matches!(target, InstanceState::Invalid | InstanceState::Valid) {
                warn!("{}: state {} can only be reached through stop/dispose", self.name, target);
                return Ok(Step::Skipped);
            }
            if from == InstanceState::Disposed || (from == InstanceState::Stopped && !core.starting) {
                debug!("{}: ignoring {} request on a {} instance", self.name, target, from);
                return Ok(Step::Skipped);
            }
            if let Err(e) = validate_transition(from, target) {
                warn!("{}: {}", self.name, e);
                return Ok(Step::Skipped);
            }
            // a handler may have reported invalid since the request was made
            if target == InstanceState::Valid && !self.all_handlers_valid() {
                debug!("{}: not every handler is valid, staying {}", self.name, from);
                return Ok(Step::Skipped);
            }
            core.state = target;
            (from, core.listeners.clone())
        };
        debug!("Instance {}: {} -> {}", self.name, from, target);

        let delivered = if target > from {
            self.bindings
                .iter()
                .try_for_each(|b| b.handler().state_changed(target))
        } else {
            self.bindings
                .iter()
                .rev()
                .try_for_each(|b| b.handler().state_changed(target))
        };

        if let Err(e) = delivered {
            error!("{}: handler refused state {}: {}; stopping", self.name, target, e);
            self.stop();
            return Err(e);
        }

        for listener in &listeners {
            listener.state_changed(self, target);
        }
        Ok(Step::Applied)
    }

    fn notify_creation(&self, object: &ObjectRef) {
        for binding in &self.bindings {
            binding.handler().on_creation(object);
        }
    }
}

impl std::fmt::Debug for InstanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceManager")
            .field("name", &self.name)
            .field("factory", &self.factory_name)
            .field("state", &self.state())
            .field("handlers", &self.bindings.len())
            .finish_non_exhaustive()
    }
}
