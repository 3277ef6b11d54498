//! Testing utilities for DCC workspace
//!
//! Shared recording handlers, providers, interceptors and fixtures.

#![allow(missing_docs)]

use dcc_kernel::config::{Configuration, ObjectRef, Value};
use dcc_kernel::description::{ComponentTypeDescription, PropertyDescription};
use dcc_kernel::error::{BoxError, HandlerError};
use dcc_kernel::factory::ComponentFactory;
use dcc_kernel::handler::{Handler, HandlerContext};
use dcc_kernel::instance::{ComponentClass, InstanceManager};
use dcc_kernel::interception::{FieldInterceptor, MethodInterceptor, MethodSignature};
use dcc_kernel::metadata::{ComponentMetadata, Element};
use dcc_kernel::provider::{HandlerProvider, ProviderRef};
use dcc_kernel::registry::InMemoryRegistry;
use dcc_kernel::types::{InstanceState, Validity};
use dcc_naming::NameRegistry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Shared, ordered event log
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Entries of `journal` starting with `prefix`
pub fn entries(journal: &Journal, prefix: &str) -> Vec<String> {
    journal
        .lock()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .cloned()
        .collect()
}

pub type StateHook = Arc<dyn Fn(&RecordingHandler, InstanceState) + Send + Sync>;

/// Scripted behavior of the handlers a [`RecordingProvider`] creates
#[derive(Clone, Default)]
pub struct Behavior {
    pub fail_init: bool,
    pub fail_start: bool,
    pub refuse_state: Option<InstanceState>,
    pub initially_invalid: bool,
    pub fail_description: bool,
    /// Stop the owning instance from inside `start`
    pub stop_on_start: bool,
    /// Report valid again when reconfigured
    pub valid_on_reconfigure: bool,
    pub properties: Vec<PropertyDescription>,
    pub on_state: Option<StateHook>,
}

/// Provider whose handlers log every callback to a journal
pub struct RecordingProvider {
    name: String,
    namespace: Option<String>,
    level: Option<i32>,
    journal: Journal,
    behavior: Behavior,
    fail_after: Option<usize>,
    created: AtomicUsize,
    described: Arc<AtomicUsize>,
    attached: Arc<Mutex<Vec<Arc<RecordingHandler>>>>,
}

impl RecordingProvider {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_owned(),
            namespace: None,
            level: None,
            journal: Arc::clone(journal),
            behavior: Behavior::default(),
            fail_after: None,
            created: AtomicUsize::new(0),
            described: Arc::new(AtomicUsize::new(0)),
            attached: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_owned());
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_property(mut self, property: PropertyDescription) -> Self {
        self.behavior.properties.push(property);
        self
    }

    pub fn on_state(mut self, hook: impl Fn(&RecordingHandler, InstanceState) + Send + Sync + 'static) -> Self {
        self.behavior.on_state = Some(Arc::new(hook));
        self
    }

    pub fn failing_creation(self) -> Self {
        self.failing_creation_after(0)
    }

    /// Create `n` handlers, then refuse
    pub fn failing_creation_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Handlers attached to instances, in `init` order
    pub fn handlers(&self) -> Vec<Arc<RecordingHandler>> {
        self.attached.lock().clone()
    }

    /// Most recently attached handler
    pub fn last_handler(&self) -> Option<Arc<RecordingHandler>> {
        self.attached.lock().last().cloned()
    }

    /// Handlers created, including throwaway description handlers
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Type description contributions
    pub fn descriptions(&self) -> usize {
        self.described.load(Ordering::SeqCst)
    }
}

impl HandlerProvider for RecordingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn level(&self) -> Option<i32> {
        self.level
    }

    fn create_handler(&self) -> Result<Arc<dyn Handler>, HandlerError> {
        let created = self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|n| created >= n) {
            self.created.fetch_sub(1, Ordering::SeqCst);
            return Err(HandlerError::Creation(format!("{} refuses to create handlers", self.name)));
        }
        let handler = Arc::new_cyclic(|self_ref| RecordingHandler {
            name: self.name.clone(),
            journal: Arc::clone(&self.journal),
            behavior: self.behavior.clone(),
            context: Mutex::new(None),
            self_ref: self_ref.clone(),
            attached: Arc::clone(&self.attached),
            described: Arc::clone(&self.described),
            objects: Mutex::new(Vec::new()),
            configurations: Mutex::new(Vec::new()),
        });
        Ok(handler)
    }
}

/// Handler logging `"{name}:{event}"` entries
pub struct RecordingHandler {
    name: String,
    journal: Journal,
    behavior: Behavior,
    context: Mutex<Option<HandlerContext>>,
    self_ref: Weak<RecordingHandler>,
    attached: Arc<Mutex<Vec<Arc<RecordingHandler>>>>,
    described: Arc<AtomicUsize>,
    objects: Mutex<Vec<ObjectRef>>,
    configurations: Mutex<Vec<Configuration>>,
}

impl RecordingHandler {
    fn log(&self, event: impl std::fmt::Display) {
        self.journal.lock().push(format!("{}:{}", self.name, event));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> Option<HandlerContext> {
        self.context.lock().clone()
    }

    pub fn instance(&self) -> Option<Arc<InstanceManager>> {
        self.context().and_then(|c| c.instance())
    }

    /// Report validity through the handler context
    pub fn set_validity(&self, validity: Validity) {
        if let Some(context) = self.context() {
            context.set_validity(validity);
        }
    }

    /// Objects announced through `on_creation`
    pub fn created_objects(&self) -> Vec<ObjectRef> {
        self.objects.lock().clone()
    }

    /// Configurations received through `init` and `reconfigure`
    pub fn configurations(&self) -> Vec<Configuration> {
        self.configurations.lock().clone()
    }
}

impl Handler for RecordingHandler {
    fn initialize_component_factory(
        &self,
        description: &mut ComponentTypeDescription,
        _metadata: &ComponentMetadata,
    ) -> Result<(), HandlerError> {
        self.log("describe");
        if self.behavior.fail_description {
            return Err(HandlerError::configuration(format!("{} rejects the type", self.name)));
        }
        self.described.fetch_add(1, Ordering::SeqCst);
        for property in &self.behavior.properties {
            description.add_property(property.clone());
        }
        description.add_handler_info(format!("{}.recording", self.name), Value::Bool(true));
        Ok(())
    }

    fn init(
        &self,
        context: &HandlerContext,
        _metadata: &ComponentMetadata,
        configuration: &Configuration,
    ) -> Result<(), HandlerError> {
        self.log("init");
        if self.behavior.fail_init {
            return Err(HandlerError::configuration(format!("{} cannot be configured", self.name)));
        }
        *self.context.lock() = Some(context.clone());
        self.configurations.lock().push(configuration.clone());
        if let Some(me) = self.self_ref.upgrade() {
            self.attached.lock().push(me);
        }
        if self.behavior.initially_invalid {
            context.set_validity(Validity::Invalid);
        }
        Ok(())
    }

    fn start(&self) -> Result<(), HandlerError> {
        self.log("start");
        if self.behavior.fail_start {
            return Err(HandlerError::illegal_state(format!("{} cannot start", self.name)));
        }
        if self.behavior.stop_on_start {
            if let Some(instance) = self.instance() {
                instance.stop();
            }
        }
        Ok(())
    }

    fn stop(&self) {
        self.log("stop");
    }

    fn dispose(&self) {
        self.log("dispose");
    }

    fn state_changed(&self, state: InstanceState) -> Result<(), HandlerError> {
        self.log(format_args!("state:{state}"));
        if self.behavior.refuse_state == Some(state) {
            return Err(HandlerError::illegal_state(format!("{} refuses {state}", self.name)));
        }
        if let Some(hook) = &self.behavior.on_state {
            hook(self, state);
        }
        Ok(())
    }

    fn reconfigure(&self, configuration: &Configuration) {
        self.log("reconfigure");
        self.configurations.lock().push(configuration.clone());
        if self.behavior.valid_on_reconfigure {
            self.set_validity(Validity::Valid);
        }
    }

    fn on_creation(&self, object: &ObjectRef) {
        self.log("creation");
        self.objects.lock().push(object.clone());
    }
}

/// Field and method interceptor logging to a journal, optionally
/// injecting a fixed field value
pub struct RecordingInterceptor {
    label: String,
    journal: Journal,
    inject: Option<Value>,
}

impl RecordingInterceptor {
    pub fn new(label: &str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_owned(),
            journal: Arc::clone(journal),
            inject: None,
        })
    }

    pub fn injecting(label: &str, journal: &Journal, value: impl Into<Value>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_owned(),
            journal: Arc::clone(journal),
            inject: Some(value.into()),
        })
    }

    fn log(&self, event: impl std::fmt::Display) {
        self.journal.lock().push(format!("{}:{}", self.label, event));
    }
}

impl FieldInterceptor for RecordingInterceptor {
    fn on_get(&self, _target: Option<&ObjectRef>, field: &str, value: Option<&Value>) -> Option<Value> {
        self.log(format_args!("get:{field}"));
        match &self.inject {
            Some(injected) => Some(injected.clone()),
            None => value.cloned(),
        }
    }

    fn on_set(&self, _target: Option<&ObjectRef>, field: &str, value: Option<&Value>) {
        let shown = value.map_or_else(|| "none".to_owned(), |v| format!("{v:?}"));
        self.log(format_args!("set:{field}={shown}"));
    }
}

impl MethodInterceptor for RecordingInterceptor {
    fn on_entry(&self, _target: Option<&ObjectRef>, method: &MethodSignature, arguments: &[Value]) {
        self.log(format_args!("entry:{}({})", method.name, arguments.len()));
    }

    fn on_exit(&self, _target: Option<&ObjectRef>, method: &MethodSignature, _result: Option<&Value>) {
        self.log(format_args!("exit:{}", method.name));
    }

    fn on_error(
        &self,
        _target: Option<&ObjectRef>,
        method: &MethodSignature,
        error: &(dyn std::error::Error + 'static),
    ) {
        self.log(format_args!("error:{}:{error}", method.name));
    }

    fn on_finally(&self, _target: Option<&ObjectRef>, method: &MethodSignature) {
        self.log(format_args!("finally:{}", method.name));
    }
}

/// Object built by [`TestClass`]
#[derive(Debug, Clone, PartialEq)]
pub struct TestObject {
    pub serial: usize,
    pub parameters: Vec<Value>,
}

/// Implementation class recording its constructor parameters
#[derive(Default)]
pub struct TestClass {
    built: AtomicUsize,
    fail: bool,
}

impl TestClass {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            built: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

impl ComponentClass for TestClass {
    fn class_name(&self) -> &str {
        "test.Component"
    }

    fn instantiate(&self, _instance: &InstanceManager, parameters: &[Value]) -> Result<ObjectRef, BoxError> {
        if self.fail {
            return Err("constructor exploded".into());
        }
        let serial = self.built.fetch_add(1, Ordering::SeqCst);
        Ok(ObjectRef::new(TestObject {
            serial,
            parameters: parameters.to_vec(),
        }))
    }
}

/// Metadata of a type requiring `handlers`, with the architecture and
/// callback handlers switched off
pub fn metadata(name: &str, handlers: &[&str]) -> ComponentMetadata {
    let mut metadata = ComponentMetadata::new("test.Component")
        .with_attribute("name", name)
        .with_attribute("architecture", "false")
        .with_attribute("immediate", "false");
    for handler in handlers {
        metadata = match handler.rsplit_once(':') {
            Some((namespace, local)) => metadata.with_element(Element::new(local).in_namespace(namespace)),
            None => metadata.with_element(Element::new(*handler)),
        };
    }
    metadata
}

/// Registry, name registry and journal shared by one test
pub struct Fixture {
    pub registry: Arc<InMemoryRegistry>,
    pub names: Arc<NameRegistry>,
    pub journal: Journal,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(InMemoryRegistry::new()),
            names: Arc::new(NameRegistry::new()),
            journal: journal(),
        }
    }

    pub fn provider(&self, name: &str) -> RecordingProvider {
        RecordingProvider::new(name, &self.journal)
    }

    /// Register `provider`, returning it with its registry reference
    pub fn publish(&self, provider: RecordingProvider) -> (Arc<RecordingProvider>, ProviderRef) {
        let provider = Arc::new(provider);
        let reference = self.registry.register(Arc::clone(&provider) as Arc<dyn HandlerProvider>);
        (provider, reference)
    }

    /// Build and start a Type Container
    pub fn factory(&self, metadata: ComponentMetadata) -> Arc<ComponentFactory> {
        let factory = ComponentFactory::builder(metadata, self.registry.clone(), Arc::clone(&self.names))
            .build()
            .expect("metadata should be well formed");
        factory.start().expect("factory should start");
        factory
    }

    /// Build and start a Type Container with an implementation class
    pub fn factory_with_class(&self, metadata: ComponentMetadata, class: Arc<dyn ComponentClass>) -> Arc<ComponentFactory> {
        let factory = ComponentFactory::builder(metadata, self.registry.clone(), Arc::clone(&self.names))
            .implementation(class)
            .build()
            .expect("metadata should be well formed");
        factory.start().expect("factory should start");
        factory
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
