// Test harness module
// Churn simulator, stress runs and stub handlers

pub mod simulator;

pub use simulator::*;

use crate::config::{Configuration, Value};
use crate::description::ComponentTypeDescription;
use crate::error::{ContainerError, HandlerError, Result};
use crate::factory::ComponentFactory;
use crate::handler::Handler;
use crate::metadata::{ComponentMetadata, HandlerName};
use crate::options::ContainerConfig;
use crate::provider::HandlerProvider;
use crate::registry::InMemoryRegistry;
use dcc_naming::NameRegistry;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Provider of no-op handlers, counting description contributions
#[derive(Debug)]
pub struct StubProvider {
    name: String,
    namespace: Option<String>,
    level: Option<i32>,
    initializations: Arc<AtomicUsize>,
}

impl StubProvider {
    /// Provider for `handler`
    #[must_use]
    pub fn new(handler: &HandlerName) -> Self {
        Self {
            name: handler.name.clone(),
            namespace: handler.namespace.clone(),
            level: None,
            initializations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the priority
    #[must_use]
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = Some(level);
        self
    }

    /// Number of `initialize_component_factory` calls on its handlers
    #[must_use]
    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

impl HandlerProvider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn level(&self) -> Option<i32> {
        self.level
    }

    fn create_handler(&self) -> std::result::Result<Arc<dyn Handler>, HandlerError> {
        Ok(Arc::new(StubHandler {
            name: self.name.clone(),
            initializations: Arc::clone(&self.initializations),
        }))
    }
}

struct StubHandler {
    name: String,
    initializations: Arc<AtomicUsize>,
}

impl Handler for StubHandler {
    fn initialize_component_factory(
        &self,
        description: &mut ComponentTypeDescription,
        _metadata: &ComponentMetadata,
    ) -> std::result::Result<(), HandlerError> {
        self.initializations.fetch_add(1, Ordering::SeqCst);
        description.add_handler_info(format!("handler.{}", self.name), Value::from("stub"));
        Ok(())
    }
}

/// Test harness for stress runs and type descriptions
pub struct TestHarness;

impl TestHarness {
    /// Create `instances` auto-named instances of one type and verify
    /// their names are unique and released on disposal
    #[must_use]
    pub fn run_stress_test(instances: usize) -> StressTestReport {
        println!("Running stress test with {instances} instances");
        let start = Instant::now();

        let registry = Arc::new(InMemoryRegistry::new());
        let names = Arc::new(NameRegistry::new());
        let metadata = ComponentMetadata::new("stress.Component")
            .with_attribute("name", "stress")
            .with_attribute("architecture", "false");

        let outcome = (|| -> Result<(usize, usize)> {
            for handler in metadata.required_handlers(&ContainerConfig::default()) {
                registry.register(Arc::new(StubProvider::new(&handler)));
            }
            let factory = ComponentFactory::builder(metadata.clone(), registry.clone(), names.clone()).build()?;
            factory.start()?;

            let mut seen = HashSet::with_capacity(instances);
            for _ in 0..instances {
                let instance = factory.create_component_instance(Configuration::new())?;
                seen.insert(instance.name().to_owned());
            }
            let unique = seen.len();

            factory.stop();
            Ok((unique, names.len()))
        })();

        let elapsed_ms = start.elapsed().as_millis();
        match outcome {
            Ok((unique_names, leaked_names)) => StressTestReport {
                instances,
                unique_names,
                leaked_names,
                elapsed_ms,
                success: unique_names == instances && leaked_names == 0,
            },
            Err(e) => {
                tracing::error!("Stress test aborted: {}", e);
                StressTestReport {
                    instances,
                    unique_names: 0,
                    leaked_names: names.len(),
                    elapsed_ms,
                    success: false,
                }
            }
        }
    }

    /// Compute a type description with stub providers for every handler
    ///
    /// # Errors
    ///
    /// Malformed metadata or a failed description.
    pub fn describe(metadata: ComponentMetadata, config: ContainerConfig) -> Result<ComponentTypeDescription> {
        let registry = Arc::new(InMemoryRegistry::new());
        for handler in metadata.required_handlers(&config) {
            registry.register(Arc::new(StubProvider::new(&handler)));
        }

        let factory = ComponentFactory::builder(metadata, registry, Arc::new(NameRegistry::new()))
            .config(config)
            .build()?;
        factory.start()?;

        let description = factory
            .component_description()
            .ok_or_else(|| ContainerError::MissingHandler(factory.missing_handlers()))?;
        factory.dispose();
        Ok((*description).clone())
    }
}

/// Report from a stress test
#[derive(Debug, Clone)]
pub struct StressTestReport {
    pub instances: usize,
    pub unique_names: usize,
    pub leaked_names: usize,
    pub elapsed_ms: u128,
    pub success: bool,
}
