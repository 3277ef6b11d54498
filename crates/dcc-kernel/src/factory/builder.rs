use super::{ComponentFactory, FactoryCore};
use crate::error::Result;
use crate::instance::ComponentClass;
use crate::metadata::ComponentMetadata;
use crate::options::ContainerConfig;
use crate::provider::CapabilityRegistry;
use crate::requirement::RequiredHandler;
use dcc_naming::{NameRegistry, UniquenessNameGenerator};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Builder for [`ComponentFactory`]
pub struct FactoryBuilder {
    metadata: ComponentMetadata,
    registry: Arc<dyn CapabilityRegistry>,
    names: Arc<NameRegistry>,
    config: ContainerConfig,
    class: Option<Arc<dyn ComponentClass>>,
}

impl FactoryBuilder {
    pub(super) fn new(
        metadata: ComponentMetadata,
        registry: Arc<dyn CapabilityRegistry>,
        names: Arc<NameRegistry>,
    ) -> Self {
        Self {
            metadata,
            registry,
            names,
            config: ContainerConfig::default(),
            class: None,
        }
    }

    /// Container-wide options (auto-attached handlers)
    #[must_use]
    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Implementation class used to construct objects
    #[must_use]
    pub fn implementation(mut self, class: Arc<dyn ComponentClass>) -> Self {
        self.class = Some(class);
        self
    }

    /// Validate the metadata and build a stopped Type Container
    ///
    /// # Errors
    ///
    /// [`crate::ContainerError::TypeDefinition`] when the metadata lacks a
    /// class name.
    pub fn build(self) -> Result<Arc<ComponentFactory>> {
        self.metadata.check()?;

        let class_name = self.metadata.classname().unwrap_or_default().to_owned();
        let name = self
            .metadata
            .factory_name()
            .unwrap_or(class_name.as_str())
            .to_owned();
        let version = self.metadata.version().map(str::to_owned);
        let requirements: Vec<RequiredHandler> = self
            .metadata
            .required_handlers(&self.config)
            .into_iter()
            .map(RequiredHandler::new)
            .collect();

        tracing::debug!(
            "Factory {} requires: {}",
            name,
            requirements
                .iter()
                .map(RequiredHandler::full_name)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let generator = UniquenessNameGenerator::for_type(&name, Arc::clone(&self.names));

        Ok(Arc::new_cyclic(|self_ref| ComponentFactory {
            name,
            class_name,
            version,
            metadata: self.metadata,
            config: self.config,
            registry: self.registry,
            names: self.names,
            generator,
            class: self.class,
            self_ref: self_ref.clone(),
            valid: AtomicBool::new(false),
            core: ReentrantMutex::new(RefCell::new(FactoryCore {
                requirements,
                ..FactoryCore::default()
            })),
        }))
    }
}
