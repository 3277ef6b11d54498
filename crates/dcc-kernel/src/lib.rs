//! DCC Kernel (dcc-kernel) - dynamic component container
//!
//! Two containers cooperate:
//! 1. **Type Container** ([`ComponentFactory`]): tracks the handlers a
//!    component type requires, turns VALID when all are bound and creates
//!    named instances.
//! 2. **Instance Container** ([`InstanceManager`]): owns one instance's
//!    handlers, drives its lifecycle and dispatches field, method and
//!    constructor interception.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dcc_kernel::prelude::*;
//!
//! let registry = Arc::new(InMemoryRegistry::new());
//! registry.register(Arc::new(MyArchitectureProvider));
//!
//! let metadata = ComponentMetadata::new("org.acme.Clock").with_attribute("name", "clock");
//! let factory = ComponentFactory::builder(metadata, registry, Arc::new(NameRegistry::new())).build()?;
//! factory.start()?;
//!
//! let instance = factory.create_component_instance(Configuration::new())?;
//! assert_eq!(instance.state(), InstanceState::Valid);
//! ```

#![warn(missing_docs)]

// Core modules
pub mod config;
pub mod description;
pub mod error;
pub mod handler;
pub mod interception;
pub mod metadata;
pub mod options;
pub mod provider;
pub mod registry;
pub mod requirement;
pub mod state_machine;
pub mod types;

// Containers
pub mod factory;
pub mod instance;

// Test harness
#[allow(missing_docs)]
pub mod test_harness;

// Re-exports
pub use error::*;
pub use factory::{ComponentFactory, FactoryBuilder, FactoryStateListener};
pub use instance::{ComponentClass, InstanceManager, InstanceStateListener};
pub use types::*;

/// Re-export of the types most callers need
pub mod prelude {
    pub use crate::config::{Configuration, ObjectRef, Value};
    pub use crate::description::{ComponentTypeDescription, PropertyDescription};
    pub use crate::error::{BoxError, ContainerError, HandlerError};
    pub use crate::factory::{ComponentFactory, FactoryStateListener};
    pub use crate::handler::{Handler, HandlerContext};
    pub use crate::instance::{ComponentClass, InstanceManager, InstanceStateListener};
    pub use crate::interception::{ConstructorInjector, FieldInterceptor, MethodInterceptor, MethodSignature};
    pub use crate::metadata::{ComponentMetadata, Element, HandlerName};
    pub use crate::options::ContainerConfig;
    pub use crate::provider::{CapabilityRegistry, HandlerProvider, ProviderRef};
    pub use crate::registry::InMemoryRegistry;
    pub use crate::types::{FactoryState, InstanceState, Validity};
    pub use dcc_naming::NameRegistry;
    pub use std::sync::Arc;
}

/// Re-export test harness for external use
pub use test_harness::{run_simulator, SimulatorConfig, TestHarness};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if running with strict debugging enabled
#[must_use]
pub const fn strict_debug() -> bool {
    cfg!(feature = "strict-debug")
}
