//! Implementation objects and intercepted construction

use super::InstanceManager;
use crate::config::{ObjectRef, Value};
use crate::error::{BoxError, ContainerError, Result};
use crate::interception::MethodSignature;
use tracing::{debug, error};

/// Builds implementation objects of a component type
pub trait ComponentClass: Send + Sync {
    /// Implementation class name
    fn class_name(&self) -> &str;

    /// Construct an object from the injected constructor parameters
    ///
    /// # Errors
    ///
    /// Any construction failure; the instance is stopped.
    fn instantiate(&self, instance: &InstanceManager, parameters: &[Value]) -> std::result::Result<ObjectRef, BoxError>;
}

impl InstanceManager {
    /// Implementation objects created or adopted since the last start
    #[must_use]
    pub fn implementation_objects(&self) -> Vec<ObjectRef> {
        self.core.lock().objects.clone()
    }

    /// First implementation object, creating one when none exists
    ///
    /// # Errors
    ///
    /// See [`Self::create_implementation_object`].
    pub fn implementation_object(&self) -> Result<ObjectRef> {
        let _creation = self.creation.lock();
        if let Some(existing) = self.core.lock().objects.first().cloned() {
            return Ok(existing);
        }
        self.create_and_track()
    }

    /// Create an additional implementation object
    ///
    /// # Errors
    ///
    /// [`ContainerError::Configuration`] when no implementation class is
    /// attached or construction fails; the instance is stopped in the
    /// latter case.
    pub fn create_implementation_object(&self) -> Result<ObjectRef> {
        let _creation = self.creation.lock();
        self.create_and_track()
    }

    /// Forget an implementation object; returns whether it was tracked
    pub fn delete_implementation_object(&self, object: &ObjectRef) -> bool {
        let mut core = self.core.lock();
        let before = core.objects.len();
        core.objects.retain(|o| o != object);
        core.objects.len() != before
    }

    fn create_and_track(&self) -> Result<ObjectRef> {
        let object = self.create_object()?;
        self.core.lock().objects.push(object.clone());
        self.notify_creation(&object);
        Ok(object)
    }

    /// Collect constructor parameters from the injectors and construct,
    /// dispatching constructor entry and exit or error.
    fn create_object(&self) -> Result<ObjectRef> {
        let Some(class) = self.class.clone() else {
            return Err(ContainerError::configuration(format!(
                "{}: no implementation class attached",
                self.name
            )));
        };

        let injectors = self.core.lock().interceptors.constructor_injectors();
        let parameters: Vec<Value> = injectors
            .iter()
            .map(|(index, injector)| injector.constructor_parameter(*index).unwrap_or(Value::Null))
            .collect();
        let signature = MethodSignature::constructor(injectors.iter().zip(&parameters).map(
            |((index, injector), value)| {
                injector
                    .constructor_parameter_type(*index)
                    .unwrap_or_else(|| value.type_name().to_owned())
            },
        ));

        self.on_entry(None, &signature, &parameters);
        match class.instantiate(self, &parameters) {
            Ok(object) => {
                self.on_exit(Some(&object), &signature, Some(&Value::Object(object.clone())));
                debug!("{}: created {} object", self.name, class.class_name());
                Ok(object)
            }
            Err(e) => {
                self.on_error(None, &signature, &*e);
                error!("{}: cannot create {} object: {}", self.name, class.class_name(), e);
                self.stop();
                Err(ContainerError::configuration(format!(
                    "{}: cannot create {} object: {e}",
                    self.name,
                    class.class_name()
                )))
            }
        }
    }
}
