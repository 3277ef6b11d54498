//! Component type description, computed once per Type Container

use crate::config::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A configurable property of a component type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescription {
    /// Property key
    pub name: String,
    /// Declared type label
    pub type_name: String,
    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Must be supplied when no default exists
    #[serde(default)]
    pub mandatory: bool,
    /// Instance configurations may not override it
    #[serde(default)]
    pub immutable: bool,
}

impl PropertyDescription {
    /// Optional property without default
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: None,
            mandatory: false,
            immutable: false,
        }
    }

    /// Set the default value
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Mark mandatory
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Mark immutable
    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }
}

/// Introspection data of a component type.
///
/// Handlers contribute properties and free-form info through
/// `initialize_component_factory` while the Type Container first turns valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentTypeDescription {
    /// Type Container name
    pub factory_name: String,
    /// Implementation class name
    pub class_name: String,
    /// Declared version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Qualified names of the required handlers, in binding order
    pub required_handlers: Vec<String>,
    /// Configurable properties
    pub properties: Vec<PropertyDescription>,
    /// Handler contributions keyed by handler-chosen names
    #[serde(default)]
    pub handler_info: BTreeMap<String, Value>,
}

impl ComponentTypeDescription {
    /// Empty description of a type
    pub fn new(
        factory_name: impl Into<String>,
        class_name: impl Into<String>,
        version: Option<String>,
        required_handlers: Vec<String>,
    ) -> Self {
        Self {
            factory_name: factory_name.into(),
            class_name: class_name.into(),
            version,
            required_handlers,
            properties: Vec::new(),
            handler_info: BTreeMap::new(),
        }
    }

    /// Add a property, replacing one with the same name
    pub fn add_property(&mut self, property: PropertyDescription) {
        if let Some(existing) = self.properties.iter_mut().find(|p| p.name == property.name) {
            *existing = property;
        } else {
            self.properties.push(property);
        }
    }

    /// Property lookup
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDescription> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Record handler-specific information
    pub fn add_handler_info(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.handler_info.insert(key.into(), value.into());
    }

    /// Flat property set suitable for publishing the type
    #[must_use]
    pub fn properties_to_publish(&self) -> BTreeMap<String, Value> {
        let mut published = BTreeMap::new();
        published.insert("factory.name".to_string(), Value::from(self.factory_name.as_str()));
        published.insert("component.class".to_string(), Value::from(self.class_name.as_str()));
        if let Some(version) = &self.version {
            published.insert("factory.version".to_string(), Value::from(version.as_str()));
        }
        published.insert(
            "component.properties".to_string(),
            Value::List(
                self.properties
                    .iter()
                    .map(|p| Value::from(p.name.as_str()))
                    .collect(),
            ),
        );
        published.insert(
            "handlers.required".to_string(),
            Value::List(
                self.required_handlers
                    .iter()
                    .map(|h| Value::from(h.as_str()))
                    .collect(),
            ),
        );
        published
    }
}
