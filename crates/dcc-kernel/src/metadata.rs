//! Component type metadata and the derivation of required handlers

use crate::error::{ContainerError, Result};
use crate::options::ContainerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Namespace assumed for handlers declared without one
pub const DEFAULT_NAMESPACE: &str = "dcc.core";

/// Element carrying instrumentation data; never a requirement
pub const MANIPULATION: &str = "manipulation";
/// Element declaring provided services
pub const PROVIDES: &str = "provides";
/// Introspection handler, attached unless `architecture="false"`
pub const ARCHITECTURE: &str = "architecture";
/// Lifecycle callback handler, attached to immediate components
pub const CALLBACK: &str = "callback";

/// Qualified handler name. Comparison ignores ASCII case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerName {
    /// Local name
    pub name: String,
    /// Namespace, `None` meaning [`DEFAULT_NAMESPACE`]
    pub namespace: Option<String>,
}

impl HandlerName {
    /// Handler in the default namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Handler in an explicit namespace
    pub fn qualified(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Parse `"ns:name"` or `"name"`. The namespace is everything before
    /// the last colon so URI namespaces survive.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.rsplit_once(':') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                Some(Self::qualified(ns, name))
            }
            Some(_) => None,
            None => Some(Self::new(raw)),
        }
    }

    /// Namespace with the default substituted
    #[must_use]
    pub fn effective_namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

impl PartialEq for HandlerName {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self
                .effective_namespace()
                .eq_ignore_ascii_case(other.effective_namespace())
    }
}

impl Eq for HandlerName {}

impl fmt::Display for HandlerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.effective_namespace(), self.name)
    }
}

/// Node of the metadata tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Element name
    pub name: String,
    /// Element namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Children
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<Element>,
}

impl Element {
    /// Element in the default namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the namespace
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a child element
    #[must_use]
    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    /// Attribute lookup
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Handler name this element requires
    #[must_use]
    pub fn handler_name(&self) -> HandlerName {
        HandlerName {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// Declaration of a component type.
///
/// Recognized attributes: `name`, `classname`, `version`, `architecture`,
/// `immediate`. Each child element names a handler the type requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    /// Type attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Handler configuration elements
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl ComponentMetadata {
    /// Metadata for an implementation class
    pub fn new(classname: impl Into<String>) -> Self {
        Self::default().with_attribute("classname", classname)
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a handler element
    #[must_use]
    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    /// Attribute lookup
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Implementation class name
    #[must_use]
    pub fn classname(&self) -> Option<&str> {
        self.attribute("classname")
    }

    /// Declared version
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.attribute("version")
    }

    /// Type name: `name`, falling back to the class name
    #[must_use]
    pub fn factory_name(&self) -> Option<&str> {
        self.attribute("name").or_else(|| self.classname())
    }

    /// First child element with the given name
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Validate the declaration
    ///
    /// # Errors
    ///
    /// [`ContainerError::TypeDefinition`] when the class name is missing.
    pub fn check(&self) -> Result<()> {
        match self.classname() {
            Some(c) if !c.trim().is_empty() => Ok(()),
            _ => Err(ContainerError::TypeDefinition(
                "a component needs a class name: missing 'classname' attribute".into(),
            )),
        }
    }

    /// Architecture handler wanted (default true)
    #[must_use]
    pub fn architecture_enabled(&self) -> bool {
        !matches!(self.attribute(ARCHITECTURE), Some(v) if v.eq_ignore_ascii_case("false"))
    }

    /// Immediate components are instantiated eagerly. Without an explicit
    /// attribute a component providing no service is immediate.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        match self.attribute("immediate") {
            Some(v) => v.eq_ignore_ascii_case("true"),
            None => self.element(PROVIDES).is_none(),
        }
    }

    /// Derive the ordered, duplicate-free list of required handlers
    #[must_use]
    pub fn required_handlers(&self, config: &ContainerConfig) -> Vec<HandlerName> {
        let mut list: Vec<HandlerName> = Vec::new();
        let mut push = |handler: HandlerName| {
            if !list.contains(&handler) {
                list.push(handler);
            }
        };

        for element in &self.elements {
            if element.name.eq_ignore_ascii_case(MANIPULATION) {
                continue;
            }
            push(element.handler_name());
        }

        if self.architecture_enabled() {
            push(HandlerName::new(ARCHITECTURE));
        }

        if self.is_immediate() {
            push(HandlerName::new(CALLBACK));
        }

        for handler in &config.auto_attached_handlers {
            push(handler.clone());
        }

        list
    }
}
