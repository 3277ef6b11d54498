//! Instance configuration: string keys to dynamically typed values

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Requested instance name
pub const INSTANCE_NAME: &str = "instance.name";
/// Deprecated spelling of [`INSTANCE_NAME`]
pub const LEGACY_NAME: &str = "name";
/// Version qualifier used when the requested name is taken
pub const FACTORY_VERSION: &str = "factory.version";
/// Opaque context handed to handlers
pub const INSTANCE_CONTEXT: &str = "instance.context";
/// Pre-built implementation object adopted instead of constructing one
pub const INSTANCE_OBJECT: &str = "instance.object";

/// Shared reference to an opaque object (contexts, implementation objects).
///
/// Equality is identity.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);

impl ObjectRef {
    /// Wrap a value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap an existing shared value
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    /// Borrow as a concrete type
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Share as a concrete type
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    /// Identity comparison
    #[must_use]
    pub fn same(&self, other: &ObjectRef) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0).cast::<()>(),
            Arc::as_ptr(&other.0).cast::<()>(),
        )
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// Dynamically typed configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Explicit absence
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// String
    Str(String),
    /// Ordered list
    List(Vec<Value>),
    /// Nested map
    Map(BTreeMap<String, Value>),
    /// Opaque object, never serialized
    #[serde(skip)]
    Object(ObjectRef),
}

impl Value {
    /// True for [`Value::Null`]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// String view
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean view; accepts `"true"`/`"false"` strings
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Object view
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Short type label used in descriptions
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

/// Configuration of one instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    properties: HashMap<String, Value>,
}

impl Configuration {
    /// Empty configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a property
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(key.into(), value.into())
    }

    /// Remove a property
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    /// Property value, treating [`Value::Null`] as absent
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|v| !v.is_null())
    }

    /// Present and not null
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// String property
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Object property
    #[must_use]
    pub fn get_object(&self, key: &str) -> Option<&ObjectRef> {
        self.get(key).and_then(Value::as_object)
    }

    /// Value of [`INSTANCE_NAME`]
    #[must_use]
    pub fn instance_name(&self) -> Option<&str> {
        self.get_str(INSTANCE_NAME)
    }

    /// Set [`INSTANCE_NAME`]
    pub fn set_instance_name(&mut self, name: impl Into<String>) {
        self.insert(INSTANCE_NAME, Value::Str(name.into()));
    }

    /// Value of [`FACTORY_VERSION`]
    #[must_use]
    pub fn factory_version(&self) -> Option<&str> {
        self.get_str(FACTORY_VERSION)
    }

    /// Value of [`INSTANCE_CONTEXT`]
    #[must_use]
    pub fn context(&self) -> Option<&ObjectRef> {
        self.get_object(INSTANCE_CONTEXT)
    }

    /// Value of [`INSTANCE_OBJECT`]
    #[must_use]
    pub fn object(&self) -> Option<&ObjectRef> {
        self.get_object(INSTANCE_OBJECT)
    }

    /// Iterate over all properties, nulls included
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.properties.iter()
    }

    /// Number of properties
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// True when empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            properties: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
