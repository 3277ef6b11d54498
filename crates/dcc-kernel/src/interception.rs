//! Interception of field accesses, method invocations and construction
//!
//! Handlers register interceptors on an instance keyed by
//! [`InterceptionKey`]. The instance dispatches to them in registration
//! order, always outside its internal lock.

use crate::config::{ObjectRef, Value};
use crate::error::{ContainerError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Method name used for constructors
pub const CONSTRUCTOR: &str = "$init";

/// Type declaring an intercepted member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberOwner {
    /// The component implementation itself
    Component,
    /// A named inner or anonymous type of the implementation
    Inner(String),
}

/// Method identity: owner, name and argument type labels
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
    /// Declaring type
    pub owner: MemberOwner,
    /// Method name
    pub name: String,
    /// Argument type labels
    pub arguments: Vec<String>,
}

impl MethodSignature {
    /// Method of the component implementation
    pub fn new<S: Into<String>>(name: impl Into<String>, arguments: impl IntoIterator<Item = S>) -> Self {
        Self {
            owner: MemberOwner::Component,
            name: name.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    /// Method of an inner type
    pub fn inner<S: Into<String>>(
        owner: impl Into<String>,
        name: impl Into<String>,
        arguments: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            owner: MemberOwner::Inner(owner.into()),
            ..Self::new(name, arguments)
        }
    }

    /// Constructor with the given parameter types
    pub fn constructor<S: Into<String>>(arguments: impl IntoIterator<Item = S>) -> Self {
        Self::new(CONSTRUCTOR, arguments)
    }

    /// True for constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR
    }

    /// Flat identifier: `name` or `name$arg1$arg2`, prefixed by `Inner___`
    /// for inner types
    #[must_use]
    pub fn identifier(&self) -> String {
        let mut id = match &self.owner {
            MemberOwner::Component => String::new(),
            MemberOwner::Inner(owner) => format!("{owner}___"),
        };
        id.push_str(&self.name);
        for argument in &self.arguments {
            id.push('$');
            id.push_str(&argument.replace('.', "_"));
        }
        id
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let MemberOwner::Inner(owner) = &self.owner {
            write!(f, "{owner}::")?;
        }
        write!(f, "{}({})", self.name, self.arguments.join(", "))
    }
}

/// What an interceptor is registered on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InterceptionKey {
    /// A field by name
    Field(String),
    /// A method or constructor
    Method(MethodSignature),
}

/// Observes and may replace field values
pub trait FieldInterceptor: Send + Sync {
    /// Field read. Return the value to hand out; returning `value`
    /// unchanged means no opinion.
    fn on_get(&self, _target: Option<&ObjectRef>, _field: &str, value: Option<&Value>) -> Option<Value> {
        value.cloned()
    }

    /// Field written
    fn on_set(&self, _target: Option<&ObjectRef>, _field: &str, _value: Option<&Value>) {}
}

/// Observes method invocations
pub trait MethodInterceptor: Send + Sync {
    /// Before the body runs
    fn on_entry(&self, _target: Option<&ObjectRef>, _method: &MethodSignature, _arguments: &[Value]) {}

    /// After a normal return
    fn on_exit(&self, _target: Option<&ObjectRef>, _method: &MethodSignature, _result: Option<&Value>) {}

    /// After a failure
    fn on_error(
        &self,
        _target: Option<&ObjectRef>,
        _method: &MethodSignature,
        _error: &(dyn std::error::Error + 'static),
    ) {
    }

    /// After `on_exit` or `on_error`, always
    fn on_finally(&self, _target: Option<&ObjectRef>, _method: &MethodSignature) {}
}

/// Supplies one constructor parameter
pub trait ConstructorInjector: Send + Sync {
    /// Value for parameter `index`
    fn constructor_parameter(&self, index: usize) -> Option<Value>;

    /// Type label of parameter `index`
    fn constructor_parameter_type(&self, _index: usize) -> Option<String> {
        None
    }
}

fn same_target<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Per-instance interceptor registrations
#[derive(Default)]
pub(crate) struct InterceptorTable {
    fields: HashMap<String, Vec<Arc<dyn FieldInterceptor>>>,
    methods: HashMap<MethodSignature, Vec<Arc<dyn MethodInterceptor>>>,
    constructors: BTreeMap<usize, Arc<dyn ConstructorInjector>>,
}

impl InterceptorTable {
    /// Returns false when this interceptor was already registered on the field
    pub(crate) fn register_field(&mut self, field: String, interceptor: Arc<dyn FieldInterceptor>) -> bool {
        let list = self.fields.entry(field).or_default();
        if list.iter().any(|i| same_target(i, &interceptor)) {
            return false;
        }
        list.push(interceptor);
        true
    }

    pub(crate) fn register_method(
        &mut self,
        method: MethodSignature,
        interceptor: Arc<dyn MethodInterceptor>,
    ) -> bool {
        let list = self.methods.entry(method).or_default();
        if list.iter().any(|i| same_target(i, &interceptor)) {
            return false;
        }
        list.push(interceptor);
        true
    }

    pub(crate) fn register_constructor(
        &mut self,
        index: usize,
        injector: Arc<dyn ConstructorInjector>,
    ) -> Result<()> {
        if self.constructors.contains_key(&index) {
            return Err(ContainerError::ConstructorParameter(format!(
                "another constructor injector already manages parameter {index}"
            )));
        }
        self.constructors.insert(index, injector);
        Ok(())
    }

    pub(crate) fn field_interceptors(&self, field: &str) -> Vec<Arc<dyn FieldInterceptor>> {
        self.fields.get(field).cloned().unwrap_or_default()
    }

    pub(crate) fn method_interceptors(&self, method: &MethodSignature) -> Vec<Arc<dyn MethodInterceptor>> {
        self.methods.get(method).cloned().unwrap_or_default()
    }

    pub(crate) fn keys(&self) -> Vec<InterceptionKey> {
        let mut fields: Vec<&String> = self.fields.keys().collect();
        fields.sort();
        let mut methods: Vec<&MethodSignature> = self.methods.keys().collect();
        methods.sort();

        fields
            .into_iter()
            .map(|f| InterceptionKey::Field(f.clone()))
            .chain(methods.into_iter().map(|m| InterceptionKey::Method(m.clone())))
            .collect()
    }

    /// Registered indices must be exactly `0..n`
    pub(crate) fn check_constructor_parameters(&self) -> Result<()> {
        for (expected, index) in self.constructors.keys().enumerate() {
            if *index != expected {
                return Err(ContainerError::ConstructorParameter(format!(
                    "the constructor parameter {expected} is not managed"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn constructor_injectors(&self) -> Vec<(usize, Arc<dyn ConstructorInjector>)> {
        self.constructors
            .iter()
            .map(|(i, inj)| (*i, Arc::clone(inj)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl FieldInterceptor for Noop {}
    impl MethodInterceptor for Noop {}

    struct Fixed(i64);
    impl ConstructorInjector for Fixed {
        fn constructor_parameter(&self, _index: usize) -> Option<Value> {
            Some(Value::Int(self.0))
        }
    }

    #[test]
    fn test_signature_identifier() {
        assert_eq!(MethodSignature::new("run", Vec::<String>::new()).identifier(), "run");
        assert_eq!(
            MethodSignature::new("put", ["std.string.String", "int"]).identifier(),
            "put$std_string_String$int"
        );
        assert_eq!(
            MethodSignature::inner("Worker", "call", Vec::<String>::new()).identifier(),
            "Worker___call"
        );
        assert!(MethodSignature::constructor(["int"]).is_constructor());
    }

    #[test]
    fn test_registration_dedupes_by_identity() {
        let mut table = InterceptorTable::default();
        let shared = Arc::new(Noop);

        assert!(table.register_field("f".into(), shared.clone()));
        assert!(!table.register_field("f".into(), shared.clone()));
        assert!(table.register_field("f".into(), Arc::new(Noop)));
        assert_eq!(table.field_interceptors("f").len(), 2);

        let m = MethodSignature::new("m", Vec::<String>::new());
        assert!(table.register_method(m.clone(), shared.clone()));
        assert!(!table.register_method(m.clone(), shared));
        assert_eq!(table.method_interceptors(&m).len(), 1);
    }

    #[test]
    fn test_constructor_parameters_contiguous() {
        let mut table = InterceptorTable::default();
        table.register_constructor(0, Arc::new(Fixed(1))).unwrap();
        table.register_constructor(2, Arc::new(Fixed(3))).unwrap();

        let err = table.check_constructor_parameters().unwrap_err();
        assert!(err.to_string().contains("parameter 1 is not managed"));

        table.register_constructor(1, Arc::new(Fixed(2))).unwrap();
        assert!(table.check_constructor_parameters().is_ok());
        assert!(table.register_constructor(1, Arc::new(Fixed(9))).is_err());
    }

    #[test]
    fn test_keys_sorted() {
        let mut table = InterceptorTable::default();
        table.register_field("b".into(), Arc::new(Noop));
        table.register_field("a".into(), Arc::new(Noop));
        table.register_method(MethodSignature::new("m", Vec::<String>::new()), Arc::new(Noop));

        assert_eq!(
            table.keys(),
            vec![
                InterceptionKey::Field("a".into()),
                InterceptionKey::Field("b".into()),
                InterceptionKey::Method(MethodSignature::new("m", Vec::<String>::new())),
            ]
        );
    }
}
