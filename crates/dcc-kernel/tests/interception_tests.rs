use dcc_kernel::config::{Configuration, Value};
use dcc_kernel::error::HandlerError;
use dcc_kernel::handler::{Handler, HandlerContext};
use dcc_kernel::interception::{ConstructorInjector, InterceptionKey, MethodSignature};
use dcc_kernel::metadata::ComponentMetadata;
use dcc_kernel::provider::HandlerProvider;
use dcc_kernel::types::InstanceState;
use dcc_kernel::ContainerError;
use dcc_test_utils::{entries, metadata, Fixture, RecordingInterceptor, TestClass, TestObject};
use pretty_assertions::assert_eq;
use std::io;
use std::sync::Arc;

/// Supplies a fixed value for one constructor parameter
struct Fixed(Value);

impl ConstructorInjector for Fixed {
    fn constructor_parameter(&self, _index: usize) -> Option<Value> {
        Some(self.0.clone())
    }
}

/// Provider whose handlers register constructor injectors on init
struct InjectingProvider {
    parameters: Vec<(usize, Value)>,
}

struct InjectingHandler {
    parameters: Vec<(usize, Value)>,
}

impl HandlerProvider for InjectingProvider {
    fn name(&self) -> &str {
        "ctor"
    }

    fn create_handler(&self) -> Result<Arc<dyn Handler>, HandlerError> {
        Ok(Arc::new(InjectingHandler {
            parameters: self.parameters.clone(),
        }))
    }
}

impl Handler for InjectingHandler {
    fn init(
        &self,
        context: &HandlerContext,
        _metadata: &ComponentMetadata,
        _configuration: &Configuration,
    ) -> Result<(), HandlerError> {
        let Some(instance) = context.instance() else {
            return Err(HandlerError::Configuration("instance gone".into()));
        };
        for (index, value) in &self.parameters {
            instance
                .register_constructor_injector(*index, Arc::new(Fixed(value.clone())))
                .map_err(|e| HandlerError::Configuration(e.to_string()))?;
        }
        Ok(())
    }
}

fn injecting_fixture(parameters: Vec<(usize, Value)>) -> Fixture {
    let fx = Fixture::new();
    fx.publish(fx.provider("a"));
    fx.registry.register(Arc::new(InjectingProvider { parameters }));
    fx
}

fn instance_fixture() -> (Fixture, Arc<dcc_kernel::InstanceManager>) {
    let fx = Fixture::new();
    fx.publish(fx.provider("a"));
    let factory = fx.factory(metadata("clock", &["a"]));
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    fx.clear_journal();
    (fx, instance)
}

fn tick() -> MethodSignature {
    MethodSignature::new("tick", ["int"])
}

#[test]
fn test_field_access_reaches_interceptors() {
    let (fx, instance) = instance_fixture();
    instance.register_field_interceptor("count", RecordingInterceptor::new("x", &fx.journal));

    instance.on_set(None, "count", Some(Value::Int(3)));
    assert_eq!(instance.on_get(None, "count"), Some(Value::Int(3)));
    assert_eq!(instance.field_value("count"), Some(Value::Int(3)));

    assert_eq!(fx.journal(), vec!["x:set:count=Int(3)", "x:get:count"]);
}

#[test]
fn test_unintercepted_field_reads_stored_value() {
    let (fx, instance) = instance_fixture();
    assert_eq!(instance.on_get(None, "free"), None);
    instance.on_set(None, "free", Some(Value::from("v")));
    assert_eq!(instance.on_get(None, "free"), Some(Value::from("v")));
    assert!(fx.journal().is_empty());
}

#[test]
fn test_injected_value_is_stored_and_announced() {
    let (fx, instance) = instance_fixture();
    instance.register_field_interceptor("count", RecordingInterceptor::new("plain", &fx.journal));
    instance.register_field_interceptor(
        "count",
        RecordingInterceptor::injecting("inj", &fx.journal, 9),
    );

    assert_eq!(instance.on_get(None, "count"), Some(Value::Int(9)));
    assert_eq!(instance.field_value("count"), Some(Value::Int(9)));
    assert_eq!(
        fx.journal(),
        vec![
            "plain:get:count",
            "inj:get:count",
            "plain:set:count=Int(9)",
            "inj:set:count=Int(9)",
        ]
    );

    // the stored value now matches the injection, nothing to announce
    fx.clear_journal();
    assert_eq!(instance.on_get(None, "count"), Some(Value::Int(9)));
    assert!(entries(&fx.journal, "plain:set").is_empty());
}

#[test]
fn test_conflicting_injections_last_wins() {
    let (fx, instance) = instance_fixture();
    instance.register_field_interceptor("count", RecordingInterceptor::injecting("one", &fx.journal, 1));
    instance.register_field_interceptor("count", RecordingInterceptor::injecting("two", &fx.journal, 2));

    assert_eq!(instance.on_get(None, "count"), Some(Value::Int(2)));
    assert_eq!(instance.field_value("count"), Some(Value::Int(2)));
}

#[test]
fn test_duplicate_registration_is_ignored() {
    let (fx, instance) = instance_fixture();
    let interceptor = RecordingInterceptor::new("x", &fx.journal);
    instance.register_field_interceptor("count", interceptor.clone());
    instance.register_field_interceptor("count", interceptor.clone());
    instance.register_method_interceptor(tick(), interceptor.clone());
    instance.register_method_interceptor(tick(), interceptor);

    instance.on_get(None, "count");
    instance.on_entry(None, &tick(), &[Value::Int(1)]);

    assert_eq!(fx.journal(), vec!["x:get:count", "x:entry:tick(1)"]);
}

#[test]
fn test_method_success_dispatch_order() {
    let (fx, instance) = instance_fixture();
    instance.register_method_interceptor(tick(), RecordingInterceptor::new("m1", &fx.journal));
    instance.register_method_interceptor(tick(), RecordingInterceptor::new("m2", &fx.journal));

    let result = instance.invoke(None, &tick(), &[Value::Int(1)], || {
        Ok::<_, io::Error>(Some(Value::Int(2)))
    });

    assert_eq!(result.unwrap(), Some(Value::Int(2)));
    assert_eq!(
        fx.journal(),
        vec![
            "m1:entry:tick(1)",
            "m2:entry:tick(1)",
            "m1:exit:tick",
            "m2:exit:tick",
            "m1:finally:tick",
            "m2:finally:tick",
        ]
    );
}

#[test]
fn test_method_error_dispatch_order() {
    let (fx, instance) = instance_fixture();
    instance.register_method_interceptor(tick(), RecordingInterceptor::new("m1", &fx.journal));
    instance.register_method_interceptor(tick(), RecordingInterceptor::new("m2", &fx.journal));

    let result = instance.invoke(None, &tick(), &[Value::Int(1)], || {
        Err::<Option<Value>, _>(io::Error::new(io::ErrorKind::Other, "boom"))
    });

    assert_eq!(result.unwrap_err().to_string(), "boom");
    assert_eq!(
        fx.journal(),
        vec![
            "m1:entry:tick(1)",
            "m2:entry:tick(1)",
            "m1:error:tick:boom",
            "m2:error:tick:boom",
            "m1:finally:tick",
            "m2:finally:tick",
        ]
    );
}

#[test]
fn test_interceptors_are_per_signature() {
    let (fx, instance) = instance_fixture();
    instance.register_method_interceptor(tick(), RecordingInterceptor::new("m", &fx.journal));

    let other = MethodSignature::new("tick", ["string"]);
    let result = instance.invoke(None, &other, &[], || Ok::<_, io::Error>(None));

    assert_eq!(result.unwrap(), None);
    assert!(fx.journal().is_empty());
}

#[test]
fn test_registered_members_sorted() {
    let (fx, instance) = instance_fixture();
    let interceptor = RecordingInterceptor::new("x", &fx.journal);
    let inner = MethodSignature::inner("Worker", "run", Vec::<String>::new());
    instance.register_interceptor(&["zeta", "alpha"], &[tick(), inner.clone()], &interceptor);

    assert_eq!(
        instance.registered_members(),
        vec![
            InterceptionKey::Field("alpha".into()),
            InterceptionKey::Field("zeta".into()),
            InterceptionKey::Method(tick()),
            InterceptionKey::Method(inner),
        ]
    );
}

#[test]
fn test_constructor_parameters_injected() {
    let fx = injecting_fixture(vec![(1, Value::Int(2)), (0, Value::from("alpha"))]);
    let class = TestClass::new();
    let factory = fx.factory_with_class(metadata("clock", &["a", "ctor"]), class.clone());
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    let constructor = MethodSignature::constructor(["string", "int"]);
    instance.register_method_interceptor(constructor, RecordingInterceptor::new("c", &fx.journal));
    fx.clear_journal();

    let object = instance.implementation_object().unwrap();

    let built = object.downcast_ref::<TestObject>().unwrap();
    assert_eq!(built.serial, 0);
    assert_eq!(built.parameters, vec![Value::from("alpha"), Value::Int(2)]);
    assert_eq!(
        fx.journal(),
        vec!["c:entry:$init(2)", "c:exit:$init", "c:finally:$init", "a:creation"]
    );

    // the first object is reused
    assert_eq!(instance.implementation_object().unwrap(), object);
    assert_eq!(class.built(), 1);
}

#[test]
fn test_additional_objects_tracked_until_deleted() {
    let fx = injecting_fixture(vec![(0, Value::Int(1))]);
    let class = TestClass::new();
    let factory = fx.factory_with_class(metadata("clock", &["a", "ctor"]), class.clone());
    let instance = factory.create_component_instance(Configuration::new()).unwrap();

    let first = instance.implementation_object().unwrap();
    let second = instance.create_implementation_object().unwrap();
    assert_eq!(second.downcast_ref::<TestObject>().unwrap().serial, 1);
    assert_eq!(instance.implementation_objects(), vec![first.clone(), second.clone()]);
    assert_eq!(entries(&fx.journal, "a:creation").len(), 2);

    assert!(instance.delete_implementation_object(&first));
    assert!(!instance.delete_implementation_object(&first));
    assert_eq!(instance.implementation_object().unwrap(), second);

    // objects are dropped on stop
    instance.stop();
    assert!(instance.implementation_objects().is_empty());
}

#[test]
fn test_constructor_gap_rejects_instance() {
    let fx = injecting_fixture(vec![(1, Value::Int(2))]);
    let factory = fx.factory_with_class(metadata("clock", &["a", "ctor"]), TestClass::new());

    let err = factory.create_component_instance(Configuration::new()).unwrap_err();

    assert!(matches!(err, ContainerError::ConstructorParameter(_)));
    assert_eq!(factory.instance_count(), 0);
    assert!(fx.names.is_empty());
}

#[test]
fn test_duplicate_constructor_index_rejected() {
    let fx = injecting_fixture(vec![(0, Value::Int(1))]);
    let factory = fx.factory_with_class(metadata("clock", &["a", "ctor"]), TestClass::new());
    let instance = factory.create_component_instance(Configuration::new()).unwrap();

    let result = instance.register_constructor_injector(0, Arc::new(Fixed(Value::Int(5))));

    assert!(matches!(result, Err(ContainerError::ConstructorParameter(_))));
    let object = instance.implementation_object().unwrap();
    assert_eq!(object.downcast_ref::<TestObject>().unwrap().parameters, vec![Value::Int(1)]);
}

#[test]
fn test_failing_constructor_stops_instance() {
    let fx = Fixture::new();
    fx.publish(fx.provider("a"));
    let factory = fx.factory_with_class(metadata("clock", &["a"]), TestClass::failing());
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    instance.register_method_interceptor(
        MethodSignature::constructor(Vec::<String>::new()),
        RecordingInterceptor::new("c", &fx.journal),
    );
    fx.clear_journal();

    let err = instance.implementation_object().unwrap_err();

    assert!(matches!(err, ContainerError::Configuration(_)));
    assert_eq!(instance.state(), InstanceState::Stopped);
    assert_eq!(
        entries(&fx.journal, "c:"),
        vec!["c:entry:$init(0)", "c:error:$init:constructor exploded", "c:finally:$init"]
    );
    assert!(entries(&fx.journal, "a:creation").is_empty());
}

#[test]
fn test_object_requires_implementation_class() {
    let (_fx, instance) = instance_fixture();

    let err = instance.implementation_object().unwrap_err();

    assert!(matches!(err, ContainerError::Configuration(_)));
    assert_eq!(instance.state(), InstanceState::Valid);
}
