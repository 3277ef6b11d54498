use dcc_kernel::config::{Configuration, ObjectRef, INSTANCE_CONTEXT, INSTANCE_OBJECT};
use dcc_kernel::instance::{InstanceManager, InstanceStateListener};
use dcc_kernel::types::{InstanceState, Validity};
use dcc_kernel::ContainerError;
use dcc_test_utils::{entries, metadata, Behavior, Fixture};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct StateLog(Mutex<Vec<InstanceState>>);

impl InstanceStateListener for StateLog {
    fn state_changed(&self, _instance: &InstanceManager, state: InstanceState) {
        self.0.lock().push(state);
    }
}

fn two_handler_fixture() -> (Fixture, Arc<dcc_kernel::ComponentFactory>) {
    let fx = Fixture::new();
    fx.publish(fx.provider("a"));
    fx.publish(fx.provider("b"));
    let factory = fx.factory(metadata("clock", &["a", "b"]));
    fx.clear_journal();
    (fx, factory)
}

#[test]
fn test_stop_and_restart_order() {
    let (fx, factory) = two_handler_fixture();
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    assert!(instance.is_started());
    fx.clear_journal();

    instance.stop();
    assert_eq!(instance.state(), InstanceState::Stopped);
    assert_eq!(
        fx.journal(),
        vec!["b:state:invalid", "a:state:invalid", "b:stop", "a:stop"]
    );

    fx.clear_journal();
    instance.start().unwrap();
    assert_eq!(instance.state(), InstanceState::Valid);
    assert_eq!(
        fx.journal(),
        vec![
            "a:start",
            "b:start",
            "a:state:invalid",
            "b:state:invalid",
            "a:state:valid",
            "b:state:valid",
        ]
    );

    // already started
    fx.clear_journal();
    instance.start().unwrap();
    instance.stop();
    instance.stop();
    assert_eq!(entries(&fx.journal, "a:stop").len(), 1);
}

#[test]
fn test_handler_validity_drives_instance_state() {
    let fx = Fixture::new();
    let (a, _) = fx.publish(fx.provider("a").with_behavior(Behavior {
        initially_invalid: true,
        ..Behavior::default()
    }));
    fx.publish(fx.provider("b"));
    let factory = fx.factory(metadata("clock", &["a", "b"]));

    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    assert_eq!(instance.state(), InstanceState::Invalid);
    assert_eq!(instance.bindings()[0].validity(), Validity::Invalid);

    let handler = a.last_handler().unwrap();
    handler.set_validity(Validity::Valid);
    assert_eq!(instance.state(), InstanceState::Valid);

    fx.clear_journal();
    handler.set_validity(Validity::Invalid);
    assert_eq!(instance.state(), InstanceState::Invalid);
    assert_eq!(fx.journal(), vec!["b:state:invalid", "a:state:invalid"]);

    // repeated reports change nothing
    fx.clear_journal();
    handler.set_validity(Validity::Invalid);
    assert!(fx.journal().is_empty());
}

#[test]
fn test_validity_reported_while_stopped_applies_on_start() {
    let fx = Fixture::new();
    let (a, _) = fx.publish(fx.provider("a"));
    let factory = fx.factory(metadata("clock", &["a"]));
    let instance = factory.create_component_instance(Configuration::new()).unwrap();

    instance.stop();
    a.last_handler().unwrap().set_validity(Validity::Invalid);
    assert_eq!(instance.state(), InstanceState::Stopped);

    instance.start().unwrap();
    assert_eq!(instance.state(), InstanceState::Invalid);
}

#[test]
fn test_invalid_report_during_start_blocks_valid() {
    let fx = Fixture::new();
    let reported = Arc::new(AtomicBool::new(false));
    let once = Arc::clone(&reported);
    let (a, _) = fx.publish(fx.provider("a").on_state(move |handler, state| {
        if state == InstanceState::Invalid && !once.swap(true, Ordering::SeqCst) {
            handler.set_validity(Validity::Invalid);
        }
    }));
    fx.publish(fx.provider("b"));
    let factory = fx.factory(metadata("clock", &["a", "b"]));
    fx.clear_journal();

    let instance = factory.create_component_instance(Configuration::new()).unwrap();

    assert!(reported.load(Ordering::SeqCst));
    assert_eq!(instance.bindings()[0].validity(), Validity::Invalid);
    assert_eq!(instance.state(), InstanceState::Invalid);
    assert!(entries(&fx.journal, "b:state:valid").is_empty());

    a.last_handler().unwrap().set_validity(Validity::Valid);
    assert_eq!(instance.state(), InstanceState::Valid);
}

#[test]
fn test_queued_valid_request_rechecks_handlers() {
    let fx = Fixture::new();
    let armed = Arc::new(AtomicBool::new(false));
    let trigger = Arc::clone(&armed);
    fx.publish(fx.provider("a").on_state(move |handler, state| {
        if state == InstanceState::Invalid && trigger.swap(false, Ordering::SeqCst) {
            if let Some(instance) = handler.instance() {
                instance.set_state(InstanceState::Valid);
            }
            handler.set_validity(Validity::Invalid);
        }
    }));
    fx.publish(fx.provider("b"));
    let factory = fx.factory(metadata("clock", &["a", "b"]));
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    assert_eq!(instance.state(), InstanceState::Valid);

    armed.store(true, Ordering::SeqCst);
    instance.set_state(InstanceState::Invalid);

    assert!(!armed.load(Ordering::SeqCst));
    assert_eq!(instance.bindings()[0].validity(), Validity::Invalid);
    assert_eq!(instance.state(), InstanceState::Invalid);
}

#[test]
fn test_nested_state_request_is_queued() {
    let fx = Fixture::new();
    let fired = Arc::new(AtomicBool::new(false));
    let once = Arc::clone(&fired);
    fx.publish(fx.provider("a").on_state(move |handler, state| {
        if state == InstanceState::Valid && !once.swap(true, Ordering::SeqCst) {
            if let Some(instance) = handler.instance() {
                instance.set_state(InstanceState::Invalid);
                // still delivering VALID
                assert_eq!(instance.state(), InstanceState::Valid);
            }
        }
    }));
    fx.publish(fx.provider("b"));
    let factory = fx.factory(metadata("clock", &["a", "b"]));
    fx.clear_journal();

    let instance = factory.create_component_instance(Configuration::new()).unwrap();

    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(instance.state(), InstanceState::Invalid);
    assert_eq!(
        entries(&fx.journal, "a:state")
            .into_iter()
            .chain(entries(&fx.journal, "b:state"))
            .collect::<Vec<_>>(),
        vec![
            "a:state:invalid",
            "a:state:valid",
            "a:state:invalid",
            "b:state:invalid",
            "b:state:valid",
            "b:state:invalid",
        ]
    );
    let journal = fx.journal();
    let b_valid = journal.iter().position(|e| e == "b:state:valid").unwrap();
    let a_second_invalid = journal.iter().rposition(|e| e == "a:state:invalid").unwrap();
    assert!(b_valid < a_second_invalid, "queued change must follow the current one");
}

#[test]
fn test_refused_state_stops_instance() {
    let fx = Fixture::new();
    fx.publish(fx.provider("a"));
    fx.publish(fx.provider("b").with_behavior(Behavior {
        refuse_state: Some(InstanceState::Valid),
        ..Behavior::default()
    }));
    let factory = fx.factory(metadata("clock", &["a", "b"]));
    fx.clear_journal();

    let err = factory.create_component_instance(Configuration::new()).unwrap_err();

    assert!(matches!(err, ContainerError::Configuration(_)));
    assert_eq!(
        fx.journal(),
        vec![
            "a:init",
            "b:init",
            "a:start",
            "b:start",
            "a:state:invalid",
            "b:state:invalid",
            "a:state:valid",
            "b:state:valid",
            "b:state:invalid",
            "a:state:invalid",
            "b:stop",
            "a:stop",
            "b:dispose",
            "a:dispose",
        ]
    );
    assert_eq!(factory.instance_count(), 0);
    assert!(fx.names.is_empty());
}

#[test]
fn test_start_failure_stops_and_reports() {
    let fx = Fixture::new();
    fx.publish(fx.provider("a"));
    fx.publish(fx.provider("b").with_behavior(Behavior {
        fail_start: true,
        ..Behavior::default()
    }));
    let factory = fx.factory(metadata("clock", &["a", "b"]));
    fx.clear_journal();

    let err = factory.create_component_instance(Configuration::new()).unwrap_err();

    assert!(matches!(err, ContainerError::Configuration(_)));
    assert!(entries(&fx.journal, "a:stop").len() == 1);
    assert!(entries(&fx.journal, "a:state:valid").is_empty());
    assert!(fx.names.is_empty());
}

#[test]
fn test_stop_from_handler_start_fails_creation() {
    let fx = Fixture::new();
    fx.publish(fx.provider("a"));
    fx.publish(fx.provider("b").with_behavior(Behavior {
        stop_on_start: true,
        ..Behavior::default()
    }));
    let factory = fx.factory(metadata("clock", &["a", "b"]));
    fx.clear_journal();

    let err = factory.create_component_instance(Configuration::new()).unwrap_err();

    assert!(matches!(err, ContainerError::Configuration(_)));
    assert_eq!(factory.instance_count(), 0);
    assert!(fx.names.is_empty());
    assert_eq!(entries(&fx.journal, "a:stop").len(), 1);
    assert!(entries(&fx.journal, "a:state:valid").is_empty());
    assert_eq!(entries(&fx.journal, "b:dispose").len(), 1);
}

#[test]
fn test_listeners_observe_transitions() {
    let (_fx, factory) = two_handler_fixture();
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    let log = Arc::new(StateLog::default());
    instance.add_state_listener(log.clone());

    instance.stop();
    instance.start().unwrap();
    instance.dispose();

    assert_eq!(
        *log.0.lock(),
        vec![
            InstanceState::Invalid,
            InstanceState::Stopped,
            InstanceState::Invalid,
            InstanceState::Valid,
            InstanceState::Disposed,
        ]
    );
}

#[test]
fn test_removed_listener_is_silent() {
    let (_fx, factory) = two_handler_fixture();
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    let log = Arc::new(StateLog::default());
    let listener: Arc<dyn InstanceStateListener> = log.clone();
    instance.add_state_listener(Arc::clone(&listener));

    assert!(instance.remove_state_listener(&listener));
    instance.stop();
    assert!(log.0.lock().is_empty());
}

#[test]
fn test_dispose_is_idempotent_and_final() {
    let (fx, factory) = two_handler_fixture();
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    fx.clear_journal();

    instance.dispose();
    instance.dispose();

    assert_eq!(instance.state(), InstanceState::Disposed);
    assert_eq!(entries(&fx.journal, "a:dispose").len(), 1);
    assert_eq!(
        fx.journal()[fx.journal().len() - 2..].to_vec(),
        vec!["b:dispose", "a:dispose"]
    );
    assert!(instance.bindings().iter().all(|b| !b.holds_provider()));

    instance.start().unwrap();
    instance.set_state(InstanceState::Valid);
    assert_eq!(instance.state(), InstanceState::Disposed);
}

#[test]
fn test_only_running_states_are_requestable() {
    let (_fx, factory) = two_handler_fixture();
    let instance = factory.create_component_instance(Configuration::new()).unwrap();

    instance.set_state(InstanceState::Stopped);
    assert_eq!(instance.state(), InstanceState::Valid);
    instance.set_state(InstanceState::Disposed);
    assert_eq!(instance.state(), InstanceState::Valid);

    instance.stop();
    instance.set_state(InstanceState::Valid);
    assert_eq!(instance.state(), InstanceState::Stopped);
}

#[test]
fn test_reconfigure_restarts_stopped_instance() {
    let (fx, factory) = two_handler_fixture();
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    instance.stop();
    fx.clear_journal();

    let name = instance.name().to_owned();
    instance
        .reconfigure(&Configuration::new().with("instance.name", name.as_str()).with("tz", "utc"))
        .unwrap();

    assert_eq!(instance.state(), InstanceState::Valid);
    assert_eq!(fx.journal()[..2].to_vec(), vec!["a:reconfigure", "b:reconfigure"]);
    assert_eq!(instance.configuration().get_str("tz"), Some("utc"));
}

#[test]
fn test_reconfigure_revalidates_invalid_instance() {
    let fx = Fixture::new();
    let (a, _) = fx.publish(fx.provider("a").with_behavior(Behavior {
        valid_on_reconfigure: true,
        ..Behavior::default()
    }));
    fx.publish(fx.provider("b"));
    let factory = fx.factory(metadata("clock", &["a", "b"]));
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    a.last_handler().unwrap().set_validity(Validity::Invalid);
    assert_eq!(instance.state(), InstanceState::Invalid);

    let log = Arc::new(StateLog::default());
    instance.add_state_listener(log.clone());
    let name = instance.name().to_owned();
    instance
        .reconfigure(&Configuration::new().with("instance.name", name.as_str()).with("tz", "utc"))
        .unwrap();

    assert_eq!(instance.state(), InstanceState::Valid);
    assert_eq!(*log.0.lock(), vec![InstanceState::Valid]);
    assert_eq!(instance.configuration().get_str("tz"), Some("utc"));
}

#[test]
fn test_reconfigure_keeps_invalid_instance_invalid() {
    let fx = Fixture::new();
    let (a, _) = fx.publish(fx.provider("a"));
    let factory = fx.factory(metadata("clock", &["a"]));
    let instance = factory.create_component_instance(Configuration::new()).unwrap();
    a.last_handler().unwrap().set_validity(Validity::Invalid);

    let log = Arc::new(StateLog::default());
    instance.add_state_listener(log.clone());
    let name = instance.name().to_owned();
    instance
        .reconfigure(&Configuration::new().with("instance.name", name.as_str()).with("tz", "utc"))
        .unwrap();

    assert_eq!(instance.state(), InstanceState::Invalid);
    assert!(log.0.lock().is_empty());
    assert_eq!(instance.configuration().get_str("tz"), Some("utc"));
}

#[test]
fn test_adopted_object_and_context() {
    let fx = Fixture::new();
    let (a, _) = fx.publish(fx.provider("a"));
    let factory = fx.factory(metadata("clock", &["a"]));

    let object = ObjectRef::new(String::from("existing"));
    let context = ObjectRef::new(42_u32);
    let instance = factory
        .create_component_instance(
            Configuration::new()
                .with(INSTANCE_OBJECT, object.clone())
                .with(INSTANCE_CONTEXT, context.clone()),
        )
        .unwrap();

    assert_eq!(instance.implementation_objects(), vec![object.clone()]);
    assert_eq!(instance.context(), Some(context));
    let handler = a.last_handler().unwrap();
    assert_eq!(handler.created_objects(), vec![object.clone()]);
    assert_eq!(
        instance.implementation_object().unwrap().downcast_ref::<String>().map(String::as_str),
        Some("existing")
    );

    // re-adopted after a restart
    instance.stop();
    assert!(instance.implementation_objects().is_empty());
    instance.start().unwrap();
    assert_eq!(instance.implementation_objects(), vec![object]);
}

#[test]
fn test_handler_lookup() {
    let fx = Fixture::new();
    fx.publish(fx.provider("a"));
    fx.publish(fx.provider("audit").in_namespace("org.acme"));
    let factory = fx.factory(metadata("clock", &["a", "org.acme:audit"]));
    let instance = factory.create_component_instance(Configuration::new()).unwrap();

    assert!(instance.handler("a").is_some());
    assert!(instance.handler("AUDIT").is_some());
    assert!(instance.handler("org.acme:audit").is_some());
    assert!(instance.handler("missing").is_none());
    assert_eq!(instance.factory_name(), "clock");
    assert!(instance.factory().is_some());
    assert_eq!(instance.description().factory_name, "clock");
}

#[test]
fn test_factory_invalidation_during_handler_callback() {
    let fx = Fixture::new();
    let (_, a_ref) = fx.publish(fx.provider("a"));
    let registry = Arc::clone(&fx.registry);
    let id = a_ref.id();
    let fired = Arc::new(AtomicBool::new(false));
    let once = Arc::clone(&fired);
    // withdrawing a provider from inside a transition disposes the instance
    fx.publish(fx.provider("b").on_state(move |_, state| {
        if state == InstanceState::Valid && !once.swap(true, Ordering::SeqCst) {
            registry.unregister(id);
        }
    }));
    let factory = fx.factory(metadata("clock", &["a", "b"]));

    let result = factory.create_component_instance(Configuration::new());

    assert!(fired.load(Ordering::SeqCst));
    assert!(matches!(result, Err(ContainerError::Configuration(_))));
    assert_eq!(factory.instance_count(), 0);
    assert_eq!(a_ref.usage_count(), 0);
    assert!(fx.names.is_empty());
}
