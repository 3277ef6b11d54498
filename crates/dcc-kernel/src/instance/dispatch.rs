//! Interceptor registration and dispatch
//!
//! Interceptor lists are copied under the instance lock and invoked after
//! releasing it, so interceptors may call back into the instance.

use super::InstanceManager;
use crate::config::{ObjectRef, Value};
use crate::error::Result;
use crate::interception::{ConstructorInjector, FieldInterceptor, MethodInterceptor, MethodSignature};
use std::sync::Arc;
use tracing::{trace, warn};

impl InstanceManager {
    /// Register a field interceptor. Registering the same interceptor
    /// twice on a field has no effect.
    pub fn register_field_interceptor(&self, field: &str, interceptor: Arc<dyn FieldInterceptor>) {
        if self
            .core
            .lock()
            .interceptors
            .register_field(field.to_owned(), interceptor)
        {
            trace!("{}: field interceptor registered on {}", self.name, field);
        }
    }

    /// Register a method interceptor. Registering the same interceptor
    /// twice on a method has no effect.
    pub fn register_method_interceptor(
        &self,
        method: MethodSignature,
        interceptor: Arc<dyn MethodInterceptor>,
    ) {
        let label = method.to_string();
        if self
            .core
            .lock()
            .interceptors
            .register_method(method, interceptor)
        {
            trace!("{}: method interceptor registered on {}", self.name, label);
        }
    }

    /// Register one interceptor on several fields and methods
    pub fn register_interceptor<I>(&self, fields: &[&str], methods: &[MethodSignature], interceptor: &Arc<I>)
    where
        I: FieldInterceptor + MethodInterceptor + 'static,
    {
        for field in fields {
            self.register_field_interceptor(field, Arc::clone(interceptor) as Arc<dyn FieldInterceptor>);
        }
        for method in methods {
            self.register_method_interceptor(
                method.clone(),
                Arc::clone(interceptor) as Arc<dyn MethodInterceptor>,
            );
        }
    }

    /// Register the supplier of constructor parameter `index`
    ///
    /// # Errors
    ///
    /// [`crate::ContainerError::ConstructorParameter`] when another injector
    /// already manages `index`.
    pub fn register_constructor_injector(
        &self,
        index: usize,
        injector: Arc<dyn ConstructorInjector>,
    ) -> Result<()> {
        self.core.lock().interceptors.register_constructor(index, injector)
    }

    /// Raw value stored in the field table
    #[must_use]
    pub fn field_value(&self, field: &str) -> Option<Value> {
        self.core.lock().fields.get(field).cloned()
    }

    /// Dispatch a field read.
    ///
    /// Each interceptor sees the stored value. When several return
    /// different replacements the last one wins and a conflict is logged.
    /// A replaced value is stored and announced through `on_set`.
    pub fn on_get(&self, target: Option<&ObjectRef>, field: &str) -> Option<Value> {
        let (initial, interceptors) = {
            let core = self.core.lock();
            (
                core.fields.get(field).cloned(),
                core.interceptors.field_interceptors(field),
            )
        };

        let mut result = initial.clone();
        let mut changed = false;
        for interceptor in &interceptors {
            let proposed = interceptor.on_get(target, field, initial.as_ref());
            if proposed == initial {
                continue;
            }
            if changed && proposed != result {
                warn!(
                    "{}: conflicting values injected into field {}; the last interceptor wins",
                    self.name, field
                );
            }
            result = proposed;
            changed = true;
        }

        if changed {
            {
                let mut core = self.core.lock();
                match &result {
                    Some(value) => core.fields.insert(field.to_owned(), value.clone()),
                    None => core.fields.remove(field),
                };
            }
            for interceptor in &interceptors {
                interceptor.on_set(target, field, result.as_ref());
            }
        }
        result
    }

    /// Dispatch a field write
    pub fn on_set(&self, target: Option<&ObjectRef>, field: &str, value: Option<Value>) {
        let interceptors = {
            let mut core = self.core.lock();
            match &value {
                Some(v) => core.fields.insert(field.to_owned(), v.clone()),
                None => core.fields.remove(field),
            };
            core.interceptors.field_interceptors(field)
        };
        for interceptor in &interceptors {
            interceptor.on_set(target, field, value.as_ref());
        }
    }

    /// Dispatch a method entry
    pub fn on_entry(&self, target: Option<&ObjectRef>, method: &MethodSignature, arguments: &[Value]) {
        for interceptor in &self.method_interceptors(method) {
            interceptor.on_entry(target, method, arguments);
        }
    }

    /// Dispatch a normal return: `on_exit` on all, then `on_finally` on all
    pub fn on_exit(&self, target: Option<&ObjectRef>, method: &MethodSignature, result: Option<&Value>) {
        let interceptors = self.method_interceptors(method);
        for interceptor in &interceptors {
            interceptor.on_exit(target, method, result);
        }
        for interceptor in &interceptors {
            interceptor.on_finally(target, method);
        }
    }

    /// Dispatch a failure: `on_error` on all, then `on_finally` on all
    pub fn on_error(
        &self,
        target: Option<&ObjectRef>,
        method: &MethodSignature,
        error: &(dyn std::error::Error + 'static),
    ) {
        let interceptors = self.method_interceptors(method);
        for interceptor in &interceptors {
            interceptor.on_error(target, method, error);
        }
        for interceptor in &interceptors {
            interceptor.on_finally(target, method);
        }
    }

    /// Run `body` bracketed by entry and exit or error dispatch
    ///
    /// # Errors
    ///
    /// Returns the body's error after dispatching it.
    pub fn invoke<F, E>(
        &self,
        target: Option<&ObjectRef>,
        method: &MethodSignature,
        arguments: &[Value],
        body: F,
    ) -> std::result::Result<Option<Value>, E>
    where
        F: FnOnce() -> std::result::Result<Option<Value>, E>,
        E: std::error::Error + 'static,
    {
        self.on_entry(target, method, arguments);
        match body() {
            Ok(result) => {
                self.on_exit(target, method, result.as_ref());
                Ok(result)
            }
            Err(e) => {
                self.on_error(target, method, &e);
                Err(e)
            }
        }
    }

    fn method_interceptors(&self, method: &MethodSignature) -> Vec<Arc<dyn MethodInterceptor>> {
        self.core.lock().interceptors.method_interceptors(method)
    }
}
