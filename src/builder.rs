//! Batch staging: accumulate service definitions, dependencies, listeners,
//! and injections, then commit them all at once through the installer.

use crate::controller::{ControllerHandle, InjectionHook};
use crate::error::{ContainerError, Result};
use crate::executor::Executor;
use crate::installer::install_batch;
use crate::listener::{AnyServiceListener, BatchListener, ListenerSlot, ServiceListener};
use crate::mode::Mode;
use crate::name::ServiceName;
use crate::registry::ServiceRegistry;
use crate::service::Service;
use crate::value::{Injector, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Where an injection's value comes from: a value handed in directly, or
/// the published value of another service in this batch or the registry.
pub enum InjectionSource<U: Send + Sync + 'static> {
    Direct(Value<U>),
    FromService(ServiceName),
}

/// Resolves a staged injection against the registry/batch once dependency
/// names have been turned into controllers, producing the apply/reverse
/// hook the controller runs on entering/leaving `Up`.
pub(crate) trait PendingInjection: Send {
    fn resolve(
        &self,
        lookup: &dyn Fn(&ServiceName) -> Option<Arc<dyn ControllerHandle>>,
    ) -> Result<InjectionHook>;
}

struct TypedInjection<U: Send + Sync + 'static> {
    source: InjectionSource<U>,
    destination: Injector<U>,
}

impl<U: Send + Sync + 'static> PendingInjection for TypedInjection<U> {
    fn resolve(
        &self,
        lookup: &dyn Fn(&ServiceName) -> Option<Arc<dyn ControllerHandle>>,
    ) -> Result<InjectionHook> {
        let value: Value<U> = match &self.source {
            InjectionSource::Direct(value) => value.clone(),
            InjectionSource::FromService(name) => {
                let controller = lookup(name).ok_or_else(|| {
                    ContainerError::ResolutionError(format!(
                        "injection source {name} was not resolved before commit"
                    ))
                })?;
                let erased: Arc<dyn Any + Send + Sync> = controller.value_handle_any();
                let typed = erased.downcast::<Value<U>>().map_err(|_| {
                    ContainerError::ResolutionError(format!(
                        "injection source {name} does not produce the expected value type"
                    ))
                })?;
                (*typed).clone()
            }
        };
        let destination = self.destination.clone();
        Ok(Arc::new(move |up: bool| {
            if up {
                let resolved = value.get().map_err(|_| {
                    ContainerError::InvalidValue("injection source value was not available at start")
                })?;
                destination.inject_arc(resolved);
            } else {
                destination.uninject();
            }
            Ok(())
        }))
    }
}

/// Per-service staging area returned by [`BatchBuilder::add_service`].
/// Accumulates dependencies, listeners, and injections for one service
/// until the batch is committed.
pub struct ServiceBuilder<T: Send + Sync + 'static> {
    mode: Mode,
    service: Value<Arc<dyn Service<T>>>,
    dependencies: Vec<ServiceName>,
    listeners: Vec<Box<dyn AnyServiceListener<T>>>,
    injections: Vec<Box<dyn PendingInjection>>,
}

impl<T: Send + Sync + 'static> ServiceBuilder<T> {
    fn new(service: Value<Arc<dyn Service<T>>>) -> Self {
        Self {
            mode: Mode::default(),
            service,
            dependencies: Vec::new(),
            listeners: Vec::new(),
            injections: Vec::new(),
        }
    }

    /// Set the start policy for this service. Defaults to [`Mode::Automatic`].
    pub fn set_mode(&mut self, mode: Mode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Declare a dependency on `name`; duplicates are ignored.
    pub fn add_dependency(&mut self, name: impl Into<ServiceName>) -> &mut Self {
        let name = name.into();
        if !self.dependencies.contains(&name) {
            self.dependencies.push(name);
        }
        self
    }

    /// Attach a listener scoped to this service only.
    pub fn add_listener(&mut self, listener: Arc<dyn ServiceListener<T>>) -> &mut Self {
        self.listeners.push(Box::new(ListenerSlot::new(listener)));
        self
    }

    /// Declare an injection: `destination` receives `source`'s value as
    /// this controller enters `Up`, and is cleared (in reverse declaration
    /// order across all injections) as it leaves.
    pub fn add_injection<U: Send + Sync + 'static>(
        &mut self,
        source: InjectionSource<U>,
        destination: Injector<U>,
    ) -> &mut Self {
        self.injections.push(Box::new(TypedInjection { source, destination }));
        self
    }
}

type BuildFn = Box<
    dyn FnOnce(
            Vec<Arc<dyn ControllerHandle>>,
            Arc<dyn Executor>,
            Vec<Arc<dyn BatchListener>>,
            &dyn Fn(&ServiceName) -> Option<Arc<dyn ControllerHandle>>,
        ) -> Result<Arc<dyn ControllerHandle>>
        + Send,
>;

pub(crate) struct BatchEntry {
    pub(crate) name: ServiceName,
    pub(crate) mode: Mode,
    pub(crate) dependencies: Vec<ServiceName>,
    build: BuildFn,
}

impl BatchEntry {
    pub(crate) fn build(
        self,
        resolved_deps: Vec<Arc<dyn ControllerHandle>>,
        executor: Arc<dyn Executor>,
        batch_listeners: Vec<Arc<dyn BatchListener>>,
        lookup: &dyn Fn(&ServiceName) -> Option<Arc<dyn ControllerHandle>>,
    ) -> Result<Arc<dyn ControllerHandle>> {
        (self.build)(resolved_deps, executor, batch_listeners, lookup)
    }
}

/// Stages a group of service installs to commit atomically: either every
/// service in the batch is inserted, or (on any failure) none are.
pub struct BatchBuilder {
    registry: ServiceRegistry,
    executor: Arc<dyn Executor>,
    entries: HashMap<ServiceName, BatchEntry>,
    batch_listeners: Vec<Arc<dyn BatchListener>>,
}

impl BatchBuilder {
    pub(crate) fn new(registry: ServiceRegistry, executor: Arc<dyn Executor>) -> Self {
        Self {
            registry,
            executor,
            entries: HashMap::new(),
            batch_listeners: Vec::new(),
        }
    }

    /// Attach a listener to every service staged in this batch (and every
    /// service staged after this call), run before any per-service listener.
    pub fn add_listener(&mut self, listener: Arc<dyn BatchListener>) -> &mut Self {
        self.batch_listeners.push(listener);
        self
    }

    /// Stage a new service under `name`, returning a handle to continue
    /// configuring it (dependencies, listeners, injections) before
    /// [`BatchBuilder::install`].
    pub fn add_service<T: Send + Sync + 'static>(
        &mut self,
        name: impl Into<ServiceName>,
        service: Value<Arc<dyn Service<T>>>,
    ) -> Result<ServiceBuilderHandle<'_, T>> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(ContainerError::DuplicateService(name));
        }
        // A placeholder occupies the slot so a second `add_service` under
        // the same name is rejected even before the handle below is
        // finalized on drop.
        self.entries.insert(
            name.clone(),
            BatchEntry {
                name: name.clone(),
                mode: Mode::default(),
                dependencies: Vec::new(),
                build: Box::new(|_, _, _, _| unreachable!("placeholder replaced before install")),
            },
        );
        Ok(ServiceBuilderHandle {
            batch: self,
            name,
            builder: ServiceBuilder::new(service),
        })
    }

    /// Commit the batch: resolve every staged entry against the registry
    /// and install it, or roll back entirely on the first failure.
    pub fn install(self) -> Result<()> {
        install_batch(&self.registry, self.executor, self.batch_listeners, self.entries)
    }
}

/// Returned by [`BatchBuilder::add_service`]; dereferences to the typed
/// [`ServiceBuilder`] so callers can chain `add_dependency`/`add_listener`/
/// `add_injection`, then finalizes the staged entry on drop.
pub struct ServiceBuilderHandle<'a, T: Send + Sync + 'static> {
    batch: &'a mut BatchBuilder,
    name: ServiceName,
    builder: ServiceBuilder<T>,
}

impl<'a, T: Send + Sync + 'static> std::ops::Deref for ServiceBuilderHandle<'a, T> {
    type Target = ServiceBuilder<T>;
    fn deref(&self) -> &Self::Target {
        &self.builder
    }
}

impl<'a, T: Send + Sync + 'static> std::ops::DerefMut for ServiceBuilderHandle<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.builder
    }
}

impl<'a, T: Send + Sync + 'static> Drop for ServiceBuilderHandle<'a, T> {
    fn drop(&mut self) {
        let mode = self.builder.mode;
        let dependencies = self.builder.dependencies.clone();
        let service = self.builder.service.clone();
        let listeners = std::mem::take(&mut self.builder.listeners);
        let injections = std::mem::take(&mut self.builder.injections);
        let name = self.name.clone();

        let build: BuildFn = Box::new(move |resolved_deps, executor, batch_listeners, lookup| {
            let service_impl = service.get().map_err(|_| {
                ContainerError::ResolutionError(format!("{name} has no service factory bound"))
            })?;
            let hooks = injections
                .iter()
                .map(|injection| injection.resolve(lookup))
                .collect::<Result<Vec<_>>>()?;
            let controller = crate::controller::ServiceController::new(
                name.clone(),
                mode,
                service_impl,
                executor,
                resolved_deps,
                hooks,
                batch_listeners,
                listeners,
            );
            controller.wire_dependents();
            Ok(controller as Arc<dyn ControllerHandle>)
        });

        if let Some(entry) = self.batch.entries.get_mut(&self.name) {
            entry.mode = mode;
            entry.dependencies = dependencies;
            entry.build = build;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SyncExecutor;
    use crate::service::{Service, StartContext, StopContext};

    struct Plain(i32);
    impl Service<i32> for Plain {
        fn start(&self, _ctx: &StartContext) {}
        fn stop(&self, _ctx: &StopContext) {}
        fn value(&self) -> i32 {
            self.0
        }
    }

    #[test]
    fn adding_duplicate_name_fails() {
        let registry = ServiceRegistry::new();
        let mut batch = BatchBuilder::new(registry, Arc::new(SyncExecutor));
        let svc: Value<Arc<dyn Service<i32>>> = Value::immediate(Arc::new(Plain(1)));
        batch.add_service("a.b", svc.clone()).unwrap();
        let err = batch.add_service("a.b", svc).unwrap_err();
        assert!(matches!(err, ContainerError::DuplicateService(_)));
    }

    #[test]
    fn install_with_no_services_succeeds() {
        let registry = ServiceRegistry::new();
        let batch = BatchBuilder::new(registry, Arc::new(SyncExecutor));
        batch.install().unwrap();
    }
}
