//! `Container` — the entry point that owns a [`ServiceRegistry`] and a
//! default [`Executor`], and hands out [`BatchBuilder`]s to install services
//! against it.

use crate::builder::BatchBuilder;
use crate::controller::ControllerHandle;
use crate::error::{ContainerError, Result};
use crate::executor::{Executor, ThreadPoolExecutor};
use crate::name::ServiceName;
use crate::registry::ServiceRegistry;
use once_cell::sync::OnceCell;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Lazily-constructed, process-wide default executor, shared by every
/// [`Container::new`] that does not supply its own — avoids spinning up a
/// fresh worker pool per container in the common case of one container per
/// process.
static DEFAULT_EXECUTOR: OnceCell<Arc<ThreadPoolExecutor>> = OnceCell::new();

fn default_executor() -> Arc<ThreadPoolExecutor> {
    Arc::clone(DEFAULT_EXECUTOR.get_or_init(ThreadPoolExecutor::with_default_size))
}

/// The modular service container: hosts a population of named services,
/// tracks inter-service dependencies, and drives each through its lifecycle.
///
/// Cheap to clone: a `Container` is a thin handle around a
/// [`ServiceRegistry`] (itself `Arc`-backed) and an `Arc<dyn Executor>`.
#[derive(Clone)]
pub struct Container {
    registry: ServiceRegistry,
    executor: Arc<dyn Executor>,
}

impl Container {
    /// A new, empty container running on the shared process-wide default
    /// executor (a small `std::thread` pool sized to available parallelism).
    pub fn new() -> Self {
        Self::with_executor(default_executor() as Arc<dyn Executor>)
    }

    /// A new, empty container running on a caller-supplied executor, e.g. a
    /// [`crate::executor::SyncExecutor`] for deterministic tests or a
    /// `TokioExecutor` (behind the `async` feature) to share a Tokio runtime.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        #[cfg(feature = "logging")]
        debug!("creating new service container");
        Self {
            registry: ServiceRegistry::new(),
            executor,
        }
    }

    /// Stage a new batch of service definitions. Nothing is installed until
    /// [`crate::builder::BatchBuilder::install`] is called on the result.
    pub fn batch_builder(&self) -> BatchBuilder {
        BatchBuilder::new(self.registry.clone(), Arc::clone(&self.executor))
    }

    /// Look up a controller by name, without requiring it to exist.
    pub fn get_service(&self, name: impl Into<ServiceName>) -> Option<Arc<dyn ControllerHandle>> {
        self.registry.get(&name.into())
    }

    /// Look up a controller by name, failing with
    /// [`ContainerError::ServiceNotFound`] if it is absent.
    pub fn get_required_service(&self, name: impl Into<ServiceName>) -> Result<Arc<dyn ControllerHandle>> {
        self.registry.get_required(&name.into())
    }

    /// Request removal of a service: forces it towards `Down` regardless of
    /// outstanding demand (overriding eager modes, and cascading into any
    /// dependent that still demanded it, which is stopped in turn) and, if
    /// it settles into `Down`/`StartFailed` with no live dependent left in
    /// the registry, removes it immediately. If it is still stopping, or a
    /// live dependent still lists it as a dependency, this returns
    /// [`ContainerError::IllegalState`]; callers that need "remove once
    /// clear" should retry once a listener observes the `down` transition
    /// (see `DESIGN.md` for why no background watcher is built into core).
    pub fn remove_service(&self, name: impl Into<ServiceName>) -> Result<()> {
        let name = name.into();
        #[cfg(feature = "logging")]
        debug!(service = %name, "remove_service requested");
        self.registry.request_removal(&name)?;
        self.registry.remove_if_down(&name)
    }

    /// Number of controllers currently tracked, in any state.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// The executor this container's controllers schedule `start`/`stop`
    /// callbacks on.
    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SyncExecutor;
    use crate::mode::Mode;
    use crate::service::{Service, StartContext, StopContext};
    use crate::state::State;
    use crate::value::Value;

    struct Noop;
    impl Service<i32> for Noop {
        fn start(&self, _ctx: &StartContext) {}
        fn stop(&self, _ctx: &StopContext) {}
        fn value(&self) -> i32 {
            42
        }
    }

    fn container() -> Container {
        Container::with_executor(Arc::new(SyncExecutor))
    }

    #[test]
    fn install_then_lookup_round_trips() {
        let container = container();
        let mut batch = container.batch_builder();
        batch
            .add_service("db", Value::immediate(Arc::new(Noop) as Arc<dyn Service<i32>>))
            .unwrap();
        batch.install().unwrap();

        let controller = container.get_required_service("db").unwrap();
        assert_eq!(controller.state(), State::Up);
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn lookup_of_absent_service_fails() {
        let container = container();
        let err = container.get_required_service("missing").unwrap_err();
        assert!(matches!(err, ContainerError::ServiceNotFound(_)));
    }

    #[test]
    fn on_demand_service_stays_down_and_mode_change_starts_it() {
        let container = container();
        let mut batch = container.batch_builder();
        batch
            .add_service("db", Value::immediate(Arc::new(Noop) as Arc<dyn Service<i32>>))
            .unwrap()
            .set_mode(Mode::OnDemand);
        batch.install().unwrap();

        let controller = container.get_required_service("db").unwrap();
        assert_eq!(controller.state(), State::Down);

        controller.set_mode(Mode::Active);
        assert_eq!(controller.state(), State::Up);
    }

    #[test]
    fn remove_service_while_down_clears_the_registry() {
        let container = container();
        let mut batch = container.batch_builder();
        batch
            .add_service("db", Value::immediate(Arc::new(Noop) as Arc<dyn Service<i32>>))
            .unwrap()
            .set_mode(Mode::OnDemand);
        batch.install().unwrap();

        container.remove_service("db").unwrap();
        assert!(container.get_service("db").is_none());
    }
}
