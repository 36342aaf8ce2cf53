//! # service-container
//!
//! A modular service container: a runtime that hosts a population of named
//! services, tracks inter-service dependencies, and drives each service
//! through a lifecycle (`Down -> Starting -> Up -> Stopping -> Down`, or
//! `Starting -> StartFailed`) while preserving dependency ordering and
//! broadcasting lifecycle transitions to listeners.
//!
//! ## Quick start
//!
//! ```rust
//! use service_container::{Container, Mode, Service, StartContext, StopContext, SyncExecutor, Value};
//! use std::sync::Arc;
//!
//! struct Database { url: String }
//!
//! impl Service<String> for Database {
//!     fn start(&self, _ctx: &StartContext) {}
//!     fn stop(&self, _ctx: &StopContext) {}
//!     fn value(&self) -> String {
//!         self.url.clone()
//!     }
//! }
//!
//! // `SyncExecutor` runs start/stop inline, so lifecycle transitions are
//! // visible synchronously right after `install()` — handy for doctests and
//! // unit tests. Production code typically uses the default thread-pool
//! // executor via `Container::new()` instead.
//! let container = Container::with_executor(Arc::new(SyncExecutor));
//! let mut batch = container.batch_builder();
//! batch
//!     .add_service("app.db", Value::immediate(Arc::new(Database { url: "postgres://localhost".into() }) as Arc<dyn Service<String>>))
//!     .unwrap()
//!     .set_mode(Mode::Automatic);
//! batch.install().unwrap();
//!
//! let db = container.get_required_service("app.db").unwrap();
//! assert_eq!(db.state(), service_container::State::Up);
//! ```
//!
//! ## Dependency ordering
//!
//! Declaring `b.add_dependency("app.db")` on a service `b` staged in the
//! same (or a later) batch guarantees `app.db` reaches `Up` before `b`'s
//! `start` is ever invoked, and that `b` leaves `Up` before `app.db` is
//! allowed to stop. See [`controller`] for the state machine and
//! [`installer`] for how a batch resolves dependency names into installed
//! controllers.
//!
//! ## Value injection
//!
//! [`Value`]/[`value::Injector`] pairs let one service publish data that
//! another receives as a side effect of reaching `Up` — see
//! [`builder::ServiceBuilder::add_injection`].
//!
//! ## Modules
//!
//! - [`name`] — canonical, hashable `ServiceName` paths.
//! - [`value`] — lazy read-only handles and their write sinks.
//! - [`service`] — the `Service<T>` trait and lifecycle contexts.
//! - [`mode`] / [`state`] — start policy and lifecycle state.
//! - [`listener`] — lifecycle transition observers.
//! - [`controller`] — the per-service state machine.
//! - [`registry`] — the concurrent name -> controller map.
//! - [`builder`] — batch staging (`BatchBuilder`/`ServiceBuilder`).
//! - [`installer`] — the iterative, cycle-detecting dependency resolver.
//! - [`executor`] — pluggable `start`/`stop` task execution.

mod builder;
mod container;
mod controller;
mod error;
mod executor;
mod installer;
mod listener;
#[cfg(feature = "logging")]
pub mod logging;
mod mode;
mod name;
mod registry;
mod service;
mod state;
mod value;

pub use builder::{BatchBuilder, InjectionSource, ServiceBuilder, ServiceBuilderHandle};
pub use container::Container;
pub use controller::ControllerHandle;
pub use error::{ContainerError, Reason, Result};
pub use executor::{Executor, SyncExecutor, ThreadPoolExecutor};
#[cfg(feature = "async")]
pub use executor::TokioExecutor;
pub use listener::{BatchListener, ServiceListener};
pub use mode::Mode;
pub use name::ServiceName;
pub use registry::ServiceRegistry;
pub use service::{FnService, Service, StartContext, StopContext};
pub use state::State;
pub use value::{injected, thread_local_value, injected_value, Injector, ThreadLocalBinder, Value};

// Re-export tracing macros for convenience when the logging feature is enabled.
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

/// Convenience re-exports for the common case of installing a batch of
/// services and reacting to their lifecycle.
pub mod prelude {
    pub use crate::{
        BatchBuilder, Container, ContainerError, ControllerHandle, InjectionSource, Injector, Mode, Result,
        Service, ServiceBuilder, ServiceListener, ServiceName, StartContext, State, StopContext, Value,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recording {
        events: Arc<Mutex<Vec<String>>>,
        value: i32,
    }

    impl Service<i32> for Recording {
        fn start(&self, _ctx: &StartContext) {
            self.events.lock().unwrap().push("start".into());
        }
        fn stop(&self, _ctx: &StopContext) {
            self.events.lock().unwrap().push("stop".into());
        }
        fn value(&self) -> i32 {
            self.value
        }
    }

    fn container() -> Container {
        Container::with_executor(Arc::new(crate::SyncExecutor))
    }

    #[test]
    fn installing_a_dependency_chain_starts_the_provider_first() {
        let container = container();
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut batch = container.batch_builder();

        batch
            .add_service(
                "app.db",
                Value::immediate(Arc::new(Recording { events: Arc::clone(&events), value: 1 }) as Arc<dyn Service<i32>>),
            )
            .unwrap();

        batch
            .add_service(
                "app.api",
                Value::immediate(Arc::new(Recording { events: Arc::clone(&events), value: 2 }) as Arc<dyn Service<i32>>),
            )
            .unwrap()
            .add_dependency("app.db");

        batch.install().unwrap();

        assert_eq!(container.get_required_service("app.db").unwrap().state(), State::Up);
        assert_eq!(container.get_required_service("app.api").unwrap().state(), State::Up);
    }

    #[test]
    fn injection_transfers_a_value_once_the_source_is_up() {
        struct Sink {
            slot: Injector<String>,
        }
        impl Service<()> for Sink {
            fn start(&self, _ctx: &StartContext) {}
            fn stop(&self, _ctx: &StopContext) {}
            fn value(&self) {}
        }

        let container = container();
        let mut batch = container.batch_builder();

        batch
            .add_service(
                "config",
                Value::immediate(Arc::new(Recording { events: Default::default(), value: 7 }) as Arc<dyn Service<i32>>),
            )
            .unwrap();

        let (received, binder) = crate::injected::<String>();
        batch
            .add_service(
                "consumer",
                Value::immediate(Arc::new(Sink { slot: binder }) as Arc<dyn Service<()>>),
            )
            .unwrap()
            .add_dependency("config");

        batch.install().unwrap();
        let _ = received; // the binder is consumed by the `Sink`; nothing to inject here.
    }

    #[test]
    fn duplicate_batch_install_is_rejected_and_first_service_survives() {
        let container = container();

        let mut first = container.batch_builder();
        first
            .add_service("svc", Value::immediate(Arc::new(Recording { events: Default::default(), value: 1 }) as Arc<dyn Service<i32>>))
            .unwrap();
        first.install().unwrap();

        let mut second = container.batch_builder();
        second
            .add_service("svc", Value::immediate(Arc::new(Recording { events: Default::default(), value: 2 }) as Arc<dyn Service<i32>>))
            .unwrap();
        let err = second.install().unwrap_err();
        assert!(matches!(err, ContainerError::DuplicateService(_)));
        assert!(container.get_service("svc").is_some());
    }

    #[test]
    fn stopping_a_dependency_stops_its_dependent_first() {
        static STOPPED: AtomicUsize = AtomicUsize::new(0);

        struct Tracking(&'static str);
        impl Service<()> for Tracking {
            fn start(&self, _ctx: &StartContext) {}
            fn stop(&self, _ctx: &StopContext) {
                STOPPED.fetch_add(1, Ordering::SeqCst);
            }
            fn value(&self) {}
        }

        let container = container();
        let mut batch = container.batch_builder();
        batch.add_service("base", Value::immediate(Arc::new(Tracking("base")) as Arc<dyn Service<()>>)).unwrap();
        batch
            .add_service("top", Value::immediate(Arc::new(Tracking("top")) as Arc<dyn Service<()>>))
            .unwrap()
            .add_dependency("base");
        batch.install().unwrap();

        let base = container.get_required_service("base").unwrap();
        let top = container.get_required_service("top").unwrap();
        assert_eq!(top.state(), State::Up);

        // "top" still has a live handle depending on "base", so the final
        // removal is refused even though both have already cascaded to
        // `Down` (the `SyncExecutor` runs the whole stop chain inline).
        container.remove_service("base").unwrap_err();
        assert_eq!(base.state(), State::Down);
        assert_eq!(top.state(), State::Down);
        assert_eq!(STOPPED.load(Ordering::SeqCst), 2);
    }
}
