//! The per-service state machine: tracks demand, dependency readiness, and
//! drives `start`/`stop` through an [`Executor`].
//!
//! Dependency fan-out (a dependency reaching `Up` notifying every
//! dependent, which may itself start and notify its own dependents, and so
//! on) is **never** driven by direct recursive calls. Every cross-controller
//! notification goes through [`schedule`], a thread-local trampoline that
//! turns a chain of any depth into an iterative loop, so a dependency chain
//! thousands of services deep cannot overflow the stack.

use crate::error::ContainerError;
use crate::executor::Executor;
use crate::listener::{AnyServiceListener, BatchListener};
use crate::mode::Mode;
use crate::name::ServiceName;
use crate::service::{SettleOutcome, Service, StartContext, StopContext};
use crate::state::State;
use crate::value::{injected, Injector, Value};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, error, trace};

#[cfg(not(feature = "logging"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "logging"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "logging"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}

/// Object-safe view of a controller, independent of the value type `T` it
/// carries. The registry, the installer, and cross-controller notifications
/// all operate through this trait so that a [`crate::registry::ServiceRegistry`]
/// can hold controllers of heterogeneous value types in one map.
pub trait ControllerHandle: Send + Sync {
    fn name(&self) -> &ServiceName;
    fn mode(&self) -> Mode;

    /// Change the start policy at runtime. Adjusts this controller's
    /// intrinsic demand (placed unconditionally by eager modes) and
    /// re-evaluates whether to start or stop.
    fn set_mode(&self, mode: Mode);

    fn state(&self) -> State;

    /// The reason the most recent start attempt failed, if `state() ==
    /// State::StartFailed`.
    fn start_failure(&self) -> Option<Arc<dyn std::error::Error + Send + Sync>>;

    fn dependencies(&self) -> Vec<Arc<dyn ControllerHandle>>;
    fn add_dependent(&self, dependent: Weak<dyn ControllerHandle>);

    /// Bump the demand counter; returns `true` if demand crossed 0 -> 1 and
    /// the caller (see [`propagate_demand`]) should keep walking into this
    /// controller's own dependencies.
    fn incr_demand(&self) -> bool;

    /// Drop the demand counter; returns `true` if demand crossed 1 -> 0.
    fn decr_demand(&self) -> bool;

    /// Re-examine state against demand/readiness and start or stop as
    /// needed. Idempotent — safe to call speculatively.
    fn evaluate(&self);

    /// Called on a dependent when one if its *own* dependencies transitions
    /// across the `Up` boundary (`up = true` on entry, `false` on exit).
    fn dependency_transitioned(&self, up: bool);

    /// An `Arc<Value<T>>` erased to `Any`, for dependents to downcast
    /// against the type they expect.
    fn value_handle_any(&self) -> Arc<dyn Any + Send + Sync>;

    /// True once in `Down` or `StartFailed`, the only states from which the
    /// installer/registry may drop this controller.
    fn removable(&self) -> bool;

    /// Mark as removed and notify listeners; called by the registry under
    /// its own removal critical section.
    fn mark_removed(&self);

    /// True if any previously-registered dependent is still alive (its
    /// `Arc` has not yet been dropped from the registry). The registry
    /// checks this before actually dropping a `Down`/`StartFailed`
    /// controller, so a live dependent is never left referencing a
    /// dependency that has vanished out from under it.
    fn has_live_dependents(&self) -> bool;

    /// Request removal: forces this controller into a mode that never
    /// starts and, if currently `Up` or `Starting`, forces it towards
    /// `Down` regardless of outstanding demand. This is an explicit
    /// override of the demand model, not a request that competes with
    /// it — a dependent still demanding this service is stopped in turn
    /// by the normal dependency-transitioned cascade once this
    /// controller actually reaches `Down`.
    fn remove(&self) {
        self.set_mode(Mode::Never);
    }
}

// =============================================================================
// Trampoline
// =============================================================================

thread_local! {
    static PENDING: RefCell<VecDeque<Arc<dyn ControllerHandle>>> = RefCell::new(VecDeque::new());
    static DRIVING: Cell<bool> = Cell::new(false);
}

/// Queue `node` for evaluation, driving the queue to completion iteratively
/// if nothing else on this thread is already doing so.
pub(crate) fn schedule(node: Arc<dyn ControllerHandle>) {
    PENDING.with(|queue| queue.borrow_mut().push_back(node));
    let already_driving = DRIVING.with(|driving| driving.replace(true));
    if already_driving {
        return;
    }
    loop {
        let next = PENDING.with(|queue| queue.borrow_mut().pop_front());
        match next {
            Some(node) => node.evaluate(),
            None => break,
        }
    }
    DRIVING.with(|driving| driving.set(false));
}

/// Walk from `root` into its dependency graph, incrementing (`delta > 0`) or
/// decrementing (`delta < 0`) demand along the way, stopping at any node
/// whose count does not cross the 0/1 boundary. Iterative: uses an explicit
/// stack rather than recursing into `dependencies()`.
pub(crate) fn propagate_demand(root: Arc<dyn ControllerHandle>, delta: i32) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let crossed = if delta > 0 { node.incr_demand() } else { node.decr_demand() };
        if crossed {
            stack.extend(node.dependencies());
        }
        schedule(node);
    }
}

// =============================================================================
// Controller state
// =============================================================================

struct Inner {
    state: State,
    mode: Mode,
    demand: i64,
    pending_deps: usize,
    dependents: Vec<Weak<dyn ControllerHandle>>,
    start_failure: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

/// An injection to apply when this controller's service enters or leaves
/// `Up`. `true` means apply (inject the computed value; failure here fails
/// the start exactly like a failure inside `Service::start`), `false` means
/// reverse (uninject, best-effort).
pub(crate) type InjectionHook = Arc<dyn Fn(bool) -> crate::error::Result<()> + Send + Sync>;

/// The concrete, generic controller for a service exposing a `T`.
pub struct ServiceController<T: Send + Sync + 'static> {
    name: ServiceName,
    service: Arc<dyn Service<T>>,
    executor: Arc<dyn Executor>,
    dependencies: Vec<Arc<dyn ControllerHandle>>,
    injections: Vec<InjectionHook>,
    batch_listeners: Vec<Arc<dyn BatchListener>>,
    listeners: Mutex<Vec<Box<dyn AnyServiceListener<T>>>>,
    published_value: Value<T>,
    value_injector: Injector<T>,
    inner: Mutex<Inner>,
    self_weak: Weak<ServiceController<T>>,
}

impl<T: Send + Sync + 'static> ServiceController<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: ServiceName,
        mode: Mode,
        service: Arc<dyn Service<T>>,
        executor: Arc<dyn Executor>,
        dependencies: Vec<Arc<dyn ControllerHandle>>,
        injections: Vec<InjectionHook>,
        batch_listeners: Vec<Arc<dyn BatchListener>>,
        listeners: Vec<Box<dyn AnyServiceListener<T>>>,
    ) -> Arc<Self> {
        let pending_deps = dependencies.iter().filter(|dep| dep.state() != State::Up).count();
        let (published_value, value_injector) = injected::<T>();
        Arc::new_cyclic(|weak| ServiceController {
            name,
            service,
            executor,
            dependencies,
            injections,
            batch_listeners,
            listeners: Mutex::new(listeners),
            published_value,
            value_injector,
            inner: Mutex::new(Inner {
                state: State::Down,
                mode,
                demand: 0,
                pending_deps,
                dependents: Vec::new(),
                start_failure: None,
            }),
            self_weak: weak.clone(),
        })
    }

    /// Register this controller as a dependent of each of its strong
    /// dependencies. Must be called once, right after construction, once the
    /// `Arc<Self>` returned by [`Self::new`] exists.
    pub(crate) fn wire_dependents(self: &Arc<Self>) {
        let handle: Weak<dyn ControllerHandle> = self.self_weak.clone();
        for dep in &self.dependencies {
            dep.add_dependent(handle.clone());
        }
    }

    /// A typed handle dependents can resolve their injection against.
    pub fn value(&self) -> Value<T> {
        self.published_value.clone()
    }

    fn handle(&self) -> Option<Arc<dyn ControllerHandle>> {
        self.self_weak.upgrade().map(|arc| arc as Arc<dyn ControllerHandle>)
    }

    fn notify_dependents(&self, up: bool) {
        let dependents = {
            let inner = self.inner.lock().expect("controller lock poisoned");
            inner.dependents.clone()
        };
        for dependent in dependents {
            if let Some(dependent) = dependent.upgrade() {
                dependent.dependency_transitioned(up);
            }
        }
    }

    fn apply_injections(&self, up: bool) -> crate::error::Result<()> {
        if up {
            for hook in &self.injections {
                hook(true)?;
            }
        } else {
            // Reverse order on the way down, per spec.
            for hook in self.injections.iter().rev() {
                let _ = hook(false);
            }
        }
        Ok(())
    }

    /// Batch-wide listeners run before per-service listeners, per the
    /// installer's ordering rule. A listener that panics is caught and
    /// logged, never propagated: one broken observer must not poison this
    /// controller's listener lock or abort the caller's thread.
    fn notify_listeners(&self, batch: impl Fn(&dyn BatchListener), typed: impl Fn(&dyn AnyServiceListener<T>)) {
        for listener in &self.batch_listeners {
            let listener = listener.as_ref();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| batch(listener))) {
                self.log_listener_panic(payload);
            }
        }
        let listeners = self.listeners.lock().expect("listener list poisoned");
        for listener in listeners.iter() {
            let listener = listener.as_ref();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| typed(listener))) {
                self.log_listener_panic(payload);
            }
        }
    }

    fn log_listener_panic(&self, payload: Box<dyn Any + Send>) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(service = %self.name, %message, "listener panicked; ignoring and continuing");
    }

    fn begin_start(self: &Arc<Self>) {
        debug!(service = %self.name, "starting service");
        let controller = Arc::clone(self);
        self.notify_listeners(|l| l.starting(&controller.name), |l| l.starting(&controller.name));
        let controller = Arc::clone(self);
        self.executor.execute(Box::new(move || {
            let ctx = StartContext::new();
            let settle_controller = Arc::clone(&controller);
            ctx.set_on_settle(move |outcome| match outcome {
                SettleOutcome::Completed => settle_controller.finish_start(Ok(())),
                SettleOutcome::Failed(reason) => settle_controller.finish_start(Err(reason)),
            });
            controller.service.start(&ctx);
            if ctx.finished_synchronously() {
                controller.finish_start(Ok(()));
            }
        }));
    }

    fn finish_start(self: &Arc<Self>, outcome: std::result::Result<(), Arc<dyn std::error::Error + Send + Sync>>) {
        // A failed injection is treated exactly like a failed `start()`.
        let outcome = outcome.and_then(|()| {
            self.apply_injections(true)
                .map_err(|e| Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>)
        });
        match outcome {
            Ok(()) => {
                let value = Arc::new(self.service.value());
                self.value_injector.inject_arc(Arc::clone(&value));
                {
                    let mut inner = self.inner.lock().expect("controller lock poisoned");
                    inner.state = State::Up;
                }
                debug!(service = %self.name, "service up");
                self.notify_listeners(|l| l.up(&self.name), |l| l.up(&self.name, value.as_ref()));
                self.notify_dependents(true);
            }
            Err(reason) => {
                {
                    let mut inner = self.inner.lock().expect("controller lock poisoned");
                    inner.state = State::StartFailed;
                    inner.start_failure = Some(Arc::clone(&reason));
                }
                debug!(service = %self.name, error = %reason, "service failed to start");
                self.notify_listeners(
                    |l| l.start_failed(&self.name, reason.as_ref()),
                    |l| l.start_failed(&self.name, reason.as_ref()),
                );
            }
        }
        if let Some(handle) = self.handle() {
            schedule(handle);
        }
    }

    fn begin_stop(self: &Arc<Self>) {
        debug!(service = %self.name, "stopping service");
        self.value_injector.uninject();
        let _ = self.apply_injections(false);
        let controller = Arc::clone(self);
        self.notify_listeners(|l| l.stopping(&controller.name), |l| l.stopping(&controller.name));
        let controller = Arc::clone(self);
        self.executor.execute(Box::new(move || {
            let ctx = StopContext::new();
            let settle_controller = Arc::clone(&controller);
            ctx.set_on_settle(move |_outcome| settle_controller.finish_stop());
            controller.service.stop(&ctx);
            if ctx.finished_synchronously() {
                controller.finish_stop();
            }
        }));
    }

    fn finish_stop(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().expect("controller lock poisoned");
            inner.state = State::Down;
        }
        debug!(service = %self.name, "service down");
        self.notify_listeners(|l| l.down(&self.name), |l| l.down(&self.name));
        self.notify_dependents(false);
        if let Some(handle) = self.handle() {
            schedule(handle);
        }
    }
}

impl<T: Send + Sync + 'static> ControllerHandle for ServiceController<T> {
    fn name(&self) -> &ServiceName {
        &self.name
    }

    fn mode(&self) -> Mode {
        self.inner.lock().expect("controller lock poisoned").mode
    }

    fn set_mode(&self, mode: Mode) {
        let (was_eager, now_eager) = {
            let mut inner = self.inner.lock().expect("controller lock poisoned");
            let was_eager = inner.mode.is_eager();
            inner.mode = mode;
            (was_eager, mode.is_eager())
        };
        debug!(service = %self.name, %mode, "mode changed");
        let Some(handle) = self.handle() else { return };
        match (was_eager, now_eager) {
            (false, true) => propagate_demand(handle, 1),
            (true, false) => propagate_demand(handle, -1),
            _ => schedule(handle),
        }
    }

    fn state(&self) -> State {
        self.inner.lock().expect("controller lock poisoned").state
    }

    fn start_failure(&self) -> Option<Arc<dyn std::error::Error + Send + Sync>> {
        self.inner.lock().expect("controller lock poisoned").start_failure.clone()
    }

    fn dependencies(&self) -> Vec<Arc<dyn ControllerHandle>> {
        self.dependencies.clone()
    }

    fn add_dependent(&self, dependent: Weak<dyn ControllerHandle>) {
        self.inner.lock().expect("controller lock poisoned").dependents.push(dependent);
    }

    fn incr_demand(&self) -> bool {
        let mut inner = self.inner.lock().expect("controller lock poisoned");
        inner.demand += 1;
        trace!(service = %self.name, demand = inner.demand, "demand incremented");
        inner.demand == 1
    }

    fn decr_demand(&self) -> bool {
        let mut inner = self.inner.lock().expect("controller lock poisoned");
        inner.demand -= 1;
        trace!(service = %self.name, demand = inner.demand, "demand decremented");
        inner.demand == 0
    }

    fn evaluate(&self) {
        // Start/stop need `Arc<Self>` (to move into the executor closure),
        // not just `&self`; recover it from the self-reference set up in
        // `new`.
        let Some(controller) = self.self_weak.upgrade() else {
            return;
        };

        let (should_start, should_stop) = {
            let mut inner = self.inner.lock().expect("controller lock poisoned");
            match inner.state {
                State::Down => {
                    let ready = inner.mode.can_start() && inner.demand > 0 && inner.pending_deps == 0;
                    if ready {
                        inner.state = State::Starting;
                    }
                    (ready, false)
                }
                State::Up => {
                    // A mode that cannot start (`Never`, set by an explicit
                    // `remove()`) forces a stop unconditionally: removal is
                    // an override of the demand model, not a request that
                    // competes with whatever else still demands this
                    // service.
                    let must_stop = inner.pending_deps > 0
                        || !inner.mode.can_start()
                        || (inner.demand == 0 && !inner.mode.is_eager());
                    if must_stop {
                        inner.state = State::Stopping;
                    }
                    (false, must_stop)
                }
                _ => (false, false),
            }
        };
        trace!(service = %self.name, should_start, should_stop, "evaluated controller");

        if should_start {
            controller.begin_start();
        } else if should_stop {
            controller.begin_stop();
        }
    }

    fn dependency_transitioned(&self, up: bool) {
        let crossed_to_zero = {
            let mut inner = self.inner.lock().expect("controller lock poisoned");
            if up {
                inner.pending_deps = inner.pending_deps.saturating_sub(1);
            } else {
                inner.pending_deps += 1;
            }
            inner.pending_deps
        };
        let _ = crossed_to_zero;
        if let Some(handle) = self.handle() {
            schedule(handle);
        }
    }

    fn value_handle_any(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::new(self.published_value.clone())
    }

    fn removable(&self) -> bool {
        self.inner.lock().expect("controller lock poisoned").state.is_removable_from()
    }

    fn mark_removed(&self) {
        {
            let mut inner = self.inner.lock().expect("controller lock poisoned");
            inner.state = State::Removed;
        }
        debug!(service = %self.name, "service removed from registry");
        self.notify_listeners(|l| l.removed(&self.name), |l| l.removed(&self.name));
    }

    fn has_live_dependents(&self) -> bool {
        self.inner
            .lock()
            .expect("controller lock poisoned")
            .dependents
            .iter()
            .any(|dependent| dependent.upgrade().is_some())
    }
}

/// Used by `builder`/`installer` error plumbing when a controller is found
/// in a state that does not admit the requested operation.
pub(crate) fn not_ready(name: &ServiceName) -> ContainerError {
    ContainerError::ResolutionError(format!("{name} is not ready"))
}
