//! `Service<T>` — the user-supplied capability — and the lifecycle contexts
//! passed to its `start`/`stop` callbacks.

use crate::error::{ContainerError, Result};
use std::sync::{Arc, Mutex};

// =============================================================================
// Service
// =============================================================================

/// A user-supplied capability with a start/stop lifecycle exposing a value
/// of type `T`. Opaque to the container: `start` and `stop` are called on
/// an executor thread, and `value` is read once the controller is `Up`.
pub trait Service<T>: Send + Sync {
    /// Start the service. Called with `state == Starting`.
    fn start(&self, ctx: &StartContext);

    /// Stop the service. Called with `state == Stopping`.
    fn stop(&self, ctx: &StopContext);

    /// The value this service exposes to dependents once `Up`.
    fn value(&self) -> T;
}

/// Adapt a pair of closures into a [`Service<T>`], for quick construction
/// without a dedicated type — the closure-adapter idiom the teacher uses
/// for `TransientFactory`'s bare `Fn() -> T`.
pub struct FnService<T, S, P>
where
    S: Fn(&StartContext) + Send + Sync,
    P: Fn(&StopContext) + Send + Sync,
{
    start: S,
    stop: P,
    make_value: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T, S, P> FnService<T, S, P>
where
    S: Fn(&StartContext) + Send + Sync,
    P: Fn(&StopContext) + Send + Sync,
{
    pub fn new<F>(start: S, stop: P, make_value: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            start,
            stop,
            make_value: Box::new(make_value),
        }
    }
}

impl<T, S, P> Service<T> for FnService<T, S, P>
where
    S: Fn(&StartContext) + Send + Sync,
    P: Fn(&StopContext) + Send + Sync,
{
    fn start(&self, ctx: &StartContext) {
        (self.start)(ctx)
    }

    fn stop(&self, ctx: &StopContext) {
        (self.stop)(ctx)
    }

    fn value(&self) -> T {
        (self.make_value)()
    }
}

// =============================================================================
// Lifecycle context
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No call to `asynchronous()` yet; a synchronous return completes.
    Sync,
    /// `asynchronous()` was called; awaiting `complete()`/`failed()`.
    Async,
    /// Terminal: completed (successfully, for both start and stop).
    Completed,
    /// Terminal: failed (start only).
    Failed,
}

struct Inner {
    phase: Phase,
}

/// The outcome of an asynchronous lifecycle transition, delivered to the
/// controller via the settle callback registered through
/// [`LifecycleContextState::set_on_settle`].
pub(crate) enum SettleOutcome {
    Completed,
    Failed(Arc<dyn std::error::Error + Send + Sync>),
}

/// Shared state backing a [`StartContext`]/[`StopContext`] pair. Not part
/// of the public API; contexts are handed out by the controller.
pub(crate) struct LifecycleContextState {
    inner: Mutex<Inner>,
    allow_failed: bool,
    on_settle: Mutex<Option<Box<dyn FnOnce(SettleOutcome) + Send>>>,
}

impl LifecycleContextState {
    pub(crate) fn new(allow_failed: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { phase: Phase::Sync }),
            allow_failed,
            on_settle: Mutex::new(None),
        })
    }

    /// Register the callback the controller is notified through when a
    /// transition that was declared `asynchronous()` later settles. Must be
    /// called before handing the context to the service's callback.
    pub(crate) fn set_on_settle(&self, f: impl FnOnce(SettleOutcome) + Send + 'static) {
        *self.on_settle.lock().expect("settle slot poisoned") = Some(Box::new(f));
    }

    fn fire_settle(&self, outcome: SettleOutcome) {
        if let Some(cb) = self.on_settle.lock().expect("settle slot poisoned").take() {
            cb(outcome);
        }
    }

    /// Called once the callback (`start`/`stop`) has returned control to the
    /// controller. Returns `true` if the transition should complete
    /// synchronously (the callback never called `asynchronous()`).
    pub(crate) fn finished_synchronously(&self) -> bool {
        let inner = self.inner.lock().expect("lifecycle context lock poisoned");
        inner.phase == Phase::Sync
    }

    /// Whether the transition has reached a terminal outcome (used by the
    /// controller to know an async transition has resolved).
    pub(crate) fn is_terminal(&self) -> bool {
        let inner = self.inner.lock().expect("lifecycle context lock poisoned");
        matches!(inner.phase, Phase::Completed | Phase::Failed)
    }

    fn asynchronous(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("lifecycle context lock poisoned");
        match inner.phase {
            Phase::Sync => {
                inner.phase = Phase::Async;
                Ok(())
            }
            _ => Err(ContainerError::IllegalState(
                "asynchronous() may only be called once, before completion",
            )),
        }
    }

    fn complete(&self) -> Result<()> {
        let was_async = {
            let mut inner = self.inner.lock().expect("lifecycle context lock poisoned");
            match inner.phase {
                Phase::Sync | Phase::Async => {
                    let was_async = inner.phase == Phase::Async;
                    inner.phase = Phase::Completed;
                    was_async
                }
                Phase::Completed | Phase::Failed => {
                    return Err(ContainerError::IllegalState("context already completed"))
                }
            }
        };
        if was_async {
            self.fire_settle(SettleOutcome::Completed);
        }
        Ok(())
    }

    fn failed(&self) -> Result<()> {
        if !self.allow_failed {
            return Err(ContainerError::IllegalState("failed() is only valid on a start context"));
        }
        let mut inner = self.inner.lock().expect("lifecycle context lock poisoned");
        match inner.phase {
            Phase::Async => {
                inner.phase = Phase::Failed;
                Ok(())
            }
            Phase::Sync => Err(ContainerError::IllegalState(
                "failed() requires asynchronous() to have been called first",
            )),
            Phase::Completed | Phase::Failed => {
                Err(ContainerError::IllegalState("context already completed"))
            }
        }
    }
}

/// Passed to [`Service::start`]. Controls whether the `Starting -> Up`
/// transition completes synchronously or asynchronously.
pub struct StartContext {
    pub(crate) state: Arc<LifecycleContextState>,
}

impl StartContext {
    pub(crate) fn new() -> Self {
        Self {
            state: LifecycleContextState::new(true),
        }
    }

    /// Declare that the start will finish later. Must be called before the
    /// synchronous return from `start` in order to defer completion.
    pub fn asynchronous(&self) -> Result<()> {
        self.state.asynchronous()
    }

    /// Normal completion. Implicit on a synchronous return if
    /// `asynchronous()` was not invoked; otherwise must be called exactly
    /// once, and not together with `failed`.
    pub fn complete(&self) -> Result<()> {
        self.state.complete()
    }

    /// Report failure. Valid only after `asynchronous()`, and only once.
    pub fn failed(&self, reason: Arc<dyn std::error::Error + Send + Sync>) -> Result<()> {
        self.state.failed()?;
        self.state.fire_settle(SettleOutcome::Failed(reason));
        Ok(())
    }

    /// Register the callback the controller resumes through once an
    /// asynchronous start settles. Must be called before invoking the
    /// service's `start`.
    pub(crate) fn set_on_settle(&self, f: impl FnOnce(SettleOutcome) + Send + 'static) {
        self.state.set_on_settle(f);
    }

    pub(crate) fn finished_synchronously(&self) -> bool {
        self.state.finished_synchronously()
    }
}

/// Passed to [`Service::stop`]. Controls whether the `Stopping -> Down`
/// transition completes synchronously or asynchronously.
pub struct StopContext {
    pub(crate) state: Arc<LifecycleContextState>,
}

impl StopContext {
    pub(crate) fn new() -> Self {
        Self {
            state: LifecycleContextState::new(false),
        }
    }

    /// Declare that the stop will finish later.
    pub fn asynchronous(&self) -> Result<()> {
        self.state.asynchronous()
    }

    /// Normal completion.
    pub fn complete(&self) -> Result<()> {
        self.state.complete()
    }

    pub(crate) fn set_on_settle(&self, f: impl FnOnce(SettleOutcome) + Send + 'static) {
        self.state.set_on_settle(f);
    }

    pub(crate) fn finished_synchronously(&self) -> bool {
        self.state.finished_synchronously()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synchronous_return_completes_implicitly() {
        let ctx = StartContext::new();
        assert!(ctx.state.finished_synchronously());
    }

    #[test]
    fn asynchronous_then_complete_is_terminal() {
        let ctx = StartContext::new();
        ctx.asynchronous().unwrap();
        assert!(!ctx.state.finished_synchronously());
        ctx.complete().unwrap();
        assert!(ctx.state.is_terminal());
    }

    #[test]
    fn double_complete_is_illegal_state() {
        let ctx = StartContext::new();
        ctx.asynchronous().unwrap();
        ctx.complete().unwrap();
        assert!(matches!(ctx.complete(), Err(ContainerError::IllegalState(_))));
    }

    #[test]
    fn failed_before_asynchronous_is_illegal_state() {
        let ctx = StartContext::new();
        let reason: Arc<dyn std::error::Error + Send + Sync> = Arc::new(crate::error::Reason::from("boom"));
        assert!(matches!(ctx.failed(reason), Err(ContainerError::IllegalState(_))));
    }

    #[test]
    fn failed_on_stop_context_is_rejected() {
        let ctx = StopContext::new();
        ctx.asynchronous().unwrap();
        assert!(!ctx.state.allow_failed);
    }
}
