//! Transition notifications for controllers.

use crate::name::ServiceName;
use crate::state::State;
use std::error::Error;
use std::sync::Arc;

/// Observes a single controller's lifecycle transitions.
///
/// All methods have no-op defaults; implement only the ones of interest.
/// Listener callbacks run on the executor thread driving the transition and
/// must not block — a listener that panics is caught and logged, never
/// propagated (see [`crate::controller`]).
pub trait ServiceListener<T>: Send + Sync {
    /// Called after the controller leaves `Down`/`StartFailed` for `Starting`.
    fn starting(&self, _name: &ServiceName) {}

    /// Called after a controller reaches `Up`.
    fn up(&self, _name: &ServiceName, _value: &T) {}

    /// Called after a controller leaves `Up` for `Stopping`.
    fn stopping(&self, _name: &ServiceName) {}

    /// Called after a controller returns to `Down` from `Stopping`.
    fn down(&self, _name: &ServiceName) {}

    /// Called if a start attempt ends in `StartFailed`.
    fn start_failed(&self, _name: &ServiceName, _reason: &(dyn Error + 'static)) {}

    /// Called just before a controller is dropped from the registry.
    fn removed(&self, _name: &ServiceName) {}
}

/// A listener attached to every service in a batch, rather than one
/// specific service (`BatchBuilder::add_listener` vs.
/// `ServiceBuilder::add_listener`). Untyped: a batch spans services
/// exposing unrelated value types, so batch-wide listeners only see the
/// name and the transition, never the value itself.
pub trait BatchListener: Send + Sync {
    fn starting(&self, _name: &ServiceName) {}
    fn up(&self, _name: &ServiceName) {}
    fn stopping(&self, _name: &ServiceName) {}
    fn down(&self, _name: &ServiceName) {}
    fn start_failed(&self, _name: &ServiceName, _reason: &(dyn Error + 'static)) {}
    fn removed(&self, _name: &ServiceName) {}
}

/// Object-safe erasure so controllers can hold a heterogeneous set of
/// listeners without naming `T` at the storage site, mirroring the
/// `AnyFactory` erasure pattern used for service values.
pub(crate) trait AnyServiceListener<T>: Send + Sync {
    fn starting(&self, name: &ServiceName);
    fn up(&self, name: &ServiceName, value: &T);
    fn stopping(&self, name: &ServiceName);
    fn down(&self, name: &ServiceName);
    fn start_failed(&self, name: &ServiceName, reason: &(dyn Error + 'static));
    fn removed(&self, name: &ServiceName);
}

pub(crate) struct ListenerSlot<T> {
    inner: Arc<dyn ServiceListener<T>>,
}

impl<T> ListenerSlot<T> {
    pub(crate) fn new(inner: Arc<dyn ServiceListener<T>>) -> Self {
        Self { inner }
    }
}

impl<T> AnyServiceListener<T> for ListenerSlot<T> {
    fn starting(&self, name: &ServiceName) {
        self.inner.starting(name);
    }

    fn up(&self, name: &ServiceName, value: &T) {
        self.inner.up(name, value);
    }

    fn stopping(&self, name: &ServiceName) {
        self.inner.stopping(name);
    }

    fn down(&self, name: &ServiceName) {
        self.inner.down(name);
    }

    fn start_failed(&self, name: &ServiceName, reason: &(dyn Error + 'static)) {
        self.inner.start_failed(name, reason);
    }

    fn removed(&self, name: &ServiceName) {
        self.inner.removed(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        ups: AtomicUsize,
        downs: AtomicUsize,
    }

    impl ServiceListener<i32> for CountingListener {
        fn up(&self, _name: &ServiceName, _value: &i32) {
            self.ups.fetch_add(1, Ordering::SeqCst);
        }

        fn down(&self, _name: &ServiceName) {
            self.downs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_methods_are_no_ops() {
        struct Silent;
        impl ServiceListener<i32> for Silent {}
        let l = Silent;
        let name = ServiceName::parse("a.b");
        l.starting(&name);
        l.up(&name, &1);
        l.stopping(&name);
        l.down(&name);
        l.removed(&name);
    }

    #[test]
    fn slot_forwards_to_inner_listener() {
        let counting = Arc::new(CountingListener {
            ups: AtomicUsize::new(0),
            downs: AtomicUsize::new(0),
        });
        let slot = ListenerSlot::new(counting.clone() as Arc<dyn ServiceListener<i32>>);
        let name = ServiceName::parse("a.b");
        slot.up(&name, &42);
        slot.down(&name);
        assert_eq!(counting.ups.load(Ordering::SeqCst), 1);
        assert_eq!(counting.downs.load(Ordering::SeqCst), 1);
    }
}
