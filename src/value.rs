//! Value and Injector — lazy read-only handles and their write sinks.
//!
//! A [`Value<T>`] exposes one operation, [`Value::get`], returning an
//! `Arc<T>` or failing with [`ContainerError::InvalidValue`] when the value
//! is not yet available. An [`Injector<T>`] is the dual write sink that
//! populates (or clears) the slot a paired `Value` reads from.

use crate::error::{ContainerError, Result};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

// =============================================================================
// Injected values
// =============================================================================

type Slot<T> = Arc<RwLock<Option<Arc<T>>>>;

/// Create a write-once-per-injection value/injector pair.
///
/// `get()` on the returned `Value` fails with `InvalidValue` until
/// `inject()` is called on the paired `Injector`; `uninject()` clears it
/// again, after which `get()` fails once more.
pub fn injected<T: Send + Sync + 'static>() -> (Value<T>, Injector<T>) {
    let slot: Slot<T> = Arc::new(RwLock::new(None));
    (
        Value(ValueInner::Injected(Arc::clone(&slot))),
        Injector(slot),
    )
}

/// The write sink half of an [`injected`] pair.
pub struct Injector<T: Send + Sync + 'static>(Slot<T>);

impl<T: Send + Sync + 'static> Injector<T> {
    /// Populate the paired value. Any subsequent `get()` observes this
    /// atomically (guarded by the same `RwLock` write).
    pub fn inject(&self, value: T) {
        self.inject_arc(Arc::new(value));
    }

    /// Populate the paired value from an already-shared `Arc`.
    pub fn inject_arc(&self, value: Arc<T>) {
        *self.0.write().expect("injector lock poisoned") = Some(value);
    }

    /// Clear the paired value; subsequent `get()` calls fail until the next
    /// `inject`.
    pub fn uninject(&self) {
        *self.0.write().expect("injector lock poisoned") = None;
    }
}

impl<T: Send + Sync + 'static> Clone for Injector<T> {
    fn clone(&self) -> Self {
        Injector(Arc::clone(&self.0))
    }
}

// =============================================================================
// Thread-local slot values
// =============================================================================

thread_local! {
    static THREAD_LOCAL_SLOTS: RefCell<HashMap<u64, Arc<dyn Any + Send + Sync>>> =
        RefCell::new(HashMap::new());
}

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

/// Create a value/binder pair backed by a slot bound on the current thread.
///
/// `get()` returns the value most recently bound on *this* thread via the
/// returned [`ThreadLocalBinder::bind`]; it fails with `InvalidValue` on a
/// thread that never bound it, mirroring per-request or per-transaction
/// context values.
pub fn thread_local_value<T: Send + Sync + 'static>() -> (Value<T>, ThreadLocalBinder<T>) {
    let id = NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed);
    (
        Value(ValueInner::ThreadLocal(id, std::marker::PhantomData)),
        ThreadLocalBinder {
            id,
            _marker: std::marker::PhantomData,
        },
    )
}

/// Binds a value into the current thread's slot of a [`thread_local_value`]
/// pair.
pub struct ThreadLocalBinder<T: Send + Sync + 'static> {
    id: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Send + Sync + 'static> ThreadLocalBinder<T> {
    /// Bind `value` into this thread's slot for the duration of `f`,
    /// restoring whatever was bound before (including "nothing") once `f`
    /// returns, even if `f` panics.
    pub fn bind<R>(&self, value: Arc<T>, f: impl FnOnce() -> R) -> R {
        let previous = THREAD_LOCAL_SLOTS.with(|slots| {
            slots
                .borrow_mut()
                .insert(self.id, value as Arc<dyn Any + Send + Sync>)
        });
        struct Restore {
            id: u64,
            previous: Option<Arc<dyn Any + Send + Sync>>,
        }
        impl Drop for Restore {
            fn drop(&mut self) {
                THREAD_LOCAL_SLOTS.with(|slots| match self.previous.take() {
                    Some(prev) => {
                        slots.borrow_mut().insert(self.id, prev);
                    }
                    None => {
                        slots.borrow_mut().remove(&self.id);
                    }
                });
            }
        }
        let _restore = Restore {
            id: self.id,
            previous,
        };
        f()
    }
}

fn read_thread_local<T: Send + Sync + 'static>(id: u64) -> Option<Arc<T>> {
    THREAD_LOCAL_SLOTS.with(|slots| {
        slots
            .borrow()
            .get(&id)
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    })
}

// =============================================================================
// Construction translator (nested construction via a thread-local stack)
// =============================================================================

thread_local! {
    static CONSTRUCTION_STACK: RefCell<Vec<Arc<dyn Any + Send + Sync>>> =
        RefCell::new(Vec::new());
}

/// Read the value currently bound by the innermost enclosing
/// [`Value::constructed`] call on this thread.
///
/// Fails with `InvalidValue` outside of such a call, or if the bound value
/// is not of type `T`.
pub fn injected_value<T: Send + Sync + 'static>() -> Result<Arc<T>> {
    CONSTRUCTION_STACK
        .with(|stack| stack.borrow().last().cloned())
        .ok_or(ContainerError::InvalidValue("no construction target bound on this thread"))?
        .downcast::<T>()
        .map_err(|_| ContainerError::InvalidValue("construction target is a different type"))
}

fn with_construction_target<P: Send + Sync + 'static, R>(value: Arc<P>, f: impl FnOnce() -> R) -> R {
    CONSTRUCTION_STACK.with(|stack| stack.borrow_mut().push(value as Arc<dyn Any + Send + Sync>));
    struct Guard;
    impl Drop for Guard {
        fn drop(&mut self) {
            CONSTRUCTION_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
        }
    }
    let _guard = Guard;
    f()
}

// =============================================================================
// Value
// =============================================================================

enum ValueInner<T: Send + Sync + 'static> {
    Immediate(Arc<T>),
    Injected(Slot<T>),
    ThreadLocal(u64, std::marker::PhantomData<T>),
    FromFn(Arc<dyn Fn() -> Result<Arc<T>> + Send + Sync>),
}

impl<T: Send + Sync + 'static> Clone for ValueInner<T> {
    fn clone(&self) -> Self {
        match self {
            ValueInner::Immediate(v) => ValueInner::Immediate(Arc::clone(v)),
            ValueInner::Injected(slot) => ValueInner::Injected(Arc::clone(slot)),
            ValueInner::ThreadLocal(id, _) => ValueInner::ThreadLocal(*id, std::marker::PhantomData),
            ValueInner::FromFn(f) => ValueInner::FromFn(Arc::clone(f)),
        }
    }
}

/// A lazy, read-only handle to a `T`. See the module docs for the variant
/// table.
pub struct Value<T: Send + Sync + 'static>(ValueInner<T>);

impl<T: Send + Sync + 'static> Clone for Value<T> {
    fn clone(&self) -> Self {
        Value(self.0.clone())
    }
}

impl<T: Send + Sync + 'static> Value<T> {
    /// A value that is always available, supplied up front.
    pub fn immediate(value: T) -> Self {
        Value(ValueInner::Immediate(Arc::new(value)))
    }

    /// A value backed by an already-shared `Arc`.
    pub fn immediate_arc(value: Arc<T>) -> Self {
        Value(ValueInner::Immediate(value))
    }

    /// A value computed by an arbitrary fallible function, evaluated on
    /// every `get()` call (no caching). Used internally by
    /// [`Value::translated`] and [`Value::constructed`].
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Value(ValueInner::FromFn(Arc::new(f)))
    }

    /// A value that is a function of another value: `get()` returns
    /// `f(source.get()?)`, propagating `source`'s failure unchanged and
    /// wrapping any failure of `f` itself as
    /// [`ContainerError::TranslationException`].
    pub fn translated<U, F, E>(source: Value<U>, f: F) -> Self
    where
        U: Send + Sync + 'static,
        F: Fn(&U) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        Value::from_fn(move || {
            let input = source.get()?;
            f(&input)
                .map(Arc::new)
                .map_err(|e| ContainerError::translation_failed(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
        })
    }

    /// The lazy-construction translator described in the data model: binds
    /// `param`'s resolved value onto the thread-local construction slot for
    /// the duration of `factory`, so a nested [`injected_value`] call inside
    /// `factory` observes it. The slot is saved and restored on every exit
    /// path, including panics.
    pub fn constructed<P, F>(param: Value<P>, factory: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Value::from_fn(move || {
            let bound = param.get()?;
            Ok(Arc::new(with_construction_target(bound, &factory)))
        })
    }

    /// Resolve the value, or fail with [`ContainerError::InvalidValue`] (or
    /// a propagated upstream failure) if it is not currently available.
    pub fn get(&self) -> Result<Arc<T>> {
        match &self.0 {
            ValueInner::Immediate(v) => Ok(Arc::clone(v)),
            ValueInner::Injected(slot) => slot
                .read()
                .expect("injector lock poisoned")
                .clone()
                .ok_or(ContainerError::InvalidValue("value has not been injected")),
            ValueInner::ThreadLocal(id, _) => {
                read_thread_local(*id).ok_or(ContainerError::InvalidValue("value is not bound on this thread"))
            }
            ValueInner::FromFn(f) => f(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_always_succeeds() {
        let v = Value::immediate(42);
        assert_eq!(*v.get().unwrap(), 42);
    }

    #[test]
    fn injected_fails_until_populated_then_succeeds_then_fails_after_uninject() {
        let (value, injector) = injected::<String>();
        assert!(matches!(value.get(), Err(ContainerError::InvalidValue(_))));

        injector.inject("hello".to_string());
        assert_eq!(&*value.get().unwrap(), "hello");

        injector.uninject();
        assert!(matches!(value.get(), Err(ContainerError::InvalidValue(_))));
    }

    #[test]
    fn thread_local_is_per_thread() {
        let (value, binder) = thread_local_value::<u32>();
        assert!(value.get().is_err());

        let result = binder.bind(Arc::new(7), || value.get().map(|v| *v));
        assert_eq!(result.unwrap(), 7);

        // Binding is scoped: after bind() returns, it's gone again.
        assert!(value.get().is_err());
    }

    #[test]
    fn thread_local_restores_previous_binding_on_nested_bind() {
        let (value, binder) = thread_local_value::<u32>();
        binder.bind(Arc::new(1), || {
            assert_eq!(*value.get().unwrap(), 1);
            binder.bind(Arc::new(2), || {
                assert_eq!(*value.get().unwrap(), 2);
            });
            assert_eq!(*value.get().unwrap(), 1);
        });
    }

    #[test]
    fn translated_propagates_source_failure() {
        let (source, _injector) = injected::<u32>();
        let translated: Value<u32> = Value::translated(source, |v: &u32| Ok::<u32, std::convert::Infallible>(v + 1));
        assert!(matches!(translated.get(), Err(ContainerError::InvalidValue(_))));
    }

    #[test]
    fn translated_applies_function() {
        let source = Value::immediate(41u32);
        let translated: Value<u32> = Value::translated(source, |v: &u32| Ok::<u32, std::convert::Infallible>(v + 1));
        assert_eq!(*translated.get().unwrap(), 42);
    }

    #[test]
    fn translated_wraps_function_failure() {
        #[derive(Debug)]
        struct Boom;
        impl std::fmt::Display for Boom {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "boom")
            }
        }
        impl std::error::Error for Boom {}

        let source = Value::immediate(1u32);
        let translated: Value<u32> = Value::translated(source, |_: &u32| Err::<u32, Boom>(Boom));
        assert!(matches!(translated.get(), Err(ContainerError::TranslationException(_))));
    }

    #[test]
    fn constructed_binds_param_for_injected_value_lookup() {
        #[derive(Debug, PartialEq)]
        struct Config {
            debug: bool,
        }

        let param = Value::immediate(Config { debug: true });
        let constructed: Value<String> = Value::constructed(param, || {
            let cfg = injected_value::<Config>().unwrap();
            if cfg.debug { "debug".to_string() } else { "release".to_string() }
        });

        assert_eq!(&*constructed.get().unwrap(), "debug");
    }

    #[test]
    fn injected_value_outside_construction_fails() {
        assert!(injected_value::<u32>().is_err());
    }
}
