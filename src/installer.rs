//! The iterative, stack-safe dependency walker that turns a batch of staged
//! service definitions into installed controllers, in topological order.
//!
//! Models entries as indices into an arena (a `Vec<ArenaEntry>`) rather than
//! linked objects, per the design note in `spec.md` §9: a `prev` back-link
//! on each entry replaces the call stack, so a dependency chain of any depth
//! cannot overflow it.

use crate::builder::BatchEntry;
use crate::controller::{propagate_demand, ControllerHandle};
use crate::error::{ContainerError, Result};
use crate::executor::Executor;
use crate::listener::BatchListener;
use crate::mode::Mode;
use crate::name::ServiceName;
use crate::registry::ServiceRegistry;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

#[cfg(not(feature = "logging"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "logging"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

struct ArenaEntry {
    name: ServiceName,
    mode: Mode,
    dependencies: Vec<ServiceName>,
    entry: Option<BatchEntry>,
    processed: bool,
    visited: bool,
    prev: Option<usize>,
    i: usize,
    resolved_deps: Vec<Arc<dyn ControllerHandle>>,
}

/// Resolve `entries` against `registry` and install every one, in an order
/// consistent with the dependency DAG, or roll back the whole batch on the
/// first failure.
pub(crate) fn install_batch(
    registry: &ServiceRegistry,
    executor: Arc<dyn Executor>,
    batch_listeners: Vec<Arc<dyn BatchListener>>,
    entries: HashMap<ServiceName, BatchEntry>,
) -> Result<()> {
    debug!(count = entries.len(), "installing batch");
    let mut index_of: HashMap<ServiceName, usize> = HashMap::with_capacity(entries.len());
    let mut arena: Vec<ArenaEntry> = Vec::with_capacity(entries.len());
    for (name, entry) in entries {
        index_of.insert(name.clone(), arena.len());
        arena.push(ArenaEntry {
            dependencies: entry.dependencies.clone(),
            mode: entry.mode,
            name,
            entry: Some(entry),
            processed: false,
            visited: false,
            prev: None,
            i: 0,
            resolved_deps: Vec::new(),
        });
    }

    let mut inserted: Vec<ServiceName> = Vec::new();
    let mut newly_eager: Vec<Arc<dyn ControllerHandle>> = Vec::new();

    let outcome = run(registry, &executor, &batch_listeners, &mut arena, &index_of, &mut inserted, &mut newly_eager);

    match outcome {
        Ok(()) => {
            debug!(installed = inserted.len(), "batch installed");
            // Demand placement happens only once the whole batch is
            // durably installed, so a mid-batch failure never starts a
            // service whose install is about to be rolled back.
            for controller in newly_eager {
                propagate_demand(controller, 1);
            }
            Ok(())
        }
        Err(err) => {
            debug!(error = %err, rolled_back = inserted.len(), "batch install failed, rolling back");
            for name in inserted.iter().rev() {
                registry.remove_unconditionally(name);
            }
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    registry: &ServiceRegistry,
    executor: &Arc<dyn Executor>,
    batch_listeners: &[Arc<dyn BatchListener>],
    arena: &mut [ArenaEntry],
    index_of: &HashMap<ServiceName, usize>,
    inserted: &mut Vec<ServiceName>,
    newly_eager: &mut Vec<Arc<dyn ControllerHandle>>,
) -> Result<()> {
    let lookup = |name: &ServiceName| registry.get(name);

    let mut scan_from = 0;
    loop {
        while scan_from < arena.len() && arena[scan_from].processed {
            scan_from += 1;
        }
        if scan_from >= arena.len() {
            return Ok(());
        }

        let mut current = scan_from;
        arena[current].visited = true;

        loop {
            let next_dep = arena[current].i;
            if next_dep < arena[current].dependencies.len() {
                let dep_name = arena[current].dependencies[next_dep].clone();

                if let Some(controller) = lookup(&dep_name) {
                    arena[current].resolved_deps.push(controller);
                    arena[current].i += 1;
                    continue;
                }

                match index_of.get(&dep_name) {
                    None => {
                        return Err(ContainerError::MissingDependency {
                            dependent: arena[current].name.clone(),
                            dependency: dep_name,
                        });
                    }
                    Some(&dep_idx) => {
                        if arena[dep_idx].visited && !arena[dep_idx].processed {
                            return Err(ContainerError::CircularDependency(dep_name));
                        }
                        if arena[dep_idx].processed {
                            // Installed earlier via a different branch of
                            // this same batch; resolve through the registry
                            // now that it is actually present there.
                            let controller = lookup(&dep_name).ok_or_else(|| {
                                ContainerError::ResolutionError(format!(
                                    "{dep_name} was installed earlier in this batch but is no longer in the registry"
                                ))
                            })?;
                            arena[current].resolved_deps.push(controller);
                            arena[current].i += 1;
                            continue;
                        }
                        arena[dep_idx].prev = Some(current);
                        arena[dep_idx].visited = true;
                        current = dep_idx;
                        continue;
                    }
                }
            }

            // Every dependency of `current` is resolved: build and install.
            let idx = current;
            let resolved_deps = std::mem::take(&mut arena[idx].resolved_deps);
            let entry = arena[idx].entry.take().expect("arena entry built at most once");
            let name = arena[idx].name.clone();
            let mode = arena[idx].mode;

            let controller = entry
                .build(resolved_deps, Arc::clone(executor), batch_listeners.to_vec(), &lookup)
                .map_err(|err| {
                    // Surface resolution failures (e.g. an injection whose
                    // source never resolved) under the entry's own name.
                    match err {
                        ContainerError::ResolutionError(reason) => {
                            ContainerError::ResolutionError(format!("{name}: {reason}"))
                        }
                        other => other,
                    }
                })?;

            registry.insert_new(name.clone(), Arc::clone(&controller))?;
            trace!(service = %name, "installed service");
            inserted.push(name);
            if mode.is_eager() {
                newly_eager.push(controller);
            }

            arena[idx].visited = false;
            arena[idx].processed = true;

            match arena[idx].prev.take() {
                Some(parent) => {
                    current = parent;
                    continue;
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BatchBuilder;
    use crate::executor::SyncExecutor;
    use crate::service::{Service, StartContext, StopContext};
    use crate::state::State;
    use std::sync::Mutex;

    struct Recorder(Arc<Mutex<Vec<String>>>);
    impl Service<()> for Recorder {
        fn start(&self, _ctx: &StartContext) {
            self.0.lock().unwrap().push("start".into());
        }
        fn stop(&self, _ctx: &StopContext) {}
        fn value(&self) {}
    }

    fn batch(registry: ServiceRegistry) -> BatchBuilder {
        BatchBuilder::new(registry, Arc::new(SyncExecutor))
    }

    #[test]
    fn linear_dependency_installs_provider_before_dependent() {
        let registry = ServiceRegistry::new();
        let mut b = batch(registry.clone());

        b.add_service(
            "b",
            crate::value::Value::immediate(Arc::new(Recorder(Default::default())) as Arc<dyn Service<()>>),
        )
        .unwrap();
        b.add_service(
            "a",
            crate::value::Value::immediate(Arc::new(Recorder(Default::default())) as Arc<dyn Service<()>>),
        )
        .unwrap()
        .add_dependency("b");
        b.install().unwrap();

        assert_eq!(registry.get(&ServiceName::parse("a")).unwrap().state(), State::Up);
        assert_eq!(registry.get(&ServiceName::parse("b")).unwrap().state(), State::Up);
    }

    #[test]
    fn direct_cycle_is_rejected_and_registry_stays_empty() {
        let registry = ServiceRegistry::new();
        let mut b = batch(registry.clone());
        b.add_service(
            "a",
            crate::value::Value::immediate(Arc::new(Recorder(Default::default())) as Arc<dyn Service<()>>),
        )
        .unwrap()
        .add_dependency("b");
        b.add_service(
            "b",
            crate::value::Value::immediate(Arc::new(Recorder(Default::default())) as Arc<dyn Service<()>>),
        )
        .unwrap()
        .add_dependency("a");

        let err = b.install().unwrap_err();
        assert!(matches!(err, ContainerError::CircularDependency(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_dependency_rolls_back_the_whole_batch() {
        let registry = ServiceRegistry::new();
        let mut b = batch(registry.clone());
        b.add_service(
            "a",
            crate::value::Value::immediate(Arc::new(Recorder(Default::default())) as Arc<dyn Service<()>>),
        )
        .unwrap()
        .add_dependency("nowhere");
        b.add_service(
            "standalone",
            crate::value::Value::immediate(Arc::new(Recorder(Default::default())) as Arc<dyn Service<()>>),
        )
        .unwrap();

        let err = b.install().unwrap_err();
        assert!(matches!(err, ContainerError::MissingDependency { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_against_live_registry_is_rejected_and_first_install_survives() {
        let registry = ServiceRegistry::new();
        let mut first = batch(registry.clone());
        first
            .add_service(
                "a",
                crate::value::Value::immediate(Arc::new(Recorder(Default::default())) as Arc<dyn Service<()>>),
            )
            .unwrap();
        first.install().unwrap();

        let mut second = batch(registry.clone());
        second
            .add_service(
                "a",
                crate::value::Value::immediate(Arc::new(Recorder(Default::default())) as Arc<dyn Service<()>>),
            )
            .unwrap();
        let err = second.install().unwrap_err();
        assert!(matches!(err, ContainerError::DuplicateService(_)));
        assert!(registry.get(&ServiceName::parse("a")).is_some());
    }

    #[test]
    fn linear_chain_of_ten_thousand_installs_without_overflowing_the_stack() {
        let registry = ServiceRegistry::new();
        let mut b = batch(registry.clone());
        let depth = 10_000;
        for i in 0..depth {
            let mut svc = b
                .add_service(
                    format!("svc{i}"),
                    crate::value::Value::immediate(Arc::new(Recorder(Default::default())) as Arc<dyn Service<()>>),
                )
                .unwrap();
            if i > 0 {
                svc.add_dependency(format!("svc{}", i - 1));
            }
        }
        b.install().unwrap();
        assert_eq!(registry.len(), depth);
        for i in 0..depth {
            assert_eq!(
                registry.get(&ServiceName::parse(&format!("svc{i}"))).unwrap().state(),
                State::Up
            );
        }
    }
}
