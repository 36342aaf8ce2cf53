#![no_main]

//! Fuzzes batch installation against a small, arbitrary dependency graph.
//!
//! Builds one batch from a bounded pool of service names, each with a
//! bounded set of dependency edges (which may form cycles or point at
//! missing names), and checks that `install()` either installs every
//! service in the batch or leaves the registry exactly as it was.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_container::{Container, Mode, Service, StartContext, StopContext, SyncExecutor, Value};
use std::sync::Arc;

const POOL_SIZE: usize = 12;

struct Noop;
impl Service<()> for Noop {
    fn start(&self, _ctx: &StartContext) {}
    fn stop(&self, _ctx: &StopContext) {}
    fn value(&self) {}
}

#[derive(Debug, Arbitrary)]
struct StagedService {
    slot: u8,
    dependencies: Vec<u8>,
    mode: u8,
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    services: Vec<StagedService>,
}

fn mode_from(tag: u8) -> Mode {
    match tag % 5 {
        0 => Mode::Never,
        1 => Mode::OnDemand,
        2 => Mode::Passive,
        3 => Mode::Active,
        _ => Mode::Automatic,
    }
}

fuzz_target!(|scenario: Scenario| {
    let container = Container::with_executor(Arc::new(SyncExecutor));
    let mut batch = container.batch_builder();
    let mut staged = std::collections::HashSet::new();

    for svc in scenario.services.into_iter().take(POOL_SIZE) {
        let slot = (svc.slot as usize) % POOL_SIZE;
        let name = format!("svc{slot}");
        if !staged.insert(slot) {
            continue; // duplicate slot in this batch: skip, don't assert on it
        }
        let mut handle = batch
            .add_service(name, Value::immediate(Arc::new(Noop) as Arc<dyn Service<()>>))
            .expect("slot reserved exactly once");
        handle.set_mode(mode_from(svc.mode));
        for dep in svc.dependencies.into_iter().take(4) {
            let dep_slot = (dep as usize) % POOL_SIZE;
            if dep_slot != slot {
                handle.add_dependency(format!("svc{dep_slot}"));
            }
        }
    }

    let staged_count = staged.len();
    match batch.install() {
        Ok(()) => assert_eq!(container.len(), staged_count),
        Err(_) => assert_eq!(container.len(), 0),
    }
});
