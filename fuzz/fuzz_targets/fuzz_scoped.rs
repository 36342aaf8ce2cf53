#![no_main]

//! Fuzzes a sequence of batches installed one after another onto the same
//! container, each depending on names from earlier batches, checking that
//! a later batch's failure never disturbs services already committed by
//! an earlier one.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_container::{Container, Mode, Service, StartContext, StopContext, SyncExecutor, Value};
use std::sync::Arc;

const POOL_SIZE: usize = 10;
const MAX_BATCHES: usize = 6;

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
struct BatchPlan {
    services: Vec<StagedService>,
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    batches: Vec<BatchPlan>,
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
    let mut installed_before = 0;

    for plan in scenario.batches.into_iter().take(MAX_BATCHES) {
        let mut batch = container.batch_builder();
        let mut staged = std::collections::HashSet::new();

        for svc in plan.services.into_iter().take(POOL_SIZE) {
            let slot = (svc.slot as usize) % POOL_SIZE;
            if container.get_service(format!("svc{slot}")).is_some() {
                continue; // already installed by an earlier batch
            }
            if !staged.insert(slot) {
                continue;
            }
            let mut handle = batch
                .add_service(format!("svc{slot}"), Value::immediate(Arc::new(Noop) as Arc<dyn Service<()>>))
                .expect("slot reserved exactly once this batch");
            handle.set_mode(mode_from(svc.mode));
            for dep in svc.dependencies.into_iter().take(4) {
                let dep_slot = (dep as usize) % POOL_SIZE;
                if dep_slot != slot {
                    handle.add_dependency(format!("svc{dep_slot}"));
                }
            }
        }

        let attempted = staged.len();
        match batch.install() {
            Ok(()) => installed_before += attempted,
            Err(_) => {}
        }
        assert_eq!(container.len(), installed_before);
    }
});
