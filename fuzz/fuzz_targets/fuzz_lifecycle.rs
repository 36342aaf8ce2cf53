#![no_main]

//! Fuzzes mode changes and removal requests against a fixed dependency
//! chain, checking that the state machine never lands outside the
//! documented `State` set and never panics under arbitrary interleavings
//! of `set_mode`/`remove_service`.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_container::{Container, Mode, Service, StartContext, State, StopContext, SyncExecutor, Value};
use std::sync::Arc;

const CHAIN_LEN: usize = 6;

struct Noop;
impl Service<()> for Noop {
    fn start(&self, _ctx: &StartContext) {}
    fn stop(&self, _ctx: &StopContext) {}
    fn value(&self) {}
}

#[derive(Debug, Arbitrary)]
enum LifecycleOp {
    SetMode { slot: u8, mode: u8 },
    Remove { slot: u8 },
    Lookup { slot: u8 },
}

fuzz_target!(|ops: Vec<LifecycleOp>| {
    let container = Container::with_executor(Arc::new(SyncExecutor));
    let mut batch = container.batch_builder();
    for i in 0..CHAIN_LEN {
        let mut svc = batch
            .add_service(format!("svc{i}"), Value::immediate(Arc::new(Noop) as Arc<dyn Service<()>>))
            .unwrap();
        svc.set_mode(Mode::OnDemand);
        if i > 0 {
            svc.add_dependency(format!("svc{}", i - 1));
        }
    }
    batch.install().unwrap();

    for op in ops.into_iter().take(200) {
        match op {
            LifecycleOp::SetMode { slot, mode } => {
                let slot = (slot as usize) % CHAIN_LEN;
                if let Some(controller) = container.get_service(format!("svc{slot}")) {
                    let mode = match mode % 5 {
                        0 => Mode::Never,
                        1 => Mode::OnDemand,
                        2 => Mode::Passive,
                        3 => Mode::Active,
                        _ => Mode::Automatic,
                    };
                    controller.set_mode(mode);
                }
            }
            LifecycleOp::Remove { slot } => {
                let slot = (slot as usize) % CHAIN_LEN;
                let _ = container.remove_service(format!("svc{slot}"));
            }
            LifecycleOp::Lookup { slot } => {
                let slot = (slot as usize) % CHAIN_LEN;
                if let Some(controller) = container.get_service(format!("svc{slot}")) {
                    let state = controller.state();
                    assert!(matches!(
                        state,
                        State::Down | State::Starting | State::Up | State::Stopping | State::StartFailed | State::Removed
                    ));
                }
            }
        }
    }
});
