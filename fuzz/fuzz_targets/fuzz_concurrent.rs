#![no_main]

//! Fuzzes concurrent lookups, mode changes, and removals against one
//! shared container from several threads at once, checking only that
//! nothing panics or deadlocks under the thread pool executor.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_container::{Container, Mode, Service, StartContext, StopContext, Value};
use std::sync::Arc;
use std::thread;

const POOL_SIZE: usize = 8;

struct Noop;
impl Service<()> for Noop {
    fn start(&self, _ctx: &StartContext) {}
    fn stop(&self, _ctx: &StopContext) {}
    fn value(&self) {}
}

#[derive(Debug, Clone, Arbitrary)]
enum ThreadOp {
    Lookup(u8),
    SetMode(u8, u8),
    Remove(u8),
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    thread_count: u8,
    ops: Vec<ThreadOp>,
}

fuzz_target!(|scenario: Scenario| {
    let container = Container::new();
    let mut batch = container.batch_builder();
    for i in 0..POOL_SIZE {
        batch
            .add_service(format!("svc{i}"), Value::immediate(Arc::new(Noop) as Arc<dyn Service<()>>))
            .unwrap()
            .set_mode(Mode::OnDemand);
    }
    batch.install().unwrap();

    let thread_count = (scenario.thread_count % 6).max(1) as usize;
    let ops = scenario.ops;

    let handles: Vec<_> = (0..thread_count)
        .map(|_| {
            let container = container.clone();
            let ops = ops.clone();
            thread::spawn(move || {
                for op in ops.into_iter().take(100) {
                    match op {
                        ThreadOp::Lookup(slot) => {
                            let slot = (slot as usize) % POOL_SIZE;
                            let _ = container.get_service(format!("svc{slot}"));
                        }
                        ThreadOp::SetMode(slot, mode) => {
                            let slot = (slot as usize) % POOL_SIZE;
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
                        ThreadOp::Remove(slot) => {
                            let slot = (slot as usize) % POOL_SIZE;
                            let _ = container.remove_service(format!("svc{slot}"));
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }

    let _ = container.len();
});
