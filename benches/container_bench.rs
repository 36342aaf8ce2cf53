//! Benchmarks for the service container: batch install throughput and
//! service lookup/resolution cost.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use service_container::{Container, Mode, Service, StartContext, StopContext, SyncExecutor, Value};
use std::sync::Arc;

struct SmallService {
    value: i32,
}

impl Service<i32> for SmallService {
    fn start(&self, _ctx: &StartContext) {}
    fn stop(&self, _ctx: &StopContext) {}
    fn value(&self) -> i32 {
        self.value
    }
}

struct MediumService {
    name: String,
    values: Vec<i32>,
}

impl Service<(String, Vec<i32>)> for MediumService {
    fn start(&self, _ctx: &StartContext) {}
    fn stop(&self, _ctx: &StopContext) {}
    fn value(&self) -> (String, Vec<i32>) {
        (self.name.clone(), self.values.clone())
    }
}

fn container() -> Container {
    Container::with_executor(Arc::new(SyncExecutor))
}

fn bench_install(c: &mut Criterion) {
    let mut group = c.benchmark_group("install");

    group.bench_function("single_automatic_service", |b| {
        b.iter(|| {
            let container = container();
            let mut batch = container.batch_builder();
            batch
                .add_service("svc", Value::immediate(Arc::new(SmallService { value: 42 }) as Arc<dyn Service<i32>>))
                .unwrap();
            batch.install().unwrap();
            black_box(container)
        })
    });

    group.bench_function("linear_chain_of_10", |b| {
        b.iter(|| {
            let container = container();
            let mut batch = container.batch_builder();
            for i in 0..10 {
                let mut svc = batch
                    .add_service(
                        format!("svc{i}"),
                        Value::immediate(Arc::new(SmallService { value: i }) as Arc<dyn Service<i32>>),
                    )
                    .unwrap();
                if i > 0 {
                    svc.add_dependency(format!("svc{}", i - 1));
                }
            }
            batch.install().unwrap();
            black_box(container)
        })
    });

    group.bench_function("on_demand_batch_of_4", |b| {
        b.iter(|| {
            let container = container();
            let mut batch = container.batch_builder();
            for i in 0..4 {
                batch
                    .add_service(
                        format!("svc{i}"),
                        Value::immediate(Arc::new(SmallService { value: i }) as Arc<dyn Service<i32>>),
                    )
                    .unwrap()
                    .set_mode(Mode::OnDemand);
            }
            batch.install().unwrap();
            black_box(container)
        })
    });

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    group.throughput(Throughput::Elements(1));

    let container = container();
    let mut batch = container.batch_builder();
    batch
        .add_service("small", Value::immediate(Arc::new(SmallService { value: 42 }) as Arc<dyn Service<i32>>))
        .unwrap();
    batch
        .add_service(
            "medium",
            Value::immediate(Arc::new(MediumService {
                name: "test".to_string(),
                values: vec![1, 2, 3, 4, 5],
            }) as Arc<dyn Service<(String, Vec<i32>)>>),
        )
        .unwrap();
    batch.install().unwrap();

    group.bench_function("get_service", |b| {
        b.iter(|| black_box(container.get_service("small")))
    });

    group.bench_function("get_required_service", |b| {
        b.iter(|| black_box(container.get_required_service("small").unwrap()))
    });

    group.bench_function("get_service_missing", |b| {
        b.iter(|| black_box(container.get_service("absent")))
    });

    group.finish();
}

fn bench_concurrent_lookup(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");

    group.bench_function("concurrent_reads_4", |b| {
        let container = container();
        let mut batch = container.batch_builder();
        batch
            .add_service("small", Value::immediate(Arc::new(SmallService { value: 42 }) as Arc<dyn Service<i32>>))
            .unwrap();
        batch.install().unwrap();

        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let container = container.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let _ = container.get_service("small");
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_install, bench_lookup, bench_concurrent_lookup);
criterion_main!(benches);
