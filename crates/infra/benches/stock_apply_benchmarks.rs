use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use minierp_core::{ItemId, PurchaseOrderId, SalesOrderId, UserId, WarehouseId};
use minierp_infra::{InMemoryStore, StockCoordinator};
use minierp_inventory::{StockDeltas, StockKey};
use tokio::runtime::Runtime;

const ACTOR: UserId = UserId::new(1);

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn batch(size: i64, qty: i64) -> StockDeltas {
    StockDeltas::from_lines(
        (1..=size).map(|item| (StockKey::new(ItemId::new(item), WarehouseId::new(1)), qty)),
    )
    .expect("valid deltas")
}

fn bench_batch_apply(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("batch_apply");

    for size in [1i64, 10, 100] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("inbound_existing_rows", size), &size, |b, &size| {
            let coordinator = StockCoordinator::new(InMemoryStore::new());
            let deltas = batch(size, 1);
            rt.block_on(coordinator.increase(&deltas, PurchaseOrderId::new(1), ACTOR))
                .expect("seed");

            b.iter(|| {
                rt.block_on(coordinator.increase(
                    black_box(&deltas),
                    PurchaseOrderId::new(2),
                    ACTOR,
                ))
                .expect("apply")
            });
        });

        group.bench_with_input(BenchmarkId::new("inbound_then_outbound", size), &size, |b, &size| {
            let coordinator = StockCoordinator::new(InMemoryStore::new());
            let deltas = batch(size, 1);

            b.iter(|| {
                rt.block_on(async {
                    coordinator
                        .increase(&deltas, PurchaseOrderId::new(3), ACTOR)
                        .await
                        .expect("inbound");
                    coordinator
                        .decrease(&deltas, SalesOrderId::new(3), ACTOR)
                        .await
                        .expect("outbound")
                })
            });
        });
    }

    group.finish();
}

fn bench_adjust(c: &mut Criterion) {
    let rt = runtime();
    let coordinator = StockCoordinator::new(InMemoryStore::new());
    let key = StockKey::new(ItemId::new(1), WarehouseId::new(1));
    let mut counted = 0i64;

    c.bench_function("adjust_single_key", |b| {
        b.iter(|| {
            counted = (counted + 1) % 1000 + 1;
            rt.block_on(coordinator.adjust(key, black_box(counted), "cycle count", ACTOR))
                .expect("adjust")
        })
    });
}

criterion_group!(benches, bench_batch_apply, bench_adjust);
criterion_main!(benches);
