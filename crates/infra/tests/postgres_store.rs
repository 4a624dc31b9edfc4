//! Postgres-backed stock store scenarios.
//!
//! Skipped unless `MINIERP_TEST_DATABASE_URL` points at a disposable database.

use std::time::Duration;

use sqlx::{PgPool, Row};

use minierp_core::{Entity, ItemId, PartnerId, PurchaseOrderId, UserId, WarehouseId};
use minierp_infra::{
    LedgerFilter, OrderService, Pagination, PgStore, RetryPolicies, RetryPolicy, StockCoordinator,
    StockError, StockStore, StockTx, TransientKind,
};
use minierp_inventory::{FlowKind, RefType, StockDeltas, StockKey, TransactionType};
use minierp_sales::{CustomerInfo, SalesOrderStatus, ShippingAddress};

const ENV_DB_URL: &str = "MINIERP_TEST_DATABASE_URL";
const ACTOR: UserId = UserId::new(1);

async fn connect() -> anyhow::Result<Option<PgPool>> {
    let url = match std::env::var(ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: {ENV_DB_URL} not set");
            return Ok(None);
        }
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(16)
        .connect(&url)
        .await?;
    minierp_infra::db::migrate(&pool).await?;
    Ok(Some(pool))
}

async fn insert_master(pool: &PgPool, table: &str) -> anyhow::Result<i64> {
    let code = format!("T-{}", rand::random::<u64>());
    let row = sqlx::query(&format!(
        "INSERT INTO {table} (code, name) VALUES ($1, $1) RETURNING id"
    ))
    .bind(&code)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get("id")?)
}

async fn new_key(pool: &PgPool) -> anyhow::Result<StockKey> {
    let item = insert_master(pool, "items").await?;
    let warehouse = insert_master(pool, "warehouses").await?;
    Ok(StockKey::new(ItemId::new(item), WarehouseId::new(warehouse)))
}

fn fast_retry(max_attempts: u32) -> RetryPolicies {
    let policy = RetryPolicy::exponential(max_attempts, Duration::from_millis(10));
    RetryPolicies {
        batch: policy.clone(),
        adjust: policy,
    }
}

fn single(key: StockKey, qty: i64) -> StockDeltas {
    StockDeltas::from_lines([(key, qty)]).expect("valid deltas")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_receipts_create_a_single_row() -> anyhow::Result<()> {
    let Some(pool) = connect().await? else {
        return Ok(());
    };
    let key = new_key(&pool).await?;
    let coordinator = StockCoordinator::with_retry(PgStore::new(pool), fast_retry(5));

    let mut handles = Vec::new();
    for ref_id in 1..=6 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .apply(&single(key, 10), ref_id, FlowKind::PurchaseInbound, true, ACTOR)
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let stock = coordinator.stock(key).await?.expect("row created");
    assert_eq!(stock.qty(), 60);

    let filter = LedgerFilter {
        item_id: Some(key.item_id),
        warehouse_id: Some(key.warehouse_id),
        ..LedgerFilter::default()
    };
    let ledger = coordinator.ledger_entries(&filter, Pagination::default()).await?;
    assert_eq!(ledger.total, 6);
    assert!(ledger.items.iter().all(|e| e.ref_type == Some(RefType::PurchaseOrder)));
    Ok(())
}

#[tokio::test]
async fn insufficient_stock_rolls_back_the_batch() -> anyhow::Result<()> {
    let Some(pool) = connect().await? else {
        return Ok(());
    };
    let a = new_key(&pool).await?;
    let b = new_key(&pool).await?;
    let coordinator = StockCoordinator::with_retry(PgStore::new(pool), fast_retry(3));

    coordinator
        .increase(&single(a, 5), PurchaseOrderId::new(1), ACTOR)
        .await?;
    coordinator
        .increase(&single(b, 1), PurchaseOrderId::new(1), ACTOR)
        .await?;

    let both = StockDeltas::from_lines([(a, 2), (b, 2)])?;
    let result = coordinator
        .apply(&both, 42, FlowKind::SalesOutbound, false, ACTOR)
        .await;
    assert!(matches!(result, Err(StockError::Conflict(_))));
    assert_eq!(coordinator.stock(a).await?.map(|s| s.qty()), Some(5));
    Ok(())
}

#[tokio::test]
async fn adjust_appends_a_reasoned_entry() -> anyhow::Result<()> {
    let Some(pool) = connect().await? else {
        return Ok(());
    };
    let key = new_key(&pool).await?;
    let coordinator = StockCoordinator::with_retry(PgStore::new(pool), fast_retry(3));

    coordinator
        .increase(&single(key, 10), PurchaseOrderId::new(1), ACTOR)
        .await?;
    let entry = coordinator
        .adjust(key, 25, "stocktake", ACTOR)
        .await?
        .expect("non-zero delta");
    assert_eq!(entry.kind, TransactionType::Adjust);
    assert_eq!(entry.qty_delta, 15);

    let stored = coordinator.ledger_entry(entry.id).await?;
    assert_eq!(stored.reason.as_deref(), Some("stocktake"));
    assert_eq!(stored.ref_id, None);

    assert!(coordinator.adjust(key, 25, "recount", ACTOR).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_item_maps_to_not_found() -> anyhow::Result<()> {
    let Some(pool) = connect().await? else {
        return Ok(());
    };
    let warehouse = insert_master(&pool, "warehouses").await?;
    let coordinator = StockCoordinator::with_retry(PgStore::new(pool), fast_retry(3));

    let key = StockKey::new(ItemId::new(i64::MAX), WarehouseId::new(warehouse));
    let result = coordinator
        .increase(&single(key, 1), PurchaseOrderId::new(1), ACTOR)
        .await;
    assert!(matches!(result, Err(StockError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn held_lock_exhausts_retries() -> anyhow::Result<()> {
    let Some(pool) = connect().await? else {
        return Ok(());
    };
    let key = new_key(&pool).await?;
    let store = PgStore::new(pool).with_lock_timeout(Duration::from_millis(100));
    let coordinator = StockCoordinator::with_retry(store.clone(), fast_retry(2));
    coordinator
        .increase(&single(key, 3), PurchaseOrderId::new(1), ACTOR)
        .await?;

    let mut holder = store.begin().await?;
    holder.lock_stocks(&[key]).await?;

    let result = coordinator.adjust(key, 7, "count", ACTOR).await;
    assert!(matches!(
        result,
        Err(StockError::RetryExhausted {
            kind: TransientKind::LockNotAvailable,
            ..
        })
    ));

    holder.rollback().await?;
    Ok(())
}

#[tokio::test]
async fn sales_cancel_restores_committed_stock() -> anyhow::Result<()> {
    let Some(pool) = connect().await? else {
        return Ok(());
    };
    let key = new_key(&pool).await?;
    let customer = insert_master(&pool, "partners").await?;
    let store = PgStore::new(pool);
    let coordinator = StockCoordinator::with_retry(store.clone(), fast_retry(3));
    let orders = OrderService::with_retry(store, fast_retry(3).batch);

    coordinator
        .increase(&single(key, 10), PurchaseOrderId::new(1), ACTOR)
        .await?;

    let order = orders
        .create_sales_order(
            PartnerId::new(customer),
            CustomerInfo::new("Lee", "010-1111-2222")?,
            ShippingAddress::new("06236", "12 Teheran-ro", "3F")?,
            ACTOR,
        )
        .await?;
    let id = order.id();
    orders
        .add_sales_line(id, key.item_id, key.warehouse_id, 10, 1_500, ACTOR)
        .await?;
    orders.order_sales(id, ACTOR).await?;
    assert_eq!(coordinator.stock(key).await?.map(|s| s.qty()), Some(0));

    let cancelled = orders.cancel_sales(id, ACTOR).await?;
    assert_eq!(cancelled.order.status(), SalesOrderStatus::Cancelled);
    assert_eq!(cancelled.entries.len(), 1);
    assert_eq!(cancelled.entries[0].ref_type, Some(RefType::SalesOrder));
    assert_eq!(coordinator.stock(key).await?.map(|s| s.qty()), Some(10));

    let reloaded = orders.sales_order(id).await?;
    assert_eq!(reloaded.lines().len(), 1);
    assert_eq!(reloaded.status(), SalesOrderStatus::Cancelled);
    Ok(())
}
