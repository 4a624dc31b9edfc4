//! Postgres-backed stock store.
//!
//! Stock rows are locked with `SELECT ... FOR UPDATE` in `(item_id,
//! warehouse_id)` order, new rows are flushed with an immediate `INSERT`, and
//! every transaction runs with a bounded `lock_timeout` so that a blocked
//! writer fails fast instead of queueing behind a long transaction.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Transient(UniqueViolation)` | Concurrent creation of the same stock row |
//! | Database (deadlock detected) | `40P01` | `Transient(Deadlock)` | Deadlock victim |
//! | Database (serialization failure) | `40001` | `Transient(Deadlock)` | Serialization victim |
//! | Database (lock not available) | `55P03` | `Transient(LockNotAvailable)` | `lock_timeout` expired |
//! | Database (query canceled) | `57014` | `Transient(LockNotAvailable)` | Statement canceled while waiting |
//! | Database (foreign key violation) | `23503` | `MissingReference` | Unknown item, warehouse or partner |
//! | Database (check / not-null violation) | `23514` / `23502` | `Constraint` | e.g. negative quantity |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed | N/A | `Backend` | Connection pool was closed |
//! | RowNotFound | N/A | `NotFound` | Unexpected row not found |
//! | Other | N/A | `Backend` | Network errors, connection failures, etc. |
//!
//! ## Thread Safety
//!
//! `PgStore` is `Send + Sync` and can be shared across tasks. Each `PgTx`
//! owns one pooled connection for its lifetime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use minierp_core::{
    Entity, ItemId, LedgerEntryId, PartnerId, PurchaseOrderId, SalesOrderId, StockId, UserId,
    WarehouseId,
};
use minierp_inventory::{InventoryTransaction, NewLedgerEntry, Stock, StockKey};
use minierp_purchasing::{PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus};
use minierp_sales::{CustomerInfo, SalesOrder, SalesOrderLine, SalesOrderStatus, ShippingAddress};

use super::query::{LedgerFilter, Page, Pagination, StockLevel, StockScope};
use super::r#trait::{OrderTx, StockStore, StockTx, StoreError, TransientKind};

/// Postgres-backed stock store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PgStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

    /// Create a new PgStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// One open database transaction.
///
/// Dropping it without calling [`StockTx::commit`] rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

struct StockRow {
    id: i64,
    item_id: i64,
    warehouse_id: i64,
    qty: i64,
}

impl<'r> FromRow<'r, PgRow> for StockRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            item_id: row.try_get("item_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            qty: row.try_get("qty")?,
        })
    }
}

impl From<StockRow> for Stock {
    fn from(row: StockRow) -> Self {
        Stock::from_persisted(
            StockId::new(row.id),
            StockKey::new(ItemId::new(row.item_id), WarehouseId::new(row.warehouse_id)),
            row.qty,
        )
    }
}

struct LedgerRow {
    id: i64,
    item_id: i64,
    warehouse_id: i64,
    tx_type: String,
    qty_delta: i64,
    ref_type: Option<String>,
    ref_id: Option<i64>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
    created_by: i64,
}

impl<'r> FromRow<'r, PgRow> for LedgerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            item_id: row.try_get("item_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            tx_type: row.try_get("tx_type")?,
            qty_delta: row.try_get("qty_delta")?,
            ref_type: row.try_get("ref_type")?,
            ref_id: row.try_get("ref_id")?,
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
            created_by: row.try_get("created_by")?,
        })
    }
}

impl TryFrom<LedgerRow> for InventoryTransaction {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let kind = row
            .tx_type
            .parse()
            .map_err(|e| StoreError::Backend(format!("ledger entry {}: {e}", row.id)))?;
        let ref_type = row
            .ref_type
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e| StoreError::Backend(format!("ledger entry {}: {e}", row.id)))?;
        Ok(InventoryTransaction {
            id: LedgerEntryId::new(row.id),
            item_id: ItemId::new(row.item_id),
            warehouse_id: WarehouseId::new(row.warehouse_id),
            kind,
            qty_delta: row.qty_delta,
            ref_type,
            ref_id: row.ref_id,
            reason: row.reason,
            created_at: row.created_at,
            created_by: UserId::new(row.created_by),
        })
    }
}

fn decode_rows<T>(rows: Vec<PgRow>) -> Result<Vec<T>, StoreError>
where
    T: for<'r> FromRow<'r, PgRow>,
{
    rows.iter()
        .map(|row| {
            T::from_row(row).map_err(|e| StoreError::Backend(format!("failed to decode row: {e}")))
        })
        .collect()
}

fn ledger_entries_from(rows: Vec<PgRow>) -> Result<Vec<InventoryTransaction>, StoreError> {
    decode_rows::<LedgerRow>(rows)?
        .into_iter()
        .map(InventoryTransaction::try_from)
        .collect()
}

fn line_no(raw: i32) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|_| StoreError::Backend(format!("invalid line number {raw}")))
}

const STOCK_COLUMNS: &str = "id, item_id, warehouse_id, qty";

const LEDGER_SELECT: &str = r#"
    SELECT id, item_id, warehouse_id, tx_type, qty_delta, ref_type, ref_id,
           reason, created_at, created_by
    FROM inventory_transactions
    WHERE ($1::BIGINT IS NULL OR item_id = $1)
      AND ($2::BIGINT IS NULL OR warehouse_id = $2)
      AND ($3::TEXT IS NULL OR tx_type = $3)
      AND ($4::TEXT IS NULL OR ref_type = $4)
      AND ($5::BIGINT IS NULL OR ref_id = $5)
      AND ($6::TIMESTAMPTZ IS NULL OR created_at >= $6)
      AND ($7::TIMESTAMPTZ IS NULL OR created_at < $7)
    ORDER BY created_at DESC, id DESC
    LIMIT $8 OFFSET $9
"#;

const LEDGER_COUNT: &str = r#"
    SELECT COUNT(*) AS total
    FROM inventory_transactions
    WHERE ($1::BIGINT IS NULL OR item_id = $1)
      AND ($2::BIGINT IS NULL OR warehouse_id = $2)
      AND ($3::TEXT IS NULL OR tx_type = $3)
      AND ($4::TEXT IS NULL OR ref_type = $4)
      AND ($5::BIGINT IS NULL OR ref_id = $5)
      AND ($6::TIMESTAMPTZ IS NULL OR created_at >= $6)
      AND ($7::TIMESTAMPTZ IS NULL OR created_at < $7)
"#;

#[async_trait]
impl StockStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // Transaction-local; reset on commit or rollback.
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        Ok(PgTx { tx })
    }

    #[instrument(skip(self, key), fields(key = %key), err)]
    async fn stock(&self, key: StockKey) -> Result<Option<Stock>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stocks WHERE item_id = $1 AND warehouse_id = $2"
        ))
        .bind(key.item_id.get())
        .bind(key.warehouse_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock", e))?;

        row.map(|row| StockRow::from_row(&row).map(Stock::from))
            .transpose()
            .map_err(|e| map_sqlx_error("stock", e))
    }

    #[instrument(skip(self), err)]
    async fn stock_levels(
        &self,
        scope: StockScope,
        pagination: Pagination,
    ) -> Result<Page<StockLevel>, StoreError> {
        let pagination = pagination.capped();
        let (column, id) = match scope {
            StockScope::Item(item_id) => ("item_id", item_id.get()),
            StockScope::Warehouse(warehouse_id) => ("warehouse_id", warehouse_id.get()),
        };

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM stocks WHERE {column} = $1"
        ))
        .bind(id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_levels", e))?
        .try_get("total")
        .map_err(|e| map_sqlx_error("stock_levels", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stocks WHERE {column} = $1 \
             ORDER BY item_id, warehouse_id LIMIT $2 OFFSET $3"
        ))
        .bind(id)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_levels", e))?;

        let items = decode_rows::<StockRow>(rows)?
            .into_iter()
            .map(|row| StockLevel::from(&Stock::from(row)))
            .collect();
        Ok(Page::new(items, total.max(0) as u64, pagination))
    }

    async fn ledger_entry(
        &self,
        id: LedgerEntryId,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, item_id, warehouse_id, tx_type, qty_delta, ref_type, ref_id,
                   reason, created_at, created_by
            FROM inventory_transactions
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ledger_entry", e))?;

        Ok(ledger_entries_from(row.into_iter().collect())?.pop())
    }

    #[instrument(skip(self), err)]
    async fn ledger_entries(
        &self,
        filter: &LedgerFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryTransaction>, StoreError> {
        let pagination = pagination.capped();
        let item_id = filter.item_id.map(ItemId::get);
        let warehouse_id = filter.warehouse_id.map(WarehouseId::get);
        let kind = filter.kind.map(|k| k.as_str());
        let ref_type = filter.ref_type.map(|t| t.as_str());

        let total: i64 = sqlx::query(LEDGER_COUNT)
            .bind(item_id)
            .bind(warehouse_id)
            .bind(kind)
            .bind(ref_type)
            .bind(filter.ref_id)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ledger_entries", e))?
            .try_get("total")
            .map_err(|e| map_sqlx_error("ledger_entries", e))?;

        let rows = sqlx::query(LEDGER_SELECT)
            .bind(item_id)
            .bind(warehouse_id)
            .bind(kind)
            .bind(ref_type)
            .bind(filter.ref_id)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ledger_entries", e))?;

        Ok(Page::new(
            ledger_entries_from(rows)?,
            total.max(0) as u64,
            pagination,
        ))
    }

    async fn purchase_order(
        &self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("purchase_order", e))?;
        fetch_purchase_order(&mut *conn, id, false).await
    }

    async fn sales_order(&self, id: SalesOrderId) -> Result<Option<SalesOrder>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("sales_order", e))?;
        fetch_sales_order(&mut *conn, id, false).await
    }
}

#[async_trait]
impl StockTx for PgTx {
    #[instrument(skip(self, keys), fields(key_count = keys.len()), err)]
    async fn lock_stocks(&mut self, keys: &[StockKey]) -> Result<Vec<Stock>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let item_ids: Vec<i64> = keys.iter().map(|k| k.item_id.get()).collect();
        let warehouse_ids: Vec<i64> = keys.iter().map(|k| k.warehouse_id.get()).collect();

        // FOR UPDATE takes row locks in the ORDER BY sequence.
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.item_id, s.warehouse_id, s.qty
            FROM stocks s
            JOIN UNNEST($1::BIGINT[], $2::BIGINT[]) AS k(item_id, warehouse_id)
              ON s.item_id = k.item_id AND s.warehouse_id = k.warehouse_id
            ORDER BY s.item_id, s.warehouse_id
            FOR UPDATE OF s
            "#,
        )
        .bind(item_ids)
        .bind(warehouse_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stocks", e))?;

        Ok(decode_rows::<StockRow>(rows)?
            .into_iter()
            .map(Stock::from)
            .collect())
    }

    #[instrument(skip(self, keys), fields(key_count = keys.len()), err)]
    async fn insert_stocks(
        &mut self,
        keys: &[StockKey],
        actor: UserId,
    ) -> Result<Vec<Stock>, StoreError> {
        let mut created = Vec::with_capacity(keys.len());
        for key in keys {
            let id: i64 = sqlx::query(
                r#"
                INSERT INTO stocks (item_id, warehouse_id, qty, created_by, updated_by)
                VALUES ($1, $2, 0, $3, $3)
                RETURNING id
                "#,
            )
            .bind(key.item_id.get())
            .bind(key.warehouse_id.get())
            .bind(actor.get())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_stocks", e))?
            .try_get("id")
            .map_err(|e| map_sqlx_error("insert_stocks", e))?;

            created.push(Stock::from_persisted(StockId::new(id), *key, 0));
        }
        Ok(created)
    }

    async fn save_stocks(
        &mut self,
        stocks: &mut [Stock],
        actor: UserId,
    ) -> Result<usize, StoreError> {
        let mut written = 0;
        for stock in stocks.iter_mut().filter(|s| s.is_dirty()) {
            let result = sqlx::query(
                r#"
                UPDATE stocks
                SET qty = $1, updated_at = now(), updated_by = $2
                WHERE id = $3
                "#,
            )
            .bind(stock.qty())
            .bind(actor.get())
            .bind(stock.id().get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_stocks", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("stock {}", stock.key())));
            }
            stock.mark_persisted();
            written += 1;
        }
        Ok(written)
    }

    #[instrument(skip(self, entries), fields(entry_count = entries.len()), err)]
    async fn append_ledger(
        &mut self,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let mut appended = Vec::with_capacity(entries.len());
        for entry in entries {
            let reference = entry.reference();
            let row = sqlx::query(
                r#"
                INSERT INTO inventory_transactions
                    (item_id, warehouse_id, tx_type, qty_delta, ref_type, ref_id, reason, created_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id, created_at
                "#,
            )
            .bind(entry.key().item_id.get())
            .bind(entry.key().warehouse_id.get())
            .bind(entry.kind().as_str())
            .bind(entry.qty_delta())
            .bind(reference.map(|r| r.ref_type.as_str()))
            .bind(reference.map(|r| r.ref_id))
            .bind(entry.reason())
            .bind(entry.created_by().get())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("append_ledger", e))?;

            let id: i64 = row
                .try_get("id")
                .map_err(|e| map_sqlx_error("append_ledger", e))?;
            let created_at: DateTime<Utc> = row
                .try_get("created_at")
                .map_err(|e| map_sqlx_error("append_ledger", e))?;
            appended.push(entry.into_transaction(LedgerEntryId::new(id), created_at));
        }
        Ok(appended)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

async fn fetch_purchase_order(
    conn: &mut PgConnection,
    id: PurchaseOrderId,
    for_update: bool,
) -> Result<Option<PurchaseOrder>, StoreError> {
    let sql = if for_update {
        "SELECT id, supplier_id, status, created_by, created_at FROM purchase_orders WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, supplier_id, status, created_by, created_at FROM purchase_orders WHERE id = $1"
    };
    let Some(row) = sqlx::query(sql)
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_purchase_order", e))?
    else {
        return Ok(None);
    };

    let decode = |e| map_sqlx_error("fetch_purchase_order", e);
    let supplier_id: i64 = row.try_get("supplier_id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let created_by: i64 = row.try_get("created_by").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let status: PurchaseOrderStatus = status
        .parse()
        .map_err(|e| StoreError::Backend(format!("purchase order {id}: {e}")))?;

    let line_rows = sqlx::query(
        r#"
        SELECT line_no, item_id, warehouse_id, qty, unit_cost
        FROM purchase_order_lines
        WHERE purchase_order_id = $1
        ORDER BY line_no
        "#,
    )
    .bind(id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_purchase_order", e))?;

    let mut lines = Vec::with_capacity(line_rows.len());
    for row in &line_rows {
        lines.push(PurchaseOrderLine {
            line_no: line_no(row.try_get("line_no").map_err(decode)?)?,
            item_id: ItemId::new(row.try_get("item_id").map_err(decode)?),
            warehouse_id: WarehouseId::new(row.try_get("warehouse_id").map_err(decode)?),
            qty: row.try_get("qty").map_err(decode)?,
            unit_cost: row.try_get("unit_cost").map_err(decode)?,
        });
    }

    Ok(Some(PurchaseOrder::rehydrate(
        id,
        PartnerId::new(supplier_id),
        status,
        lines,
        UserId::new(created_by),
        created_at,
    )))
}

async fn fetch_sales_order(
    conn: &mut PgConnection,
    id: SalesOrderId,
    for_update: bool,
) -> Result<Option<SalesOrder>, StoreError> {
    let columns = "id, customer_id, customer_name, customer_phone, zipcode, address1, address2, \
                   status, created_by, created_at";
    let sql = if for_update {
        format!("SELECT {columns} FROM sales_orders WHERE id = $1 FOR UPDATE")
    } else {
        format!("SELECT {columns} FROM sales_orders WHERE id = $1")
    };
    let Some(row) = sqlx::query(&sql)
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_sales_order", e))?
    else {
        return Ok(None);
    };

    let decode = |e| map_sqlx_error("fetch_sales_order", e);
    let customer_id: i64 = row.try_get("customer_id").map_err(decode)?;
    let customer_info = CustomerInfo {
        name: row.try_get("customer_name").map_err(decode)?,
        phone: row.try_get("customer_phone").map_err(decode)?,
    };
    let shipping_address = ShippingAddress {
        zipcode: row.try_get("zipcode").map_err(decode)?,
        address1: row.try_get("address1").map_err(decode)?,
        address2: row.try_get("address2").map_err(decode)?,
    };
    let status: String = row.try_get("status").map_err(decode)?;
    let status: SalesOrderStatus = status
        .parse()
        .map_err(|e| StoreError::Backend(format!("sales order {id}: {e}")))?;
    let created_by: i64 = row.try_get("created_by").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;

    let line_rows = sqlx::query(
        r#"
        SELECT line_no, item_id, warehouse_id, qty, unit_price
        FROM sales_order_lines
        WHERE sales_order_id = $1
        ORDER BY line_no
        "#,
    )
    .bind(id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_sales_order", e))?;

    let mut lines = Vec::with_capacity(line_rows.len());
    for row in &line_rows {
        lines.push(SalesOrderLine {
            line_no: line_no(row.try_get("line_no").map_err(decode)?)?,
            item_id: ItemId::new(row.try_get("item_id").map_err(decode)?),
            warehouse_id: WarehouseId::new(row.try_get("warehouse_id").map_err(decode)?),
            qty: row.try_get("qty").map_err(decode)?,
            unit_price: row.try_get("unit_price").map_err(decode)?,
        });
    }

    Ok(Some(SalesOrder::rehydrate(
        id,
        PartnerId::new(customer_id),
        customer_info,
        shipping_address,
        status,
        lines,
        UserId::new(created_by),
        created_at,
    )))
}

#[async_trait]
impl OrderTx for PgTx {
    async fn insert_purchase_order(
        &mut self,
        supplier_id: PartnerId,
        actor: UserId,
    ) -> Result<PurchaseOrder, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO purchase_orders (supplier_id, status, created_by, updated_by)
            VALUES ($1, 'CREATED', $2, $2)
            RETURNING id, created_at
            "#,
        )
        .bind(supplier_id.get())
        .bind(actor.get())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_purchase_order", e))?;

        let decode = |e| map_sqlx_error("insert_purchase_order", e);
        let id: i64 = row.try_get("id").map_err(decode)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
        Ok(PurchaseOrder::new(
            PurchaseOrderId::new(id),
            supplier_id,
            actor,
            created_at,
        ))
    }

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        fetch_purchase_order(&mut *self.tx, id, true).await
    }

    #[instrument(skip(self, order), fields(order_id = %order.id().get()), err)]
    async fn save_purchase_order(
        &mut self,
        order: &PurchaseOrder,
        actor: UserId,
    ) -> Result<(), StoreError> {
        let order_id = order.id().get();
        let result = sqlx::query(
            "UPDATE purchase_orders SET status = $1, updated_at = now(), updated_by = $2 WHERE id = $3",
        )
        .bind(order.status().as_str())
        .bind(actor.get())
        .bind(order_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_purchase_order", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("purchase order {order_id}")));
        }

        sqlx::query("DELETE FROM purchase_order_lines WHERE purchase_order_id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_purchase_order", e))?;

        for line in order.lines() {
            sqlx::query(
                r#"
                INSERT INTO purchase_order_lines
                    (purchase_order_id, line_no, item_id, warehouse_id, qty, unit_cost)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order_id)
            .bind(line.line_no as i32)
            .bind(line.item_id.get())
            .bind(line.warehouse_id.get())
            .bind(line.qty)
            .bind(line.unit_cost)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_purchase_order", e))?;
        }
        Ok(())
    }

    async fn insert_sales_order(
        &mut self,
        customer_id: PartnerId,
        customer_info: CustomerInfo,
        shipping_address: ShippingAddress,
        actor: UserId,
    ) -> Result<SalesOrder, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO sales_orders
                (customer_id, customer_name, customer_phone, zipcode, address1, address2,
                 status, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, 'CREATED', $7, $7)
            RETURNING id, created_at
            "#,
        )
        .bind(customer_id.get())
        .bind(&customer_info.name)
        .bind(&customer_info.phone)
        .bind(&shipping_address.zipcode)
        .bind(&shipping_address.address1)
        .bind(&shipping_address.address2)
        .bind(actor.get())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_sales_order", e))?;

        let decode = |e| map_sqlx_error("insert_sales_order", e);
        let id: i64 = row.try_get("id").map_err(decode)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
        Ok(SalesOrder::new(
            SalesOrderId::new(id),
            customer_id,
            customer_info,
            shipping_address,
            actor,
            created_at,
        ))
    }

    async fn lock_sales_order(
        &mut self,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        fetch_sales_order(&mut *self.tx, id, true).await
    }

    #[instrument(skip(self, order), fields(order_id = %order.id().get()), err)]
    async fn save_sales_order(
        &mut self,
        order: &SalesOrder,
        actor: UserId,
    ) -> Result<(), StoreError> {
        let order_id = order.id().get();
        let result = sqlx::query(
            "UPDATE sales_orders SET status = $1, updated_at = now(), updated_by = $2 WHERE id = $3",
        )
        .bind(order.status().as_str())
        .bind(actor.get())
        .bind(order_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_sales_order", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("sales order {order_id}")));
        }

        sqlx::query("DELETE FROM sales_order_lines WHERE sales_order_id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_sales_order", e))?;

        for line in order.lines() {
            sqlx::query(
                r#"
                INSERT INTO sales_order_lines
                    (sales_order_id, line_no, item_id, warehouse_id, qty, unit_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order_id)
            .bind(line.line_no as i32)
            .bind(line.item_id.get())
            .bind(line.warehouse_id.get())
            .bind(line.qty)
            .bind(line.unit_price)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_sales_order", e))?;
        }
        Ok(())
    }
}

/// Map SQLx errors to `StoreError` (see the module docs for the table).
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::transient(TransientKind::UniqueViolation, msg),
                Some("40P01" | "40001") => StoreError::transient(TransientKind::Deadlock, msg),
                Some("55P03" | "57014") => {
                    StoreError::transient(TransientKind::LockNotAvailable, msg)
                }
                Some("23503") => StoreError::MissingReference(msg),
                Some("23514" | "23502") => StoreError::Constraint(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
