use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use minierp_core::{
    Entity, ItemId, LedgerEntryId, PartnerId, PurchaseOrderId, SalesOrderId, StockId, UserId,
    WarehouseId,
};
use minierp_inventory::{InventoryTransaction, NewLedgerEntry, Stock, StockKey};
use minierp_purchasing::PurchaseOrder;
use minierp_sales::{CustomerInfo, SalesOrder, ShippingAddress};

use super::query::{LedgerFilter, Page, Pagination, StockLevel, StockScope};
use super::r#trait::{OrderTx, StockStore, StockTx, StoreError, TransientKind};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum RowId {
    Stock(StockKey),
    PurchaseOrder(PurchaseOrderId),
    SalesOrder(SalesOrderId),
}

impl core::fmt::Display for RowId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RowId::Stock(key) => write!(f, "stock {key}"),
            RowId::PurchaseOrder(id) => write!(f, "purchase order {id}"),
            RowId::SalesOrder(id) => write!(f, "sales order {id}"),
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct StockRow {
    id: StockId,
    qty: i64,
}

#[derive(Debug, Default)]
struct Sequences {
    stock: i64,
    ledger: i64,
    purchase_order: i64,
    sales_order: i64,
}

fn next(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

/// Committed data.
#[derive(Debug, Default)]
struct State {
    stocks: BTreeMap<StockKey, StockRow>,
    ledger: Vec<InventoryTransaction>,
    purchase_orders: BTreeMap<PurchaseOrderId, PurchaseOrder>,
    sales_orders: BTreeMap<SalesOrderId, SalesOrder>,
    /// Registered master data; `None` disables the reference check.
    items: Option<BTreeSet<ItemId>>,
    warehouses: Option<BTreeSet<WarehouseId>>,
    sequences: Sequences,
    injected_failures: Option<(TransientKind, u32)>,
}

#[derive(Debug)]
struct Shared {
    state: RwLock<State>,
    row_locks: Mutex<HashMap<RowId, Arc<RowMutex<()>>>>,
    lock_timeout: Duration,
}

impl Shared {
    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn row_lock(&self, row: RowId) -> Result<Arc<RowMutex<()>>, StoreError> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(locks.entry(row).or_default().clone())
    }

    /// Forget row mutexes that no transaction holds or waits on. Clones are
    /// only handed out under the map lock, so a count of one is final.
    fn prune_row_locks(&self) {
        if let Ok(mut locks) = self.row_locks.lock() {
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        }
    }

    fn check_reference(&self, key: &StockKey) -> Result<(), StoreError> {
        let state = self.read()?;
        if let Some(items) = &state.items {
            if !items.contains(&key.item_id) {
                return Err(StoreError::MissingReference(format!(
                    "item {} does not exist",
                    key.item_id
                )));
            }
        }
        if let Some(warehouses) = &state.warehouses {
            if !warehouses.contains(&key.warehouse_id) {
                return Err(StoreError::MissingReference(format!(
                    "warehouse {} does not exist",
                    key.warehouse_id
                )));
            }
        }
        Ok(())
    }
}

/// In-memory stock store.
///
/// Intended for tests/dev. Emulates the parts of a relational database the
/// coordinator depends on:
/// - row locks are per-row async mutexes owned by the transaction, so
///   waiting for a lock suspends the task rather than a thread
/// - lock waits are bounded by a lock timeout and fail as
///   `LockNotAvailable`
/// - inserting a row that another transaction inserted (committed, or
///   in flight and then committed) fails as `UniqueViolation`
/// - writes are staged in the transaction and published on commit;
///   dropping the transaction discards them
///
/// Deadlocks are not detected; a lock cycle resolves through the lock
/// timeout.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new() -> Self {
        Self::with_lock_timeout(Self::DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(State::default()),
                row_locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    /// Register known items. Once any item is registered, stock rows and
    /// ledger entries for unregistered items are rejected as missing
    /// references.
    pub fn register_items(&self, items: impl IntoIterator<Item = ItemId>) -> Result<(), StoreError> {
        let mut state = self.shared.write()?;
        state.items.get_or_insert_with(BTreeSet::new).extend(items);
        Ok(())
    }

    /// Register known warehouses; see [`Self::register_items`].
    pub fn register_warehouses(
        &self,
        warehouses: impl IntoIterator<Item = WarehouseId>,
    ) -> Result<(), StoreError> {
        let mut state = self.shared.write()?;
        state
            .warehouses
            .get_or_insert_with(BTreeSet::new)
            .extend(warehouses);
        Ok(())
    }

    #[cfg(test)]
    fn row_lock_count(&self) -> usize {
        self.shared.row_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    /// Make the next `count` stock lock requests fail with `kind`.
    pub fn inject_transient_failures(
        &self,
        kind: TransientKind,
        count: u32,
    ) -> Result<(), StoreError> {
        let mut state = self.shared.write()?;
        state.injected_failures = (count > 0).then_some((kind, count));
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StockStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        Ok(InMemoryTx {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            stocks: BTreeMap::new(),
            ledger: Vec::new(),
            purchase_orders: BTreeMap::new(),
            sales_orders: BTreeMap::new(),
        })
    }

    async fn stock(&self, key: StockKey) -> Result<Option<Stock>, StoreError> {
        let state = self.shared.read()?;
        Ok(state
            .stocks
            .get(&key)
            .map(|row| Stock::from_persisted(row.id, key, row.qty)))
    }

    async fn stock_levels(
        &self,
        scope: StockScope,
        pagination: Pagination,
    ) -> Result<Page<StockLevel>, StoreError> {
        let state = self.shared.read()?;
        let levels: Vec<StockLevel> = state
            .stocks
            .iter()
            .filter(|(key, _)| match scope {
                StockScope::Item(item_id) => key.item_id == item_id,
                StockScope::Warehouse(warehouse_id) => key.warehouse_id == warehouse_id,
            })
            .map(|(key, row)| StockLevel {
                item_id: key.item_id,
                warehouse_id: key.warehouse_id,
                qty: row.qty,
            })
            .collect();
        Ok(pagination.page_of(levels))
    }

    async fn ledger_entry(
        &self,
        id: LedgerEntryId,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        let state = self.shared.read()?;
        Ok(state.ledger.iter().find(|entry| entry.id == id).cloned())
    }

    async fn ledger_entries(
        &self,
        filter: &LedgerFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryTransaction>, StoreError> {
        let mut entries: Vec<InventoryTransaction> = {
            let state = self.shared.read()?;
            state
                .ledger
                .iter()
                .filter(|entry| filter.matches(entry))
                .cloned()
                .collect()
        };
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(pagination.page_of(entries))
    }

    async fn purchase_order(
        &self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        Ok(self.shared.read()?.purchase_orders.get(&id).cloned())
    }

    async fn sales_order(&self, id: SalesOrderId) -> Result<Option<SalesOrder>, StoreError> {
        Ok(self.shared.read()?.sales_orders.get(&id).cloned())
    }
}

/// Transaction over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryTx {
    shared: Arc<Shared>,
    held: HashMap<RowId, OwnedMutexGuard<()>>,
    stocks: BTreeMap<StockKey, StockRow>,
    ledger: Vec<InventoryTransaction>,
    purchase_orders: BTreeMap<PurchaseOrderId, PurchaseOrder>,
    sales_orders: BTreeMap<SalesOrderId, SalesOrder>,
}

impl InMemoryTx {
    async fn lock_row(&mut self, row: RowId) -> Result<(), StoreError> {
        if self.held.contains_key(&row) {
            return Ok(());
        }
        let mutex = self.shared.row_lock(row)?;
        let timeout = self.shared.lock_timeout;
        let guard = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                StoreError::transient(
                    TransientKind::LockNotAvailable,
                    format!("could not obtain lock on {row} within {timeout:?}"),
                )
            })?;
        self.held.insert(row, guard);
        Ok(())
    }

    fn ensure_locked(&self, row: RowId) -> Result<(), StoreError> {
        if !self.held.contains_key(&row) {
            return Err(StoreError::Backend(format!(
                "{row} is not locked by this transaction"
            )));
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> Result<(), StoreError> {
        let mut state = self.shared.write()?;
        let injected = state.injected_failures;
        match injected {
            Some((kind, remaining)) => {
                state.injected_failures = (remaining > 1).then_some((kind, remaining - 1));
                Err(StoreError::transient(kind, "injected failure"))
            }
            None => Ok(()),
        }
    }

    fn next_id(&self, pick: impl FnOnce(&mut Sequences) -> &mut i64) -> Result<i64, StoreError> {
        let mut state = self.shared.write()?;
        Ok(next(pick(&mut state.sequences)))
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        self.held.clear();
        self.shared.prune_row_locks();
    }
}

fn unique_violation(key: &StockKey) -> StoreError {
    StoreError::transient(
        TransientKind::UniqueViolation,
        format!("duplicate stock row for {key}"),
    )
}

#[async_trait]
impl StockTx for InMemoryTx {
    async fn lock_stocks(&mut self, keys: &[StockKey]) -> Result<Vec<Stock>, StoreError> {
        self.take_injected_failure()?;

        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = self.stocks.get(key) {
                rows.push(Stock::from_persisted(row.id, *key, row.qty));
                continue;
            }
            let exists = self.shared.read()?.stocks.contains_key(key);
            if !exists {
                continue;
            }
            self.lock_row(RowId::Stock(*key)).await?;
            let row = self.shared.read()?.stocks.get(key).copied();
            if let Some(row) = row {
                rows.push(Stock::from_persisted(row.id, *key, row.qty));
            }
        }
        Ok(rows)
    }

    async fn insert_stocks(
        &mut self,
        keys: &[StockKey],
        _actor: UserId,
    ) -> Result<Vec<Stock>, StoreError> {
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            self.shared.check_reference(key)?;

            let committed = self.shared.read()?.stocks.contains_key(key);
            if committed || self.stocks.contains_key(key) {
                return Err(unique_violation(key));
            }

            // Blocks while another transaction holds an uncommitted insert.
            self.lock_row(RowId::Stock(*key)).await?;
            let committed = self.shared.read()?.stocks.contains_key(key);
            if committed {
                return Err(unique_violation(key));
            }

            let id = StockId::new(self.next_id(|seq| &mut seq.stock)?);
            self.stocks.insert(*key, StockRow { id, qty: 0 });
            rows.push(Stock::from_persisted(id, *key, 0));
        }
        Ok(rows)
    }

    async fn save_stocks(
        &mut self,
        stocks: &mut [Stock],
        _actor: UserId,
    ) -> Result<usize, StoreError> {
        let mut written = 0;
        for stock in stocks.iter_mut().filter(|stock| stock.is_dirty()) {
            let key = stock.key();
            self.ensure_locked(RowId::Stock(key))?;
            if stock.qty() < 0 {
                return Err(StoreError::Constraint(format!(
                    "stock quantity for {key} cannot be negative"
                )));
            }
            self.stocks.insert(
                key,
                StockRow {
                    id: stock.id(),
                    qty: stock.qty(),
                },
            );
            stock.mark_persisted();
            written += 1;
        }
        Ok(written)
    }

    async fn append_ledger(
        &mut self,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        for entry in &entries {
            self.shared.check_reference(&entry.key())?;
        }

        let now = Utc::now();
        let appended: Vec<InventoryTransaction> = {
            let mut state = self.shared.write()?;
            entries
                .into_iter()
                .map(|entry| {
                    let id = LedgerEntryId::new(next(&mut state.sequences.ledger));
                    entry.into_transaction(id, now)
                })
                .collect()
        };
        self.ledger.extend(appended.iter().cloned());
        Ok(appended)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        {
            let mut state = self.shared.write()?;
            state.stocks.extend(std::mem::take(&mut self.stocks));
            state.ledger.extend(std::mem::take(&mut self.ledger));
            state
                .purchase_orders
                .extend(std::mem::take(&mut self.purchase_orders));
            state
                .sales_orders
                .extend(std::mem::take(&mut self.sales_orders));
        }

        // Row locks are released on drop, only once the writes are visible.
        drop(self);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}

#[async_trait]
impl OrderTx for InMemoryTx {
    async fn insert_purchase_order(
        &mut self,
        supplier_id: PartnerId,
        actor: UserId,
    ) -> Result<PurchaseOrder, StoreError> {
        let id = PurchaseOrderId::new(self.next_id(|seq| &mut seq.purchase_order)?);
        self.lock_row(RowId::PurchaseOrder(id)).await?;
        let order = PurchaseOrder::new(id, supplier_id, actor, Utc::now());
        self.purchase_orders.insert(id, order.clone());
        Ok(order)
    }

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        if let Some(order) = self.purchase_orders.get(&id) {
            return Ok(Some(order.clone()));
        }
        let exists = self.shared.read()?.purchase_orders.contains_key(&id);
        if !exists {
            return Ok(None);
        }
        self.lock_row(RowId::PurchaseOrder(id)).await?;
        let order = self.shared.read()?.purchase_orders.get(&id).cloned();
        Ok(order)
    }

    async fn save_purchase_order(
        &mut self,
        order: &PurchaseOrder,
        _actor: UserId,
    ) -> Result<(), StoreError> {
        self.ensure_locked(RowId::PurchaseOrder(order.id()))?;
        self.purchase_orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn insert_sales_order(
        &mut self,
        customer_id: PartnerId,
        customer_info: CustomerInfo,
        shipping_address: ShippingAddress,
        actor: UserId,
    ) -> Result<SalesOrder, StoreError> {
        let id = SalesOrderId::new(self.next_id(|seq| &mut seq.sales_order)?);
        self.lock_row(RowId::SalesOrder(id)).await?;
        let order = SalesOrder::new(
            id,
            customer_id,
            customer_info,
            shipping_address,
            actor,
            Utc::now(),
        );
        self.sales_orders.insert(id, order.clone());
        Ok(order)
    }

    async fn lock_sales_order(
        &mut self,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        if let Some(order) = self.sales_orders.get(&id) {
            return Ok(Some(order.clone()));
        }
        let exists = self.shared.read()?.sales_orders.contains_key(&id);
        if !exists {
            return Ok(None);
        }
        self.lock_row(RowId::SalesOrder(id)).await?;
        let order = self.shared.read()?.sales_orders.get(&id).cloned();
        Ok(order)
    }

    async fn save_sales_order(
        &mut self,
        order: &SalesOrder,
        _actor: UserId,
    ) -> Result<(), StoreError> {
        self.ensure_locked(RowId::SalesOrder(order.id()))?;
        self.sales_orders.insert(order.id(), order.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(item: i64, warehouse: i64) -> StockKey {
        StockKey::new(ItemId::new(item), WarehouseId::new(warehouse))
    }

    fn actor() -> UserId {
        UserId::new(1)
    }

    #[tokio::test]
    async fn uncommitted_inserts_are_invisible_to_readers() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_stocks(&[key(1, 1)], actor()).await.unwrap();

        assert!(store.stock(key(1, 1)).await.unwrap().is_none());
        tx.commit().await.unwrap();
        assert_eq!(store.stock(key(1, 1)).await.unwrap().unwrap().qty(), 0);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_stocks(&[key(1, 1)], actor()).await.unwrap();
        }
        assert!(store.stock(key(1, 1)).await.unwrap().is_none());

        // The row lock was released with the transaction.
        let mut tx = store.begin().await.unwrap();
        tx.insert_stocks(&[key(1, 1)], actor()).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn inserting_a_committed_key_is_a_unique_violation() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_stocks(&[key(1, 1)], actor()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        match tx.insert_stocks(&[key(1, 1)], actor()).await.unwrap_err() {
            StoreError::Transient {
                kind: TransientKind::UniqueViolation,
                ..
            } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_insert_waits_then_fails_on_commit() {
        let store = InMemoryStore::new();
        let mut first = store.begin().await.unwrap();
        first.insert_stocks(&[key(1, 1)], actor()).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.insert_stocks(&[key(1, 1)], actor()).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.commit().await.unwrap();

        let err = contender.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transient {
                kind: TransientKind::UniqueViolation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn lock_wait_times_out_as_lock_not_available() {
        let store = InMemoryStore::with_lock_timeout(Duration::from_millis(20));
        let mut seed = store.begin().await.unwrap();
        seed.insert_stocks(&[key(1, 1)], actor()).await.unwrap();
        seed.commit().await.unwrap();

        let mut holder = store.begin().await.unwrap();
        assert_eq!(holder.lock_stocks(&[key(1, 1)]).await.unwrap().len(), 1);

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_stocks(&[key(1, 1)]).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transient {
                kind: TransientKind::LockNotAvailable,
                ..
            }
        ));

        holder.rollback().await.unwrap();
        assert_eq!(waiter.lock_stocks(&[key(1, 1)]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn row_locks_are_forgotten_once_released() {
        let store = InMemoryStore::new();
        for item in 1..=20 {
            let mut tx = store.begin().await.unwrap();
            tx.insert_stocks(&[key(item, 1)], actor()).await.unwrap();
            tx.commit().await.unwrap();
        }
        assert_eq!(store.row_lock_count(), 0);

        let mut holder = store.begin().await.unwrap();
        holder.lock_stocks(&[key(1, 1), key(2, 1)]).await.unwrap();
        assert_eq!(store.row_lock_count(), 2);

        let mut other = store.begin().await.unwrap();
        other.lock_stocks(&[key(3, 1)]).await.unwrap();
        other.rollback().await.unwrap();
        assert_eq!(store.row_lock_count(), 2);

        drop(holder);
        assert_eq!(store.row_lock_count(), 0);
    }

    #[tokio::test]
    async fn unregistered_item_is_a_missing_reference() {
        let store = InMemoryStore::new();
        store.register_items([ItemId::new(1)]).unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_stocks(&[key(2, 1)], actor()).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingReference(msg) if msg.contains("item 2")));
    }

    #[tokio::test]
    async fn saving_requires_row_lock() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut stray = vec![Stock::from_persisted(StockId::new(9), key(5, 5), 0)];
        stray[0].increase(1).unwrap();
        assert!(matches!(
            tx.save_stocks(&mut stray, actor()).await,
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn stock_levels_are_scoped_and_ordered() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_stocks(&[key(1, 1), key(1, 2), key(2, 1)], actor())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let by_item = store
            .stock_levels(StockScope::Item(ItemId::new(1)), Pagination::default())
            .await
            .unwrap();
        assert_eq!(by_item.total, 2);
        assert_eq!(by_item.items[0].warehouse_id, WarehouseId::new(1));
        assert_eq!(by_item.items[1].warehouse_id, WarehouseId::new(2));

        let by_warehouse = store
            .stock_levels(StockScope::Warehouse(WarehouseId::new(1)), Pagination::default())
            .await
            .unwrap();
        assert_eq!(by_warehouse.total, 2);
    }
}
