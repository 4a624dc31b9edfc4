use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use minierp_core::{
    ItemId, LedgerEntryId, PartnerId, PurchaseOrderId, SalesOrderId, UserId, WarehouseId,
};
use minierp_infra::{
    LedgerFilter, OrderService, Pagination, PgStore, RetryPolicies, Settings, StockCoordinator,
    db,
};
use minierp_inventory::{RefType, StockKey, TransactionType};
use minierp_sales::{CustomerInfo, ShippingAddress};

#[derive(Parser)]
#[command(name = "minierp")]
#[command(about = "Stock ledger and order operations", long_about = None)]
struct Cli {
    /// Configuration file (extension inferred; missing file ignored)
    #[arg(long, global = true, default_value = minierp_infra::config::DEFAULT_CONFIG_FILE)]
    config: String,

    /// User id recorded as created_by / updated_by
    #[arg(long, global = true, default_value_t = 1)]
    actor: i64,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply embedded SQL migrations
    Migrate,

    /// Record a physical count for one (item, warehouse)
    Adjust {
        #[arg(long)]
        item: i64,
        #[arg(long)]
        warehouse: i64,
        /// Counted quantity
        #[arg(long)]
        actual: i64,
        #[arg(long)]
        reason: String,
    },

    /// Current stock levels (unlocked read)
    Levels {
        #[command(subcommand)]
        cmd: LevelsCmd,
    },

    /// Movement ledger history
    Ledger {
        #[command(subcommand)]
        cmd: LedgerCmd,
    },

    /// Purchase order commands
    Purchase {
        #[command(subcommand)]
        cmd: PurchaseCmd,
    },

    /// Sales order commands
    Sales {
        #[command(subcommand)]
        cmd: SalesCmd,
    },
}

#[derive(Args)]
struct Page {
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    offset: Option<u32>,
}

impl Page {
    fn pagination(&self) -> Pagination {
        Pagination::new(self.limit, self.offset)
    }
}

#[derive(Subcommand)]
enum LevelsCmd {
    /// Levels of one item across warehouses
    Item {
        id: i64,
        #[command(flatten)]
        page: Page,
    },
    /// Levels of every item in one warehouse
    Warehouse {
        id: i64,
        #[command(flatten)]
        page: Page,
    },
}

#[derive(Subcommand)]
enum LedgerCmd {
    /// Entries matching the filters, newest first
    List {
        #[arg(long)]
        item: Option<i64>,
        #[arg(long)]
        warehouse: Option<i64>,
        /// INBOUND | OUTBOUND | ADJUST
        #[arg(long = "type")]
        kind: Option<TransactionType>,
        /// PURCHASE_ORDER | SALES_ORDER
        #[arg(long)]
        ref_type: Option<RefType>,
        #[arg(long)]
        ref_id: Option<i64>,
        #[command(flatten)]
        page: Page,
    },
    /// One entry by id
    Show { id: i64 },
}

#[derive(Subcommand)]
enum PurchaseCmd {
    /// Create an empty purchase order
    Create {
        #[arg(long)]
        supplier: i64,
    },
    /// Add a line to a CREATED purchase order
    AddLine {
        id: i64,
        #[arg(long)]
        item: i64,
        #[arg(long)]
        warehouse: i64,
        #[arg(long)]
        qty: i64,
        #[arg(long, default_value_t = 0)]
        unit_cost: i64,
    },
    /// CREATED -> ORDERED
    Order { id: i64 },
    /// ORDERED -> RECEIVED, moving every line into stock
    Receive { id: i64 },
    /// CREATED | ORDERED -> CANCELLED
    Cancel { id: i64 },
    Show { id: i64 },
}

#[derive(Subcommand)]
enum SalesCmd {
    /// Create an empty sales order
    Create {
        #[arg(long)]
        customer: i64,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long)]
        zipcode: String,
        #[arg(long)]
        address1: String,
        #[arg(long, default_value = "")]
        address2: String,
    },
    /// Add a line to a CREATED sales order
    AddLine {
        id: i64,
        #[arg(long)]
        item: i64,
        #[arg(long)]
        warehouse: i64,
        #[arg(long)]
        qty: i64,
        #[arg(long, default_value_t = 0)]
        unit_price: i64,
    },
    /// CREATED -> ORDERED, taking every line out of stock
    Order { id: i64 },
    /// ORDERED -> SHIPPED
    Ship { id: i64 },
    /// CREATED | ORDERED -> CANCELLED, restoring stock if ordered
    Cancel { id: i64 },
    Show { id: i64 },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn stock_key(item: i64, warehouse: i64) -> Result<StockKey> {
    Ok(StockKey::new(ItemId::parse(item)?, WarehouseId::parse(warehouse)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = Settings::load_from(Some(cli.config.as_str()))
        .context("failed to load configuration")?;
    minierp_observability::tracing::init_with(&settings.log.filter, settings.log.json);

    let store = db::connect_store(&settings.database)
        .await
        .context("failed to connect to Postgres")?;
    let actor = UserId::parse(cli.actor)?;
    let retry = RetryPolicies::from(&settings.retry);

    match cli.cmd {
        Commands::Migrate => {
            db::migrate(store.pool()).await.context("db migrate failed")?;
            info!("migrations applied");
            println!("migrate=OK");
        }
        Commands::Adjust {
            item,
            warehouse,
            actual,
            reason,
        } => {
            let coordinator = StockCoordinator::with_retry(store, retry);
            let entry = coordinator
                .adjust(stock_key(item, warehouse)?, actual, &reason, actor)
                .await?;
            print_json(&entry)?;
        }
        Commands::Levels { cmd } => {
            let coordinator = StockCoordinator::with_retry(store, retry);
            let page = match cmd {
                LevelsCmd::Item { id, page } => {
                    coordinator
                        .stock_levels_by_item(ItemId::parse(id)?, page.pagination())
                        .await?
                }
                LevelsCmd::Warehouse { id, page } => {
                    coordinator
                        .stock_levels_by_warehouse(WarehouseId::parse(id)?, page.pagination())
                        .await?
                }
            };
            print_json(&page)?;
        }
        Commands::Ledger { cmd } => {
            let coordinator = StockCoordinator::with_retry(store, retry);
            match cmd {
                LedgerCmd::List {
                    item,
                    warehouse,
                    kind,
                    ref_type,
                    ref_id,
                    page,
                } => {
                    let filter = LedgerFilter {
                        item_id: item.map(ItemId::parse).transpose()?,
                        warehouse_id: warehouse.map(WarehouseId::parse).transpose()?,
                        kind,
                        ref_type,
                        ref_id,
                        ..LedgerFilter::default()
                    };
                    print_json(&coordinator.ledger_entries(&filter, page.pagination()).await?)?;
                }
                LedgerCmd::Show { id } => {
                    let id = LedgerEntryId::parse(id)?;
                    print_json(&coordinator.ledger_entry_detail(id).await?)?;
                }
            }
        }
        Commands::Purchase { cmd } => run_purchase(cmd, store, retry, actor).await?,
        Commands::Sales { cmd } => run_sales(cmd, store, retry, actor).await?,
    }

    Ok(())
}

async fn run_purchase(
    cmd: PurchaseCmd,
    store: PgStore,
    retry: RetryPolicies,
    actor: UserId,
) -> Result<()> {
    let orders = OrderService::with_retry(store, retry.batch);
    match cmd {
        PurchaseCmd::Create { supplier } => {
            print_json(
                &orders
                    .create_purchase_order(PartnerId::parse(supplier)?, actor)
                    .await?,
            )?;
        }
        PurchaseCmd::AddLine {
            id,
            item,
            warehouse,
            qty,
            unit_cost,
        } => {
            let key = stock_key(item, warehouse)?;
            let order = orders
                .add_purchase_line(
                    PurchaseOrderId::parse(id)?,
                    key.item_id,
                    key.warehouse_id,
                    qty,
                    unit_cost,
                    actor,
                )
                .await?;
            print_json(&order)?;
        }
        PurchaseCmd::Order { id } => {
            print_json(&orders.order_purchase(PurchaseOrderId::parse(id)?, actor).await?)?;
        }
        PurchaseCmd::Receive { id } => {
            print_json(&orders.receive_purchase(PurchaseOrderId::parse(id)?, actor).await?)?;
        }
        PurchaseCmd::Cancel { id } => {
            print_json(&orders.cancel_purchase(PurchaseOrderId::parse(id)?, actor).await?)?;
        }
        PurchaseCmd::Show { id } => {
            print_json(&orders.purchase_order(PurchaseOrderId::parse(id)?).await?)?;
        }
    }
    Ok(())
}

async fn run_sales(
    cmd: SalesCmd,
    store: PgStore,
    retry: RetryPolicies,
    actor: UserId,
) -> Result<()> {
    let orders = OrderService::with_retry(store, retry.batch);
    match cmd {
        SalesCmd::Create {
            customer,
            name,
            phone,
            zipcode,
            address1,
            address2,
        } => {
            let order = orders
                .create_sales_order(
                    PartnerId::parse(customer)?,
                    CustomerInfo::new(name, phone)?,
                    ShippingAddress::new(zipcode, address1, address2)?,
                    actor,
                )
                .await?;
            print_json(&order)?;
        }
        SalesCmd::AddLine {
            id,
            item,
            warehouse,
            qty,
            unit_price,
        } => {
            let key = stock_key(item, warehouse)?;
            let order = orders
                .add_sales_line(
                    SalesOrderId::parse(id)?,
                    key.item_id,
                    key.warehouse_id,
                    qty,
                    unit_price,
                    actor,
                )
                .await?;
            print_json(&order)?;
        }
        SalesCmd::Order { id } => {
            print_json(&orders.order_sales(SalesOrderId::parse(id)?, actor).await?)?;
        }
        SalesCmd::Ship { id } => {
            print_json(&orders.ship_sales(SalesOrderId::parse(id)?, actor).await?)?;
        }
        SalesCmd::Cancel { id } => {
            print_json(&orders.cancel_sales(SalesOrderId::parse(id)?, actor).await?)?;
        }
        SalesCmd::Show { id } => {
            print_json(&orders.sales_order(SalesOrderId::parse(id)?).await?)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ledger_list_parses_enum_filters() {
        let cli = Cli::try_parse_from([
            "minierp", "ledger", "list", "--type", "ADJUST", "--ref-type", "SALES_ORDER",
            "--limit", "5",
        ])
        .unwrap();
        match cli.cmd {
            Commands::Ledger {
                cmd:
                    LedgerCmd::List {
                        kind,
                        ref_type,
                        page,
                        ..
                    },
            } => {
                assert_eq!(kind, Some(TransactionType::Adjust));
                assert_eq!(ref_type, Some(RefType::SalesOrder));
                assert_eq!(page.pagination().limit, 5);
            }
            _ => panic!("expected ledger list"),
        }
    }
}
