//! Postgres-backed ledger store.
//!
//! Every unit of work is one database transaction. Rows that are mutated are
//! locked with `SELECT ... FOR UPDATE` (products in ascending id order), and
//! transaction-scoped `lock_timeout` / `statement_timeout` bound how long a
//! unit of work can wait.
//!
//! ## Error Mapping
//!
//! | PostgreSQL code | StoreError | Scenario |
//! |-----------------|------------|----------|
//! | `23505` | `UniqueViolation` | duplicate product, order number, one-shot cash-flow key |
//! | `23502`, `23503`, `23514` | `Constraint` | not-null, foreign key or check failure |
//! | `55P03`, `57014` | `LockTimeout` | lock wait or statement ran past its timeout |
//! | `40001`, `40P01` | `Concurrency` | serialization failure or deadlock |
//! | other | `Database` | anything else reported by the server |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use stockbook_accounting::{CashFlowCategory, CashFlowEntry, CashFlowPeriod};
use stockbook_core::{
    CashFlowEntryId, DomainError, ExpectedVersion, MovementId, ProductId, PurchaseOrderId,
    ReceiptId, Reference, SupplierId, round_money,
};
use stockbook_inventory::{MovementKind, ProductStock, StockMovement};
use stockbook_purchasing::{PurchaseOrderItem, PurchaseOrderSnapshot};

use super::query::{MovementPage, Pagination};
use super::{
    LedgerStore, LedgerTx, StoreError, persisted_movement, persisted_product,
    persisted_purchase_order,
};
use crate::config::{DatabaseSettings, TransactionSettings};

const SCHEMA: &str = include_str!("../../migrations/0001_reconciliation.sql");

const PRODUCT_COLUMNS: &str =
    "id, opening_stock, stock, average_cost, last_cost, base_price, updated_at";

const MOVEMENT_COLUMNS: &str = "id, product_id, kind, delta, previous_stock, new_stock, \
     unit_cost, unit_price, total_value, reference_kind, reference_id, reason, created_at";

const CASH_FLOW_COLUMNS: &str = "id, direction, category, amount, description, payment_method, \
     reference_kind, reference_id, value_date, created_at";

const PURCHASE_ORDER_COLUMNS: &str = "id, order_number, supplier_id, status, payment_status, \
     payment_method, subtotal, tax, total, ordered_at, expected_on, paid_at, version";

/// Postgres ledger store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
    statement_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, transactions: &TransactionSettings) -> Self {
        Self {
            pool,
            lock_timeout: transactions.lock_timeout(),
            statement_timeout: transactions.statement_timeout(),
        }
    }

    /// Open a pool from settings.
    pub async fn connect(
        database: &DatabaseSettings,
        transactions: &TransactionSettings,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(database.max_connections)
            .min_connections(database.min_connections)
            .acquire_timeout(Duration::from_secs(database.acquire_timeout_secs))
            .connect(&database.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, transactions))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema (idempotent).
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            "SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)",
        )
        .bind(format!("{}ms", self.lock_timeout.as_millis()))
        .bind(format!("{}ms", self.statement_timeout.as_millis()))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_timeouts", e))?;

        Ok(Box::new(PostgresTx { tx }))
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PostgresTx {
    async fn insert_product(&mut self, product: &ProductStock) -> Result<(), StoreError> {
        let p = persisted_product(product);
        sqlx::query(
            r#"
            INSERT INTO products (id, opening_stock, stock, average_cost, last_cost, base_price, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(p.product_id.as_uuid())
        .bind(p.opening_stock)
        .bind(p.stock)
        .bind(p.average_cost)
        .bind(p.last_cost)
        .bind(p.base_price)
        .bind(p.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    async fn get_product(&mut self, id: ProductId) -> Result<Option<ProductStock>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_product", e))?;
        row.as_ref().map(decode_product).transpose()
    }

    #[instrument(skip(self), fields(count = ids.len()), err)]
    async fn lock_products(&mut self, ids: &[ProductId]) -> Result<Vec<ProductStock>, StoreError> {
        let mut sorted: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        sorted.sort();
        sorted.dedup();

        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(&sorted)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_products", e))?;

        rows.iter().map(decode_product).collect()
    }

    async fn update_product(&mut self, product: &ProductStock) -> Result<(), StoreError> {
        let p = persisted_product(product);
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock = $2, average_cost = $3, last_cost = $4, base_price = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(p.product_id.as_uuid())
        .bind(p.stock)
        .bind(p.average_cost)
        .bind(p.last_cost)
        .bind(p.base_price)
        .bind(p.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Constraint(format!("no product row {}", p.product_id)));
        }
        Ok(())
    }

    async fn product_ids(&mut self) -> Result<Vec<ProductId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM products ORDER BY id")
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("product_ids", e))?;
        Ok(ids.into_iter().map(ProductId::from_uuid).collect())
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        let m = persisted_movement(movement);
        sqlx::query(&format!(
            "INSERT INTO stock_movements ({MOVEMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(m.id.as_uuid())
        .bind(m.product_id.as_uuid())
        .bind(m.kind.as_str())
        .bind(m.delta)
        .bind(m.previous_stock)
        .bind(m.new_stock)
        .bind(m.unit_cost)
        .bind(m.unit_price)
        .bind(m.total_value)
        .bind(m.reference.map(|r| r.kind.as_str()))
        .bind(m.reference.map(|r| r.id))
        .bind(&m.reason)
        .bind(m.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    async fn product_movements(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE product_id = $1 ORDER BY seq ASC"
        ))
        .bind(product_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("product_movements", e))?;
        rows.iter().map(decode_movement).collect()
    }

    async fn movement_page(
        &mut self,
        product_id: ProductId,
        page: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements WHERE product_id = $1")
                .bind(product_id.as_uuid())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("count_movements", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE product_id = $1 \
             ORDER BY seq DESC LIMIT $2 OFFSET $3"
        ))
        .bind(product_id.as_uuid())
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("movement_page", e))?;

        let movements = rows.iter().map(decode_movement).collect::<Result<Vec<_>, _>>()?;
        Ok(MovementPage::new(movements, total.max(0) as u64, page))
    }

    async fn movements_by_reference(
        &mut self,
        reference: Reference,
        kind: MovementKind,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE reference_kind = $1 AND reference_id = $2 AND kind = $3 ORDER BY seq ASC"
        ))
        .bind(reference.kind.as_str())
        .bind(reference.id)
        .bind(kind.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("movements_by_reference", e))?;
        rows.iter().map(decode_movement).collect()
    }

    #[instrument(skip(self, entry), fields(category = %entry.category), err)]
    async fn insert_cash_flow(&mut self, entry: &CashFlowEntry) -> Result<CashFlowEntry, StoreError> {
        let amount = round_money(entry.amount);
        let inserted = sqlx::query(&format!(
            "INSERT INTO cash_flow_entries ({CASH_FLOW_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (reference_kind, reference_id, category) \
             WHERE reference_kind IS NOT NULL AND reference_kind <> 'PRODUCT' \
             DO NOTHING \
             RETURNING {CASH_FLOW_COLUMNS}"
        ))
        .bind(entry.id.as_uuid())
        .bind(entry.direction.as_str())
        .bind(entry.category.as_str())
        .bind(amount)
        .bind(&entry.description)
        .bind(entry.payment_method.as_deref())
        .bind(entry.reference.map(|r| r.kind.as_str()))
        .bind(entry.reference.map(|r| r.id))
        .bind(entry.value_date)
        .bind(entry.created_at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_cash_flow", e))?;

        if let Some(row) = inserted {
            return decode_cash_flow(&row);
        }

        // Lost the race on the partial unique index: hand back the winner.
        let Some(reference) = entry.reference else {
            return Err(StoreError::Database(
                "cash-flow insert skipped without a reference".into(),
            ));
        };
        debug!(%reference, "cash-flow entry already recorded");
        self.find_cash_flow(reference, entry.category)
            .await?
            .ok_or_else(|| StoreError::Database("conflicting cash-flow entry vanished".into()))
    }

    async fn find_cash_flow(
        &mut self,
        reference: Reference,
        category: CashFlowCategory,
    ) -> Result<Option<CashFlowEntry>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CASH_FLOW_COLUMNS} FROM cash_flow_entries \
             WHERE reference_kind = $1 AND reference_id = $2 AND category = $3 \
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(reference.kind.as_str())
        .bind(reference.id)
        .bind(category.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_cash_flow", e))?;
        row.as_ref().map(decode_cash_flow).transpose()
    }

    async fn delete_cash_flow(&mut self, id: CashFlowEntryId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM cash_flow_entries WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_cash_flow", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn cash_flow_in_period(
        &mut self,
        period: CashFlowPeriod,
    ) -> Result<Vec<CashFlowEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CASH_FLOW_COLUMNS} FROM cash_flow_entries \
             WHERE value_date BETWEEN $1 AND $2 ORDER BY value_date, created_at"
        ))
        .bind(period.from())
        .bind(period.to())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("cash_flow_in_period", e))?;
        rows.iter().map(decode_cash_flow).collect()
    }

    async fn insert_purchase_order(&mut self, po: &PurchaseOrderSnapshot) -> Result<(), StoreError> {
        let po = persisted_purchase_order(po);
        sqlx::query(&format!(
            "INSERT INTO purchase_orders ({PURCHASE_ORDER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(po.id.as_uuid())
        .bind(&po.order_number)
        .bind(po.supplier_id.as_uuid())
        .bind(po.status.as_str())
        .bind(po.payment_status.as_str())
        .bind(po.payment_method.as_deref())
        .bind(po.subtotal)
        .bind(po.tax)
        .bind(po.total)
        .bind(po.ordered_at)
        .bind(po.expected_on)
        .bind(po.paid_at)
        .bind(version_to_db(po.version)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_purchase_order", e))?;

        self.insert_items(&po).await
    }

    async fn get_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrderSnapshot>, StoreError> {
        self.load_purchase_order(id, false).await
    }

    #[instrument(skip(self), fields(purchase_order_id = %id), err)]
    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrderSnapshot>, StoreError> {
        self.load_purchase_order(id, true).await
    }

    #[instrument(skip(self, po), fields(purchase_order_id = %po.id, version = po.version), err)]
    async fn update_purchase_order(
        &mut self,
        po: &PurchaseOrderSnapshot,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let po = persisted_purchase_order(po);
        let expected_version = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to_db(v)?),
        };

        let result = sqlx::query(
            r#"
            UPDATE purchase_orders
            SET status = $2, payment_status = $3, payment_method = $4,
                subtotal = $5, tax = $6, total = $7, expected_on = $8, paid_at = $9,
                version = $10
            WHERE id = $1 AND ($11::BIGINT IS NULL OR version = $11)
            "#,
        )
        .bind(po.id.as_uuid())
        .bind(po.status.as_str())
        .bind(po.payment_status.as_str())
        .bind(po.payment_method.as_deref())
        .bind(po.subtotal)
        .bind(po.tax)
        .bind(po.total)
        .bind(po.expected_on)
        .bind(po.paid_at)
        .bind(version_to_db(po.version)?)
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_purchase_order", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Concurrency(format!(
                "purchase order {}: expected {expected:?}",
                po.id
            )));
        }

        sqlx::query("DELETE FROM purchase_order_items WHERE purchase_order_id = $1")
            .bind(po.id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("replace_items", e))?;
        self.insert_items(&po).await
    }

    async fn claim_receipt(
        &mut self,
        receipt_id: ReceiptId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrderId>, StoreError> {
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO purchase_receipts (receipt_id, purchase_order_id)
            VALUES ($1, $2)
            ON CONFLICT (receipt_id) DO NOTHING
            RETURNING receipt_id
            "#,
        )
        .bind(receipt_id.as_uuid())
        .bind(purchase_order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("claim_receipt", e))?;

        if claimed.is_some() {
            return Ok(None);
        }

        let holder: Uuid = sqlx::query_scalar(
            "SELECT purchase_order_id FROM purchase_receipts WHERE receipt_id = $1",
        )
        .bind(receipt_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_receipt", e))?;
        Ok(Some(PurchaseOrderId::from_uuid(holder)))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresTx { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresTx { tx } = *self;
        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

impl PostgresTx {
    async fn insert_items(&mut self, po: &PurchaseOrderSnapshot) -> Result<(), StoreError> {
        for item in &po.items {
            sqlx::query(
                r#"
                INSERT INTO purchase_order_items
                    (purchase_order_id, line_no, product_id, quantity_ordered, quantity_received, unit_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(po.id.as_uuid())
            .bind(i32::try_from(item.line_no).map_err(|_| {
                StoreError::Constraint(format!("line number {} out of range", item.line_no))
            })?)
            .bind(item.product_id.as_uuid())
            .bind(item.quantity_ordered)
            .bind(item.quantity_received)
            .bind(item.unit_price)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_item", e))?;
        }
        Ok(())
    }

    async fn load_purchase_order(
        &mut self,
        id: PurchaseOrderId,
        lock: bool,
    ) -> Result<Option<PurchaseOrderSnapshot>, StoreError> {
        let suffix = if lock { " FOR UPDATE" } else { "" };
        let row = sqlx::query(&format!(
            "SELECT {PURCHASE_ORDER_COLUMNS} FROM purchase_orders WHERE id = $1{suffix}"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_purchase_order", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let item_rows = sqlx::query(
            r#"
            SELECT line_no, product_id, quantity_ordered, quantity_received, unit_price
            FROM purchase_order_items
            WHERE purchase_order_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_items", e))?;

        let items = item_rows
            .iter()
            .map(decode_item)
            .collect::<Result<Vec<_>, _>>()?;
        decode_purchase_order(&row, items).map(Some)
    }
}

fn version_to_db(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Constraint(format!("version {version} out of range")))
}

fn decode_err(e: sqlx::Error) -> StoreError {
    StoreError::Decode(e.to_string())
}

fn decode_enum<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: core::str::FromStr<Err = DomainError>,
{
    let text: String = row.try_get(column).map_err(decode_err)?;
    text.parse()
        .map_err(|e: DomainError| StoreError::Decode(format!("{column}: {e}")))
}

fn decode_reference(row: &PgRow) -> Result<Option<Reference>, StoreError> {
    let kind: Option<String> = row.try_get("reference_kind").map_err(decode_err)?;
    let id: Option<Uuid> = row.try_get("reference_id").map_err(decode_err)?;
    match (kind, id) {
        (Some(kind), Some(id)) => {
            let kind = kind
                .parse()
                .map_err(|e: DomainError| StoreError::Decode(format!("reference_kind: {e}")))?;
            Ok(Some(Reference::new(kind, id)))
        }
        (None, None) => Ok(None),
        _ => Err(StoreError::Decode("half-populated reference".into())),
    }
}

fn decode_product(row: &PgRow) -> Result<ProductStock, StoreError> {
    Ok(ProductStock {
        product_id: ProductId::from_uuid(row.try_get("id").map_err(decode_err)?),
        opening_stock: row.try_get("opening_stock").map_err(decode_err)?,
        stock: row.try_get("stock").map_err(decode_err)?,
        average_cost: row.try_get("average_cost").map_err(decode_err)?,
        last_cost: row.try_get("last_cost").map_err(decode_err)?,
        base_price: row.try_get("base_price").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
    })
}

fn decode_movement(row: &PgRow) -> Result<StockMovement, StoreError> {
    Ok(StockMovement {
        id: MovementId::from_uuid(row.try_get("id").map_err(decode_err)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode_err)?),
        kind: decode_enum(row, "kind")?,
        delta: row.try_get("delta").map_err(decode_err)?,
        previous_stock: row.try_get("previous_stock").map_err(decode_err)?,
        new_stock: row.try_get("new_stock").map_err(decode_err)?,
        unit_cost: row.try_get("unit_cost").map_err(decode_err)?,
        unit_price: row.try_get("unit_price").map_err(decode_err)?,
        total_value: row.try_get("total_value").map_err(decode_err)?,
        reference: decode_reference(row)?,
        reason: row.try_get("reason").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

fn decode_cash_flow(row: &PgRow) -> Result<CashFlowEntry, StoreError> {
    Ok(CashFlowEntry {
        id: CashFlowEntryId::from_uuid(row.try_get("id").map_err(decode_err)?),
        direction: decode_enum(row, "direction")?,
        category: decode_enum(row, "category")?,
        amount: row.try_get("amount").map_err(decode_err)?,
        description: row.try_get("description").map_err(decode_err)?,
        payment_method: row.try_get("payment_method").map_err(decode_err)?,
        reference: decode_reference(row)?,
        value_date: row.try_get::<NaiveDate, _>("value_date").map_err(decode_err)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode_err)?,
    })
}

fn decode_item(row: &PgRow) -> Result<PurchaseOrderItem, StoreError> {
    let line_no: i32 = row.try_get("line_no").map_err(decode_err)?;
    Ok(PurchaseOrderItem {
        line_no: u32::try_from(line_no)
            .map_err(|_| StoreError::Decode(format!("negative line number {line_no}")))?,
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode_err)?),
        quantity_ordered: row.try_get("quantity_ordered").map_err(decode_err)?,
        quantity_received: row.try_get("quantity_received").map_err(decode_err)?,
        unit_price: row.try_get::<Decimal, _>("unit_price").map_err(decode_err)?,
    })
}

fn decode_purchase_order(
    row: &PgRow,
    items: Vec<PurchaseOrderItem>,
) -> Result<PurchaseOrderSnapshot, StoreError> {
    let version: i64 = row.try_get("version").map_err(decode_err)?;
    Ok(PurchaseOrderSnapshot {
        id: PurchaseOrderId::from_uuid(row.try_get("id").map_err(decode_err)?),
        order_number: row.try_get("order_number").map_err(decode_err)?,
        supplier_id: SupplierId::from_uuid(row.try_get("supplier_id").map_err(decode_err)?),
        status: decode_enum(row, "status")?,
        payment_status: decode_enum(row, "payment_status")?,
        payment_method: row.try_get("payment_method").map_err(decode_err)?,
        items,
        subtotal: row.try_get("subtotal").map_err(decode_err)?,
        tax: row.try_get("tax").map_err(decode_err)?,
        total: row.try_get("total").map_err(decode_err)?,
        ordered_at: row.try_get("ordered_at").map_err(decode_err)?,
        expected_on: row.try_get("expected_on").map_err(decode_err)?,
        paid_at: row.try_get("paid_at").map_err(decode_err)?,
        version: u64::try_from(version)
            .map_err(|_| StoreError::Decode(format!("negative version {version}")))?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23502") | Some("23503") | Some("23514") => StoreError::Constraint(msg),
                Some("55P03") | Some("57014") => StoreError::LockTimeout(msg),
                Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(format!("{operation}: {err}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Decode(format!("{operation}: {err}"))
        }
        _ => StoreError::Database(format!("sqlx error in {operation}: {err}")),
    }
}
