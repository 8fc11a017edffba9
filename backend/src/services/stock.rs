//! Stock ledger, branch stock, and manual adjustments
//!
//! Every branch quantity change flows through `apply_movement`: it locks the
//! branch-stock row, enforces the negative-stock policy, upserts the new
//! balance, and appends an immutable ledger entry carrying the post-movement
//! balance. Document engines call it inside their own transactions so stock,
//! ledger, and document state commit or roll back together.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use shared::{apply_to_balance, MovementDraft, PaginatedResponse, Pagination, PaginationMeta};

use crate::error::{AppError, AppResult};
use crate::services::settings::ConfigProvider;

/// Document family a ledger entry points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StockRefType {
    Grn,
    DeliveryChallan,
    Transfer,
    Adjustment,
}

impl StockRefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockRefType::Grn => "grn",
            StockRefType::DeliveryChallan => "delivery_challan",
            StockRefType::Transfer => "transfer",
            StockRefType::Adjustment => "adjustment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "grn" => Some(StockRefType::Grn),
            "delivery_challan" => Some(StockRefType::DeliveryChallan),
            "transfer" => Some(StockRefType::Transfer),
            "adjustment" => Some(StockRefType::Adjustment),
            _ => None,
        }
    }
}

/// One immutable row of the stock ledger.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockLedgerEntry {
    pub id: i64,
    pub tenant_id: Uuid,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub qty_in: i64,
    pub qty_out: i64,
    pub balance_qty: i64,
    pub ref_type: StockRefType,
    pub ref_id: i64,
    pub entry_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Current on-hand row joined with product identity, for level reports.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BranchStockLevel {
    pub warehouse_id: i64,
    pub product_id: i64,
    pub sku: String,
    pub product_name: String,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// Filters for the paginated ledger query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerFilter {
    pub product_id: Option<i64>,
    pub warehouse_id: Option<i64>,
    pub ref_type: Option<StockRefType>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// Input for a manual adjustment. Positive quantity receives stock into the
/// warehouse, negative issues it out.
#[derive(Debug, Clone, Deserialize)]
pub struct StockAdjustmentInput {
    pub product_id: i64,
    pub warehouse_id: i64,
    pub quantity: i64,
    pub reason: String,
}

/// A recorded manual adjustment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockAdjustment {
    pub id: i64,
    pub tenant_id: Uuid,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub qty_in: i64,
    pub qty_out: i64,
    pub reason: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Service owning the stock ledger and branch stock
#[derive(Clone)]
pub struct StockService {
    db: PgPool,
    config: Arc<dyn ConfigProvider>,
}

impl StockService {
    pub fn new(db: PgPool, config: Arc<dyn ConfigProvider>) -> Self {
        Self { db, config }
    }

    /// Apply one movement: lock the branch-stock row, check the policy,
    /// upsert the balance, append the ledger entry. Runs inside the caller's
    /// transaction and never commits on its own, so a failure anywhere in the
    /// surrounding document action rolls stock and ledger back together.
    pub async fn apply_movement(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        movement: &MovementDraft,
        ref_type: StockRefType,
        ref_id: i64,
        entry_date: NaiveDate,
        allow_negative: bool,
    ) -> AppResult<StockLedgerEntry> {
        if let Err(message) = movement.validate() {
            return Err(AppError::validation("movement", message));
        }

        let current = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT quantity FROM branch_stocks
            WHERE tenant_id = $1 AND warehouse_id = $2 AND product_id = $3
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(movement.warehouse_id)
        .bind(movement.product_id)
        .fetch_optional(&mut **tx)
        .await?
        .unwrap_or(0);

        let new_quantity =
            apply_to_balance(current, movement, allow_negative).map_err(|shortfall| {
                AppError::InsufficientStock {
                    product_id: movement.product_id,
                    warehouse_id: Some(movement.warehouse_id),
                    requested: shortfall.requested,
                    available: shortfall.available,
                }
            })?;

        sqlx::query(
            r#"
            INSERT INTO branch_stocks (tenant_id, warehouse_id, product_id, quantity, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (tenant_id, warehouse_id, product_id)
            DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = NOW()
            "#,
        )
        .bind(tenant_id)
        .bind(movement.warehouse_id)
        .bind(movement.product_id)
        .bind(new_quantity)
        .execute(&mut **tx)
        .await?;

        let entry = sqlx::query_as::<_, StockLedgerEntry>(
            r#"
            INSERT INTO stock_ledger
                (tenant_id, product_id, warehouse_id, qty_in, qty_out, balance_qty,
                 ref_type, ref_id, entry_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, tenant_id, product_id, warehouse_id, qty_in, qty_out,
                      balance_qty, ref_type, ref_id, entry_date, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(movement.product_id)
        .bind(movement.warehouse_id)
        .bind(movement.qty_in)
        .bind(movement.qty_out)
        .bind(new_quantity)
        .bind(ref_type)
        .bind(ref_id)
        .bind(entry_date)
        .fetch_one(&mut **tx)
        .await?;

        Ok(entry)
    }

    /// Apply a whole movement plan in order, within one transaction.
    pub async fn apply_plan(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        plan: &[MovementDraft],
        ref_type: StockRefType,
        ref_id: i64,
        entry_date: NaiveDate,
        allow_negative: bool,
    ) -> AppResult<Vec<StockLedgerEntry>> {
        let mut entries = Vec::with_capacity(plan.len());
        for movement in plan {
            let entry = Self::apply_movement(
                tx,
                tenant_id,
                movement,
                ref_type,
                ref_id,
                entry_date,
                allow_negative,
            )
            .await?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Record a manual adjustment and apply its movement in one transaction.
    pub async fn adjust(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        input: StockAdjustmentInput,
    ) -> AppResult<StockAdjustment> {
        if input.quantity == 0 {
            return Err(AppError::validation(
                "quantity",
                "Adjustment quantity cannot be zero",
            ));
        }
        if input.reason.trim().is_empty() {
            return Err(AppError::validation("reason", "Reason is required"));
        }

        let product_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM products WHERE id = $1 AND tenant_id = $2)",
        )
        .bind(input.product_id)
        .bind(tenant_id)
        .fetch_one(&self.db)
        .await?;

        if !product_exists {
            return Err(AppError::NotFound("Product".to_string()));
        }

        let warehouse_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM warehouses WHERE id = $1 AND tenant_id = $2)",
        )
        .bind(input.warehouse_id)
        .bind(tenant_id)
        .fetch_one(&self.db)
        .await?;

        if !warehouse_exists {
            return Err(AppError::NotFound("Warehouse".to_string()));
        }

        let allow_negative = self.config.allow_negative_stock(tenant_id).await?;

        let (qty_in, qty_out) = if input.quantity > 0 {
            (input.quantity, 0)
        } else {
            (0, -input.quantity)
        };

        let mut tx = self.db.begin().await?;

        let adjustment = sqlx::query_as::<_, StockAdjustment>(
            r#"
            INSERT INTO stock_adjustments
                (tenant_id, product_id, warehouse_id, qty_in, qty_out, reason, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, tenant_id, product_id, warehouse_id, qty_in, qty_out,
                      reason, created_by, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(input.product_id)
        .bind(input.warehouse_id)
        .bind(qty_in)
        .bind(qty_out)
        .bind(&input.reason)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let movement = MovementDraft {
            product_id: input.product_id,
            warehouse_id: input.warehouse_id,
            qty_in,
            qty_out,
        };

        Self::apply_movement(
            &mut tx,
            tenant_id,
            &movement,
            StockRefType::Adjustment,
            adjustment.id,
            Utc::now().date_naive(),
            allow_negative,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Stock adjustment {} applied: product {} at warehouse {}, delta {}",
            adjustment.id,
            input.product_id,
            input.warehouse_id,
            input.quantity
        );

        Ok(adjustment)
    }

    /// Paginated ledger query, newest first.
    pub async fn ledger(
        &self,
        tenant_id: Uuid,
        filter: LedgerFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<StockLedgerEntry>> {
        let ref_type = filter.ref_type.map(|r| r.as_str());

        let total_items = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM stock_ledger
            WHERE tenant_id = $1
              AND ($2::BIGINT IS NULL OR product_id = $2)
              AND ($3::BIGINT IS NULL OR warehouse_id = $3)
              AND ($4::VARCHAR IS NULL OR ref_type = $4)
              AND ($5::DATE IS NULL OR entry_date >= $5)
              AND ($6::DATE IS NULL OR entry_date <= $6)
            "#,
        )
        .bind(tenant_id)
        .bind(filter.product_id)
        .bind(filter.warehouse_id)
        .bind(ref_type)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.db)
        .await?;

        let entries = sqlx::query_as::<_, StockLedgerEntry>(
            r#"
            SELECT id, tenant_id, product_id, warehouse_id, qty_in, qty_out,
                   balance_qty, ref_type, ref_id, entry_date, created_at
            FROM stock_ledger
            WHERE tenant_id = $1
              AND ($2::BIGINT IS NULL OR product_id = $2)
              AND ($3::BIGINT IS NULL OR warehouse_id = $3)
              AND ($4::VARCHAR IS NULL OR ref_type = $4)
              AND ($5::DATE IS NULL OR entry_date >= $5)
              AND ($6::DATE IS NULL OR entry_date <= $6)
            ORDER BY id DESC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(tenant_id)
        .bind(filter.product_id)
        .bind(filter.warehouse_id)
        .bind(ref_type)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse {
            data: entries,
            pagination: PaginationMeta::new(&pagination, total_items as u64),
        })
    }

    /// Ledger rows written against one document, oldest first.
    pub async fn entries_for_document(
        &self,
        tenant_id: Uuid,
        ref_type: StockRefType,
        ref_id: i64,
    ) -> AppResult<Vec<StockLedgerEntry>> {
        let entries = sqlx::query_as::<_, StockLedgerEntry>(
            r#"
            SELECT id, tenant_id, product_id, warehouse_id, qty_in, qty_out,
                   balance_qty, ref_type, ref_id, entry_date, created_at
            FROM stock_ledger
            WHERE tenant_id = $1 AND ref_type = $2 AND ref_id = $3
            ORDER BY id
            "#,
        )
        .bind(tenant_id)
        .bind(ref_type)
        .bind(ref_id)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    /// Current branch stock joined with product identity.
    pub async fn stock_levels(
        &self,
        tenant_id: Uuid,
        warehouse_id: Option<i64>,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<BranchStockLevel>> {
        let total_items = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM branch_stocks
            WHERE tenant_id = $1 AND ($2::BIGINT IS NULL OR warehouse_id = $2)
            "#,
        )
        .bind(tenant_id)
        .bind(warehouse_id)
        .fetch_one(&self.db)
        .await?;

        let levels = sqlx::query_as::<_, BranchStockLevel>(
            r#"
            SELECT bs.warehouse_id, bs.product_id, p.sku, p.name AS product_name,
                   bs.quantity, bs.updated_at
            FROM branch_stocks bs
            JOIN products p ON p.id = bs.product_id
            WHERE bs.tenant_id = $1 AND ($2::BIGINT IS NULL OR bs.warehouse_id = $2)
            ORDER BY bs.warehouse_id, p.sku
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(warehouse_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse {
            data: levels,
            pagination: PaginationMeta::new(&pagination, total_items as u64),
        })
    }

    /// Current on-hand quantity for one (product, warehouse), 0 when the row
    /// has never been touched.
    pub async fn point_balance(
        &self,
        tenant_id: Uuid,
        product_id: i64,
        warehouse_id: i64,
    ) -> AppResult<i64> {
        let quantity = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT quantity FROM branch_stocks
            WHERE tenant_id = $1 AND product_id = $2 AND warehouse_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(product_id)
        .bind(warehouse_id)
        .fetch_optional(&self.db)
        .await?
        .unwrap_or(0);

        Ok(quantity)
    }

    /// Balance recomputed from the ledger. Must always equal `point_balance`
    /// for the same key; exposed for audit comparison.
    pub async fn ledger_balance(
        &self,
        tenant_id: Uuid,
        product_id: i64,
        warehouse_id: i64,
    ) -> AppResult<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(qty_in - qty_out), 0) FROM stock_ledger
            WHERE tenant_id = $1 AND product_id = $2 AND warehouse_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(product_id)
        .bind(warehouse_id)
        .fetch_one(&self.db)
        .await?;

        Ok(balance)
    }

    /// List manual adjustments, newest first.
    pub async fn adjustments(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<StockAdjustment>> {
        let total_items = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM stock_adjustments WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_one(&self.db)
        .await?;

        let adjustments = sqlx::query_as::<_, StockAdjustment>(
            r#"
            SELECT id, tenant_id, product_id, warehouse_id, qty_in, qty_out,
                   reason, created_by, created_at
            FROM stock_adjustments
            WHERE tenant_id = $1
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse {
            data: adjustments,
            pagination: PaginationMeta::new(&pagination, total_items as u64),
        })
    }
}
