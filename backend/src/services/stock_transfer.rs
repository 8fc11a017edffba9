//! Stock transfers
//!
//! Moves a quantity of one product between two stock locations in a single
//! step; there is no draft state and no reversal. Branch legs go through
//! the stock ledger; a main-warehouse leg adjusts the product's flat
//! aggregate quantity instead, since the main warehouse has no branch row.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use shared::{
    validate_quantity, MovementDraft, PaginatedResponse, Pagination, PaginationMeta,
    StockLocation,
};

use crate::error::{AppError, AppResult};
use crate::services::catalog::{ensure_products_exist, ensure_warehouse_exists, CatalogService};
use crate::services::settings::ConfigProvider;
use crate::services::stock::{StockRefType, StockService};

/// A recorded stock transfer.
#[derive(Debug, Clone, Serialize)]
pub struct StockTransfer {
    pub id: i64,
    pub tenant_id: Uuid,
    pub product_id: i64,
    pub quantity: i64,
    pub source: StockLocation,
    pub target: StockLocation,
    pub remarks: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Input for moving stock between two locations
#[derive(Debug, Clone, Deserialize)]
pub struct CreateStockTransferInput {
    pub product_id: i64,
    pub quantity: i64,
    pub source: StockLocation,
    pub target: StockLocation,
    pub remarks: Option<String>,
}

/// Filters for listing transfers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StockTransferFilter {
    pub product_id: Option<i64>,
    pub warehouse_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(sqlx::FromRow)]
struct TransferRow {
    id: i64,
    tenant_id: Uuid,
    product_id: i64,
    quantity: i64,
    source_warehouse_id: Option<i64>,
    target_warehouse_id: Option<i64>,
    remarks: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TransferRow {
    fn into_transfer(self) -> StockTransfer {
        StockTransfer {
            id: self.id,
            tenant_id: self.tenant_id,
            product_id: self.product_id,
            quantity: self.quantity,
            source: StockLocation::from_branch_id(self.source_warehouse_id),
            target: StockLocation::from_branch_id(self.target_warehouse_id),
            remarks: self.remarks,
            created_by: self.created_by,
            created_at: self.created_at,
        }
    }
}

/// Service for stock transfers
#[derive(Clone)]
pub struct StockTransferService {
    db: PgPool,
    config: Arc<dyn ConfigProvider>,
}

impl StockTransferService {
    pub fn new(db: PgPool, config: Arc<dyn ConfigProvider>) -> Self {
        Self { db, config }
    }

    /// Move stock from one location to another. Both legs and the audit row
    /// commit together; the branch legs additionally appear in the stock
    /// ledger under `ref_type = transfer`.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        input: CreateStockTransferInput,
    ) -> AppResult<StockTransfer> {
        if let Err(message) = validate_quantity(input.quantity) {
            return Err(AppError::validation("quantity", message));
        }
        if input.source == input.target {
            return Err(AppError::validation(
                "target",
                "Source and target locations must differ",
            ));
        }

        ensure_products_exist(&self.db, tenant_id, &[input.product_id]).await?;
        if let StockLocation::Branch(warehouse_id) = input.source {
            ensure_warehouse_exists(&self.db, tenant_id, warehouse_id).await?;
        }
        if let StockLocation::Branch(warehouse_id) = input.target {
            ensure_warehouse_exists(&self.db, tenant_id, warehouse_id).await?;
        }

        let allow_negative = self.config.allow_negative_stock(tenant_id).await?;
        let entry_date = Utc::now().date_naive();

        let mut tx = self.db.begin().await?;

        let row = sqlx::query_as::<_, TransferRow>(
            r#"
            INSERT INTO stock_transfers
                (tenant_id, product_id, quantity, source_warehouse_id, target_warehouse_id,
                 remarks, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, tenant_id, product_id, quantity, source_warehouse_id,
                      target_warehouse_id, remarks, created_by, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(input.product_id)
        .bind(input.quantity)
        .bind(input.source.branch_id())
        .bind(input.target.branch_id())
        .bind(&input.remarks)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        match input.source {
            StockLocation::Branch(warehouse_id) => {
                let movement =
                    MovementDraft::outbound(input.product_id, warehouse_id, input.quantity);
                StockService::apply_movement(
                    &mut tx,
                    tenant_id,
                    &movement,
                    StockRefType::Transfer,
                    row.id,
                    entry_date,
                    allow_negative,
                )
                .await?;
            }
            StockLocation::MainWarehouse => {
                CatalogService::adjust_main_quantity(
                    &mut tx,
                    tenant_id,
                    input.product_id,
                    -input.quantity,
                    allow_negative,
                )
                .await?;
            }
        }

        match input.target {
            StockLocation::Branch(warehouse_id) => {
                let movement =
                    MovementDraft::inbound(input.product_id, warehouse_id, input.quantity);
                StockService::apply_movement(
                    &mut tx,
                    tenant_id,
                    &movement,
                    StockRefType::Transfer,
                    row.id,
                    entry_date,
                    allow_negative,
                )
                .await?;
            }
            StockLocation::MainWarehouse => {
                CatalogService::adjust_main_quantity(
                    &mut tx,
                    tenant_id,
                    input.product_id,
                    input.quantity,
                    allow_negative,
                )
                .await?;
            }
        }

        tx.commit().await?;

        let transfer = row.into_transfer();
        tracing::info!(
            "Stock transfer {}: {} units of product {} moved from {} to {}",
            transfer.id,
            transfer.quantity,
            transfer.product_id,
            transfer.source,
            transfer.target
        );

        Ok(transfer)
    }

    /// Fetch one transfer.
    pub async fn find_one(&self, tenant_id: Uuid, transfer_id: i64) -> AppResult<StockTransfer> {
        let row = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT id, tenant_id, product_id, quantity, source_warehouse_id,
                   target_warehouse_id, remarks, created_by, created_at
            FROM stock_transfers
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(transfer_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock transfer".to_string()))?;

        Ok(row.into_transfer())
    }

    /// List transfers matching the filters, newest first. The warehouse
    /// filter matches either end of the move.
    pub async fn find_all(
        &self,
        tenant_id: Uuid,
        filter: StockTransferFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<StockTransfer>> {
        let total_items = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM stock_transfers
            WHERE tenant_id = $1
              AND ($2::BIGINT IS NULL OR product_id = $2)
              AND ($3::BIGINT IS NULL OR source_warehouse_id = $3 OR target_warehouse_id = $3)
              AND ($4::DATE IS NULL OR created_at::DATE >= $4)
              AND ($5::DATE IS NULL OR created_at::DATE <= $5)
            "#,
        )
        .bind(tenant_id)
        .bind(filter.product_id)
        .bind(filter.warehouse_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT id, tenant_id, product_id, quantity, source_warehouse_id,
                   target_warehouse_id, remarks, created_by, created_at
            FROM stock_transfers
            WHERE tenant_id = $1
              AND ($2::BIGINT IS NULL OR product_id = $2)
              AND ($3::BIGINT IS NULL OR source_warehouse_id = $3 OR target_warehouse_id = $3)
              AND ($4::DATE IS NULL OR created_at::DATE >= $4)
              AND ($5::DATE IS NULL OR created_at::DATE <= $5)
            ORDER BY id DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(tenant_id)
        .bind(filter.product_id)
        .bind(filter.warehouse_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows.into_iter().map(TransferRow::into_transfer).collect();

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total_items as u64),
        })
    }
}
