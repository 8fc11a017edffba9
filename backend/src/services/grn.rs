//! Goods receipt notes
//!
//! The ledger-backed inbound path. A receipt is created in draft with no
//! stock effect; posting brings every line into the header warehouse through
//! the stock ledger, and cancelling a posted receipt appends the exact
//! reversing entries in the same transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use shared::{
    invert_plan, line_total, receive_plan, sum_line_totals, validate_items_not_empty,
    validate_price, validate_quantity, DocumentKind, PaginatedResponse, Pagination,
    PaginationMeta,
};

use crate::error::{AppError, AppResult};
use crate::services::catalog::{ensure_products_exist, ensure_warehouse_exists};
use crate::services::numbering::DocumentNumbers;
use crate::services::settings::ConfigProvider;
use crate::services::stock::{StockRefType, StockService};

/// Goods receipt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GrnStatus {
    Draft,
    Posted,
    Cancelled,
}

impl GrnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrnStatus::Draft => "draft",
            GrnStatus::Posted => "posted",
            GrnStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(GrnStatus::Draft),
            "posted" => Some(GrnStatus::Posted),
            "cancelled" => Some(GrnStatus::Cancelled),
            _ => None,
        }
    }

    /// Allowed lifecycle transitions.
    pub fn can_transition_to(&self, next: GrnStatus) -> bool {
        matches!(
            (*self, next),
            (GrnStatus::Draft, GrnStatus::Posted)
                | (GrnStatus::Draft, GrnStatus::Cancelled)
                | (GrnStatus::Posted, GrnStatus::Cancelled)
        )
    }
}

/// A goods receipt note with its lines.
#[derive(Debug, Clone, Serialize)]
pub struct Grn {
    pub id: i64,
    pub tenant_id: Uuid,
    pub grn_number: String,
    pub warehouse_id: i64,
    pub supplier_name: Option<String>,
    pub status: GrnStatus,
    pub total_amount: Decimal,
    pub remarks: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub items: Vec<GrnItem>,
}

/// One receipt line.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GrnItem {
    pub id: i64,
    pub grn_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub purchase_price: Decimal,
    pub line_total: Decimal,
}

/// Input line for creating or updating a receipt
#[derive(Debug, Clone, Deserialize)]
pub struct GrnItemInput {
    pub product_id: i64,
    pub quantity: i64,
    pub purchase_price: Decimal,
}

/// Input for creating a goods receipt note
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGrnInput {
    pub warehouse_id: i64,
    pub supplier_name: Option<String>,
    pub remarks: Option<String>,
    pub items: Vec<GrnItemInput>,
}

/// Input for updating a draft receipt
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateGrnInput {
    pub supplier_name: Option<String>,
    pub remarks: Option<String>,
    pub items: Option<Vec<GrnItemInput>>,
}

/// Filters for listing receipts
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrnFilter {
    pub status: Option<GrnStatus>,
    pub warehouse_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(sqlx::FromRow)]
struct GrnRow {
    id: i64,
    tenant_id: Uuid,
    grn_number: String,
    warehouse_id: i64,
    supplier_name: Option<String>,
    status: GrnStatus,
    total_amount: Decimal,
    remarks: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    posted_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl GrnRow {
    fn into_grn(self, items: Vec<GrnItem>) -> Grn {
        Grn {
            id: self.id,
            tenant_id: self.tenant_id,
            grn_number: self.grn_number,
            warehouse_id: self.warehouse_id,
            supplier_name: self.supplier_name,
            status: self.status,
            total_amount: self.total_amount,
            remarks: self.remarks,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            posted_at: self.posted_at,
            cancelled_at: self.cancelled_at,
            items,
        }
    }
}

/// Service for goods receipt notes
#[derive(Clone)]
pub struct GrnService {
    db: PgPool,
    config: Arc<dyn ConfigProvider>,
    numbers: DocumentNumbers,
}

impl GrnService {
    pub fn new(db: PgPool, config: Arc<dyn ConfigProvider>) -> Self {
        let numbers = DocumentNumbers::new(config.clone());
        Self {
            db,
            config,
            numbers,
        }
    }

    /// Create a draft receipt. No stock effect until posting.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        input: CreateGrnInput,
    ) -> AppResult<Grn> {
        Self::validate_items(&input.items)?;
        ensure_warehouse_exists(&self.db, tenant_id, input.warehouse_id).await?;
        let product_ids: Vec<i64> = input.items.iter().map(|i| i.product_id).collect();
        ensure_products_exist(&self.db, tenant_id, &product_ids).await?;

        let total_amount =
            sum_line_totals(input.items.iter().map(|i| (i.quantity, i.purchase_price)));
        let spec = self.numbers.series_spec(tenant_id, DocumentKind::Grn).await?;

        let mut tx = self.db.begin().await?;

        let value = DocumentNumbers::next_value(&mut tx, tenant_id, DocumentKind::Grn).await?;
        let grn_number = spec.format(value);

        let row = sqlx::query_as::<_, GrnRow>(
            r#"
            INSERT INTO grns
                (tenant_id, grn_number, warehouse_id, supplier_name, status, total_amount,
                 remarks, created_by)
            VALUES ($1, $2, $3, $4, 'draft', $5, $6, $7)
            RETURNING id, tenant_id, grn_number, warehouse_id, supplier_name, status,
                      total_amount, remarks, created_by, created_at, updated_at,
                      posted_at, cancelled_at
            "#,
        )
        .bind(tenant_id)
        .bind(&grn_number)
        .bind(input.warehouse_id)
        .bind(&input.supplier_name)
        .bind(total_amount)
        .bind(&input.remarks)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let items = Self::insert_items(&mut tx, row.id, &input.items).await?;

        tx.commit().await?;

        Ok(row.into_grn(items))
    }

    /// Post a draft receipt, bringing its quantities into stock.
    pub async fn post(&self, tenant_id: Uuid, grn_id: i64) -> AppResult<Grn> {
        let allow_negative = self.config.allow_negative_stock(tenant_id).await?;

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, grn_id).await?;
        if !row.status.can_transition_to(GrnStatus::Posted) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot post GRN in '{}' status",
                row.status.as_str()
            )));
        }

        let items = Self::fetch_items(&mut *tx, row.id).await?;
        let lines: Vec<(i64, i64)> = items.iter().map(|i| (i.product_id, i.quantity)).collect();
        let plan = receive_plan(row.warehouse_id, &lines);

        StockService::apply_plan(
            &mut tx,
            tenant_id,
            &plan,
            StockRefType::Grn,
            row.id,
            Utc::now().date_naive(),
            allow_negative,
        )
        .await?;

        let row = sqlx::query_as::<_, GrnRow>(
            r#"
            UPDATE grns
            SET status = 'posted', posted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, grn_number, warehouse_id, supplier_name, status,
                      total_amount, remarks, created_by, created_at, updated_at,
                      posted_at, cancelled_at
            "#,
        )
        .bind(grn_id)
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "GRN {} posted: {} lines received into warehouse {}",
            row.grn_number,
            items.len(),
            row.warehouse_id
        );

        Ok(row.into_grn(items))
    }

    /// Cancel a receipt. A posted receipt has its stock effect exactly
    /// reversed in the same transaction, using the recorded item quantities.
    pub async fn cancel(&self, tenant_id: Uuid, grn_id: i64) -> AppResult<Grn> {
        let allow_negative = self.config.allow_negative_stock(tenant_id).await?;

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, grn_id).await?;
        if !row.status.can_transition_to(GrnStatus::Cancelled) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot cancel GRN in '{}' status",
                row.status.as_str()
            )));
        }

        let items = Self::fetch_items(&mut *tx, row.id).await?;
        let was_posted = row.status == GrnStatus::Posted;

        if was_posted {
            let lines: Vec<(i64, i64)> = items.iter().map(|i| (i.product_id, i.quantity)).collect();
            let plan = invert_plan(&receive_plan(row.warehouse_id, &lines));

            StockService::apply_plan(
                &mut tx,
                tenant_id,
                &plan,
                StockRefType::Grn,
                row.id,
                Utc::now().date_naive(),
                allow_negative,
            )
            .await?;
        }

        let row = sqlx::query_as::<_, GrnRow>(
            r#"
            UPDATE grns
            SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, grn_number, warehouse_id, supplier_name, status,
                      total_amount, remarks, created_by, created_at, updated_at,
                      posted_at, cancelled_at
            "#,
        )
        .bind(grn_id)
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if was_posted {
            tracing::info!("GRN {} cancelled, stock effect reversed", row.grn_number);
        }

        Ok(row.into_grn(items))
    }

    /// Replace the mutable fields of a draft receipt. When items are given
    /// they replace the existing lines and the total is recomputed.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        grn_id: i64,
        input: UpdateGrnInput,
    ) -> AppResult<Grn> {
        if let Some(ref items) = input.items {
            Self::validate_items(items)?;
            let product_ids: Vec<i64> = items.iter().map(|i| i.product_id).collect();
            ensure_products_exist(&self.db, tenant_id, &product_ids).await?;
        }

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, grn_id).await?;
        if row.status != GrnStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft GRNs can be edited".to_string(),
            ));
        }

        let items = match &input.items {
            Some(new_items) => {
                sqlx::query("DELETE FROM grn_items WHERE grn_id = $1")
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
                Self::insert_items(&mut tx, row.id, new_items).await?
            }
            None => Self::fetch_items(&mut *tx, row.id).await?,
        };

        let total_amount = sum_line_totals(items.iter().map(|i| (i.quantity, i.purchase_price)));

        let row = sqlx::query_as::<_, GrnRow>(
            r#"
            UPDATE grns
            SET supplier_name = COALESCE($3, supplier_name),
                remarks = COALESCE($4, remarks),
                total_amount = $5,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, grn_number, warehouse_id, supplier_name, status,
                      total_amount, remarks, created_by, created_at, updated_at,
                      posted_at, cancelled_at
            "#,
        )
        .bind(grn_id)
        .bind(tenant_id)
        .bind(&input.supplier_name)
        .bind(&input.remarks)
        .bind(total_amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_grn(items))
    }

    /// Delete a draft receipt and its lines.
    pub async fn remove(&self, tenant_id: Uuid, grn_id: i64) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, grn_id).await?;
        if row.status != GrnStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft GRNs can be deleted".to_string(),
            ));
        }

        sqlx::query("DELETE FROM grns WHERE id = $1 AND tenant_id = $2")
            .bind(grn_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Fetch one receipt with its lines.
    pub async fn find_one(&self, tenant_id: Uuid, grn_id: i64) -> AppResult<Grn> {
        let row = sqlx::query_as::<_, GrnRow>(
            r#"
            SELECT id, tenant_id, grn_number, warehouse_id, supplier_name, status,
                   total_amount, remarks, created_by, created_at, updated_at,
                   posted_at, cancelled_at
            FROM grns
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(grn_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("GRN".to_string()))?;

        let items = Self::fetch_items(&self.db, row.id).await?;

        Ok(row.into_grn(items))
    }

    /// List receipts matching the filters, newest first.
    pub async fn find_all(
        &self,
        tenant_id: Uuid,
        filter: GrnFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Grn>> {
        let total_items = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM grns
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR status = $2)
              AND ($3::BIGINT IS NULL OR warehouse_id = $3)
              AND ($4::DATE IS NULL OR created_at::DATE >= $4)
              AND ($5::DATE IS NULL OR created_at::DATE <= $5)
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status)
        .bind(filter.warehouse_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, GrnRow>(
            r#"
            SELECT id, tenant_id, grn_number, warehouse_id, supplier_name, status,
                   total_amount, remarks, created_by, created_at, updated_at,
                   posted_at, cancelled_at
            FROM grns
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR status = $2)
              AND ($3::BIGINT IS NULL OR warehouse_id = $3)
              AND ($4::DATE IS NULL OR created_at::DATE >= $4)
              AND ($5::DATE IS NULL OR created_at::DATE <= $5)
            ORDER BY id DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status)
        .bind(filter.warehouse_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = self.attach_items(rows).await?;

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total_items as u64),
        })
    }

    fn validate_items(items: &[GrnItemInput]) -> AppResult<()> {
        if let Err(message) = validate_items_not_empty(items.len()) {
            return Err(AppError::validation("items", message));
        }
        for item in items {
            if let Err(message) = validate_quantity(item.quantity) {
                return Err(AppError::validation("quantity", message));
            }
            if let Err(message) = validate_price(item.purchase_price) {
                return Err(AppError::validation("purchase_price", message));
            }
        }
        Ok(())
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        grn_id: i64,
    ) -> AppResult<GrnRow> {
        sqlx::query_as::<_, GrnRow>(
            r#"
            SELECT id, tenant_id, grn_number, warehouse_id, supplier_name, status,
                   total_amount, remarks, created_by, created_at, updated_at,
                   posted_at, cancelled_at
            FROM grns
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(grn_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("GRN".to_string()))
    }

    async fn insert_items(
        tx: &mut Transaction<'_, Postgres>,
        grn_id: i64,
        items: &[GrnItemInput],
    ) -> AppResult<Vec<GrnItem>> {
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query_as::<_, GrnItem>(
                r#"
                INSERT INTO grn_items (grn_id, product_id, quantity, purchase_price, line_total)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, grn_id, product_id, quantity, purchase_price, line_total
                "#,
            )
            .bind(grn_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.purchase_price)
            .bind(line_total(item.quantity, item.purchase_price))
            .fetch_one(&mut **tx)
            .await?;
            rows.push(row);
        }
        Ok(rows)
    }

    async fn fetch_items<'e, E>(executor: E, grn_id: i64) -> AppResult<Vec<GrnItem>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let items = sqlx::query_as::<_, GrnItem>(
            "SELECT id, grn_id, product_id, quantity, purchase_price, line_total \
             FROM grn_items WHERE grn_id = $1 ORDER BY id",
        )
        .bind(grn_id)
        .fetch_all(executor)
        .await?;
        Ok(items)
    }

    async fn attach_items(&self, rows: Vec<GrnRow>) -> AppResult<Vec<Grn>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut by_grn: HashMap<i64, Vec<GrnItem>> = HashMap::new();

        if !ids.is_empty() {
            let items = sqlx::query_as::<_, GrnItem>(
                "SELECT id, grn_id, product_id, quantity, purchase_price, line_total \
                 FROM grn_items WHERE grn_id = ANY($1) ORDER BY id",
            )
            .bind(&ids)
            .fetch_all(&self.db)
            .await?;

            for item in items {
                by_grn.entry(item.grn_id).or_default().push(item);
            }
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let items = by_grn.remove(&row.id).unwrap_or_default();
                row.into_grn(items)
            })
            .collect())
    }
}
