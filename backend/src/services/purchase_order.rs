//! Purchase orders
//!
//! The legacy procurement path: receiving a purchase order increments each
//! product's flat aggregate quantity directly instead of writing ledger
//! entries. Ledger-backed receiving is what GRNs are for; this engine stays
//! compatible with data created before the per-warehouse ledger existed.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use shared::{
    sum_line_totals, validate_items_not_empty, validate_price, validate_quantity, DocumentKind,
    PaginatedResponse, Pagination, PaginationMeta,
};

use crate::error::{AppError, AppResult};
use crate::services::catalog::{ensure_products_exist, CatalogService};
use crate::services::numbering::DocumentNumbers;
use crate::services::settings::ConfigProvider;

/// Purchase order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PurchaseOrderStatus::Draft),
            "received" => Some(PurchaseOrderStatus::Received),
            "cancelled" => Some(PurchaseOrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Allowed lifecycle transitions. `received` is terminal; receipt is
    /// never reversed through this engine.
    pub fn can_transition_to(&self, next: PurchaseOrderStatus) -> bool {
        matches!(
            (*self, next),
            (PurchaseOrderStatus::Draft, PurchaseOrderStatus::Received)
                | (PurchaseOrderStatus::Draft, PurchaseOrderStatus::Cancelled)
        )
    }
}

/// A purchase order with its lines.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOrder {
    pub id: i64,
    pub tenant_id: Uuid,
    pub po_number: String,
    pub supplier_name: Option<String>,
    pub status: PurchaseOrderStatus,
    pub total_amount: Decimal,
    pub remarks: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub items: Vec<PurchaseOrderItem>,
}

/// One purchase order line.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PurchaseOrderItem {
    pub id: i64,
    pub purchase_order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub line_total: Decimal,
}

/// Input line for a purchase order
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseOrderItemInput {
    pub product_id: i64,
    pub quantity: i64,
    pub unit_cost: Decimal,
}

/// Input for creating a purchase order
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePurchaseOrderInput {
    pub supplier_name: Option<String>,
    pub remarks: Option<String>,
    pub items: Vec<PurchaseOrderItemInput>,
}

/// Input for updating a draft purchase order
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePurchaseOrderInput {
    pub supplier_name: Option<String>,
    pub remarks: Option<String>,
    pub items: Option<Vec<PurchaseOrderItemInput>>,
}

/// Filters for listing purchase orders
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PurchaseOrderFilter {
    pub status: Option<PurchaseOrderStatus>,
    pub supplier: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(sqlx::FromRow)]
struct PurchaseOrderRow {
    id: i64,
    tenant_id: Uuid,
    po_number: String,
    supplier_name: Option<String>,
    status: PurchaseOrderStatus,
    total_amount: Decimal,
    remarks: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    received_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl PurchaseOrderRow {
    fn into_order(self, items: Vec<PurchaseOrderItem>) -> PurchaseOrder {
        PurchaseOrder {
            id: self.id,
            tenant_id: self.tenant_id,
            po_number: self.po_number,
            supplier_name: self.supplier_name,
            status: self.status,
            total_amount: self.total_amount,
            remarks: self.remarks,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            received_at: self.received_at,
            cancelled_at: self.cancelled_at,
            items,
        }
    }
}

/// Service for purchase orders
#[derive(Clone)]
pub struct PurchaseOrderService {
    db: PgPool,
    config: Arc<dyn ConfigProvider>,
    numbers: DocumentNumbers,
}

impl PurchaseOrderService {
    pub fn new(db: PgPool, config: Arc<dyn ConfigProvider>) -> Self {
        let numbers = DocumentNumbers::new(config.clone());
        Self {
            db,
            config,
            numbers,
        }
    }

    /// Create a draft purchase order.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        input: CreatePurchaseOrderInput,
    ) -> AppResult<PurchaseOrder> {
        Self::validate_items(&input.items)?;

        let product_ids: Vec<i64> = input.items.iter().map(|i| i.product_id).collect();
        ensure_products_exist(&self.db, tenant_id, &product_ids).await?;

        let total_amount = sum_line_totals(input.items.iter().map(|i| (i.quantity, i.unit_cost)));

        let spec = self
            .numbers
            .series_spec(tenant_id, DocumentKind::PurchaseOrder)
            .await?;

        let mut tx = self.db.begin().await?;

        let value =
            DocumentNumbers::next_value(&mut tx, tenant_id, DocumentKind::PurchaseOrder).await?;
        let po_number = spec.format(value);

        let row = sqlx::query_as::<_, PurchaseOrderRow>(
            r#"
            INSERT INTO purchase_orders
                (tenant_id, po_number, supplier_name, status, total_amount, remarks, created_by)
            VALUES ($1, $2, $3, 'draft', $4, $5, $6)
            RETURNING id, tenant_id, po_number, supplier_name, status, total_amount,
                      remarks, created_by, created_at, updated_at, received_at, cancelled_at
            "#,
        )
        .bind(tenant_id)
        .bind(&po_number)
        .bind(&input.supplier_name)
        .bind(total_amount)
        .bind(&input.remarks)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let items = Self::insert_items(&mut tx, row.id, &input.items).await?;

        tx.commit().await?;

        Ok(row.into_order(items))
    }

    /// Receive a draft purchase order, adding each line's quantity to the
    /// product's flat stock. Terminal; there is no reversal.
    pub async fn mark_received(&self, tenant_id: Uuid, order_id: i64) -> AppResult<PurchaseOrder> {
        let allow_negative = self.config.allow_negative_stock(tenant_id).await?;

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, order_id).await?;
        if !row.status.can_transition_to(PurchaseOrderStatus::Received) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot receive purchase order in '{}' status",
                row.status.as_str()
            )));
        }

        let items = Self::fetch_items(&mut *tx, row.id).await?;
        for item in &items {
            CatalogService::adjust_main_quantity(
                &mut tx,
                tenant_id,
                item.product_id,
                item.quantity,
                allow_negative,
            )
            .await?;
        }

        let row = sqlx::query_as::<_, PurchaseOrderRow>(
            r#"
            UPDATE purchase_orders
            SET status = 'received', received_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, po_number, supplier_name, status, total_amount,
                      remarks, created_by, created_at, updated_at, received_at, cancelled_at
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Purchase order {} received: {} lines added to product stock",
            row.po_number,
            items.len()
        );

        Ok(row.into_order(items))
    }

    /// Cancel a draft purchase order.
    pub async fn cancel(&self, tenant_id: Uuid, order_id: i64) -> AppResult<PurchaseOrder> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, order_id).await?;
        if !row.status.can_transition_to(PurchaseOrderStatus::Cancelled) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot cancel purchase order in '{}' status",
                row.status.as_str()
            )));
        }

        let row = sqlx::query_as::<_, PurchaseOrderRow>(
            r#"
            UPDATE purchase_orders
            SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, po_number, supplier_name, status, total_amount,
                      remarks, created_by, created_at, updated_at, received_at, cancelled_at
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        let items = Self::fetch_items(&mut *tx, row.id).await?;

        tx.commit().await?;

        Ok(row.into_order(items))
    }

    /// Replace the mutable fields of a draft purchase order.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        order_id: i64,
        input: UpdatePurchaseOrderInput,
    ) -> AppResult<PurchaseOrder> {
        if let Some(items) = &input.items {
            Self::validate_items(items)?;
            let product_ids: Vec<i64> = items.iter().map(|i| i.product_id).collect();
            ensure_products_exist(&self.db, tenant_id, &product_ids).await?;
        }

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, order_id).await?;
        if row.status != PurchaseOrderStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft purchase orders can be edited".to_string(),
            ));
        }

        let items = match &input.items {
            Some(new_items) => {
                sqlx::query("DELETE FROM purchase_order_items WHERE purchase_order_id = $1")
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
                Self::insert_items(&mut tx, row.id, new_items).await?
            }
            None => Self::fetch_items(&mut *tx, row.id).await?,
        };

        let total_amount = sum_line_totals(items.iter().map(|i| (i.quantity, i.unit_cost)));

        let row = sqlx::query_as::<_, PurchaseOrderRow>(
            r#"
            UPDATE purchase_orders
            SET supplier_name = COALESCE($3, supplier_name),
                remarks = COALESCE($4, remarks),
                total_amount = $5,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, po_number, supplier_name, status, total_amount,
                      remarks, created_by, created_at, updated_at, received_at, cancelled_at
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .bind(&input.supplier_name)
        .bind(&input.remarks)
        .bind(total_amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_order(items))
    }

    /// Delete a draft purchase order and its lines.
    pub async fn remove(&self, tenant_id: Uuid, order_id: i64) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, order_id).await?;
        if row.status != PurchaseOrderStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft purchase orders can be deleted".to_string(),
            ));
        }

        sqlx::query("DELETE FROM purchase_orders WHERE id = $1 AND tenant_id = $2")
            .bind(order_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Fetch one purchase order with its lines.
    pub async fn find_one(&self, tenant_id: Uuid, order_id: i64) -> AppResult<PurchaseOrder> {
        let row = sqlx::query_as::<_, PurchaseOrderRow>(
            r#"
            SELECT id, tenant_id, po_number, supplier_name, status, total_amount,
                   remarks, created_by, created_at, updated_at, received_at, cancelled_at
            FROM purchase_orders
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))?;

        let items = Self::fetch_items(&self.db, row.id).await?;

        Ok(row.into_order(items))
    }

    /// List purchase orders matching the filters, newest first.
    pub async fn find_all(
        &self,
        tenant_id: Uuid,
        filter: PurchaseOrderFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<PurchaseOrder>> {
        let total_items = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM purchase_orders
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR supplier_name ILIKE '%' || $3 || '%')
              AND ($4::DATE IS NULL OR created_at::DATE >= $4)
              AND ($5::DATE IS NULL OR created_at::DATE <= $5)
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status)
        .bind(&filter.supplier)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, PurchaseOrderRow>(
            r#"
            SELECT id, tenant_id, po_number, supplier_name, status, total_amount,
                   remarks, created_by, created_at, updated_at, received_at, cancelled_at
            FROM purchase_orders
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR supplier_name ILIKE '%' || $3 || '%')
              AND ($4::DATE IS NULL OR created_at::DATE >= $4)
              AND ($5::DATE IS NULL OR created_at::DATE <= $5)
            ORDER BY id DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status)
        .bind(&filter.supplier)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut by_order: HashMap<i64, Vec<PurchaseOrderItem>> = HashMap::new();

        if !ids.is_empty() {
            let items = sqlx::query_as::<_, PurchaseOrderItem>(
                "SELECT id, purchase_order_id, product_id, quantity, unit_cost, line_total \
                 FROM purchase_order_items WHERE purchase_order_id = ANY($1) ORDER BY id",
            )
            .bind(&ids)
            .fetch_all(&self.db)
            .await?;

            for item in items {
                by_order
                    .entry(item.purchase_order_id)
                    .or_default()
                    .push(item);
            }
        }

        let data = rows
            .into_iter()
            .map(|row| {
                let items = by_order.remove(&row.id).unwrap_or_default();
                row.into_order(items)
            })
            .collect();

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total_items as u64),
        })
    }

    fn validate_items(items: &[PurchaseOrderItemInput]) -> AppResult<()> {
        if let Err(message) = validate_items_not_empty(items.len()) {
            return Err(AppError::validation("items", message));
        }
        for item in items {
            if let Err(message) = validate_quantity(item.quantity) {
                return Err(AppError::validation("quantity", message));
            }
            if let Err(message) = validate_price(item.unit_cost) {
                return Err(AppError::validation("unit_cost", message));
            }
        }
        Ok(())
    }

    async fn insert_items(
        tx: &mut Transaction<'_, Postgres>,
        order_id: i64,
        items: &[PurchaseOrderItemInput],
    ) -> AppResult<Vec<PurchaseOrderItem>> {
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query_as::<_, PurchaseOrderItem>(
                r#"
                INSERT INTO purchase_order_items
                    (purchase_order_id, product_id, quantity, unit_cost, line_total)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, purchase_order_id, product_id, quantity, unit_cost, line_total
                "#,
            )
            .bind(order_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_cost)
            .bind(shared::line_total(item.quantity, item.unit_cost))
            .fetch_one(&mut **tx)
            .await?;
            rows.push(row);
        }
        Ok(rows)
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        order_id: i64,
    ) -> AppResult<PurchaseOrderRow> {
        sqlx::query_as::<_, PurchaseOrderRow>(
            r#"
            SELECT id, tenant_id, po_number, supplier_name, status, total_amount,
                   remarks, created_by, created_at, updated_at, received_at, cancelled_at
            FROM purchase_orders
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))
    }

    async fn fetch_items<'e, E>(executor: E, order_id: i64) -> AppResult<Vec<PurchaseOrderItem>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let items = sqlx::query_as::<_, PurchaseOrderItem>(
            "SELECT id, purchase_order_id, product_id, quantity, unit_cost, line_total \
             FROM purchase_order_items WHERE purchase_order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(executor)
        .await?;
        Ok(items)
    }
}
