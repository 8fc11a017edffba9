//! Delivery challans
//!
//! Challans cover goods leaving a warehouse: customer deliveries (`so`),
//! inter-warehouse moves (`transfer`), and everything else (`other`). Stock
//! moves exactly once, at dispatch; cancelling a dispatched challan applies
//! the exact inverse movements. A challan that has been invoiced can no
//! longer be cancelled until the invoice releases it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use shared::{
    dispatch_plan, invert_plan, remaining_quantity, validate_items_not_empty, validate_quantity,
    DocumentKind, PaginatedResponse, Pagination, PaginationMeta,
};

use crate::error::{AppError, AppResult};
use crate::services::catalog::{ensure_products_exist, ensure_warehouse_exists};
use crate::services::numbering::DocumentNumbers;
use crate::services::sales_order::SalesOrderStatus;
use crate::services::settings::ConfigProvider;
use crate::services::stock::{StockRefType, StockService};

/// Delivery challan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChallanStatus {
    Draft,
    Dispatched,
    Invoiced,
    Cancelled,
}

impl ChallanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallanStatus::Draft => "draft",
            ChallanStatus::Dispatched => "dispatched",
            ChallanStatus::Invoiced => "invoiced",
            ChallanStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ChallanStatus::Draft),
            "dispatched" => Some(ChallanStatus::Dispatched),
            "invoiced" => Some(ChallanStatus::Invoiced),
            "cancelled" => Some(ChallanStatus::Cancelled),
            _ => None,
        }
    }

    /// Allowed lifecycle transitions. The move to `invoiced` is driven by
    /// the invoice engine; an invoiced challan cannot be cancelled here.
    pub fn can_transition_to(&self, next: ChallanStatus) -> bool {
        matches!(
            (*self, next),
            (ChallanStatus::Draft, ChallanStatus::Dispatched)
                | (ChallanStatus::Draft, ChallanStatus::Cancelled)
                | (ChallanStatus::Dispatched, ChallanStatus::Invoiced)
                | (ChallanStatus::Dispatched, ChallanStatus::Cancelled)
        )
    }
}

/// What kind of outward movement the challan records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChallanType {
    So,
    Transfer,
    Other,
}

impl ChallanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallanType::So => "so",
            ChallanType::Transfer => "transfer",
            ChallanType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "so" => Some(ChallanType::So),
            "transfer" => Some(ChallanType::Transfer),
            "other" => Some(ChallanType::Other),
            _ => None,
        }
    }
}

/// A delivery challan with its lines.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryChallan {
    pub id: i64,
    pub tenant_id: Uuid,
    pub challan_number: String,
    pub challan_type: ChallanType,
    pub from_warehouse_id: i64,
    pub to_warehouse_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub sales_order_id: Option<i64>,
    pub status: ChallanStatus,
    pub vehicle_no: Option<String>,
    pub remarks: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub items: Vec<ChallanItem>,
}

/// One challan line. Challans carry quantities only; money lives on the
/// invoice.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChallanItem {
    pub id: i64,
    pub challan_id: i64,
    pub product_id: i64,
    pub quantity: i64,
}

/// Input line for a challan
#[derive(Debug, Clone, Deserialize)]
pub struct ChallanItemInput {
    pub product_id: i64,
    pub quantity: i64,
}

/// Input for creating a delivery challan
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChallanInput {
    pub challan_type: ChallanType,
    pub from_warehouse_id: i64,
    pub to_warehouse_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub sales_order_id: Option<i64>,
    pub vehicle_no: Option<String>,
    pub remarks: Option<String>,
    pub items: Vec<ChallanItemInput>,
}

/// Input for cutting a challan from a confirmed sales order
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChallanFromOrderInput {
    pub from_warehouse_id: i64,
    pub vehicle_no: Option<String>,
    pub remarks: Option<String>,
}

/// Input for updating a draft challan
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateChallanInput {
    pub vehicle_no: Option<String>,
    pub remarks: Option<String>,
    pub items: Option<Vec<ChallanItemInput>>,
}

/// Filters for listing challans
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallanFilter {
    pub status: Option<ChallanStatus>,
    pub challan_type: Option<ChallanType>,
    pub customer_id: Option<i64>,
    pub sales_order_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(sqlx::FromRow)]
struct ChallanRow {
    id: i64,
    tenant_id: Uuid,
    challan_number: String,
    challan_type: ChallanType,
    from_warehouse_id: i64,
    to_warehouse_id: Option<i64>,
    customer_id: Option<i64>,
    sales_order_id: Option<i64>,
    status: ChallanStatus,
    vehicle_no: Option<String>,
    remarks: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl ChallanRow {
    fn into_challan(self, items: Vec<ChallanItem>) -> DeliveryChallan {
        DeliveryChallan {
            id: self.id,
            tenant_id: self.tenant_id,
            challan_number: self.challan_number,
            challan_type: self.challan_type,
            from_warehouse_id: self.from_warehouse_id,
            to_warehouse_id: self.to_warehouse_id,
            customer_id: self.customer_id,
            sales_order_id: self.sales_order_id,
            status: self.status,
            vehicle_no: self.vehicle_no,
            remarks: self.remarks,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            dispatched_at: self.dispatched_at,
            cancelled_at: self.cancelled_at,
            items,
        }
    }
}

/// Service for delivery challans
#[derive(Clone)]
pub struct DeliveryChallanService {
    db: PgPool,
    config: Arc<dyn ConfigProvider>,
    numbers: DocumentNumbers,
}

impl DeliveryChallanService {
    pub fn new(db: PgPool, config: Arc<dyn ConfigProvider>) -> Self {
        let numbers = DocumentNumbers::new(config.clone());
        Self {
            db,
            config,
            numbers,
        }
    }

    /// Create a draft challan. No stock moves until dispatch.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        input: CreateChallanInput,
    ) -> AppResult<DeliveryChallan> {
        Self::validate_items(&input.items)?;

        if input.challan_type == ChallanType::Transfer {
            match input.to_warehouse_id {
                None => {
                    return Err(AppError::validation(
                        "to_warehouse_id",
                        "Transfer challans require a destination warehouse",
                    ));
                }
                Some(to) if to == input.from_warehouse_id => {
                    return Err(AppError::validation(
                        "to_warehouse_id",
                        "Destination warehouse must differ from the source",
                    ));
                }
                Some(_) => {}
            }
        }

        if input.challan_type == ChallanType::So
            && input.sales_order_id.is_none()
            && self.config.require_sales_order_for_dc(tenant_id).await?
        {
            return Err(AppError::ValidationError(
                "A sales order reference is required for customer challans".to_string(),
            ));
        }

        ensure_warehouse_exists(&self.db, tenant_id, input.from_warehouse_id).await?;
        if let Some(to) = input.to_warehouse_id {
            ensure_warehouse_exists(&self.db, tenant_id, to).await?;
        }

        let product_ids: Vec<i64> = input.items.iter().map(|i| i.product_id).collect();
        ensure_products_exist(&self.db, tenant_id, &product_ids).await?;

        if let Some(order_id) = input.sales_order_id {
            let order_exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sales_orders WHERE id = $1 AND tenant_id = $2)",
            )
            .bind(order_id)
            .bind(tenant_id)
            .fetch_one(&self.db)
            .await?;
            if !order_exists {
                return Err(AppError::NotFound("Sales order".to_string()));
            }
        }

        let spec = self
            .numbers
            .series_spec(tenant_id, DocumentKind::DeliveryChallan)
            .await?;

        let mut tx = self.db.begin().await?;

        let value =
            DocumentNumbers::next_value(&mut tx, tenant_id, DocumentKind::DeliveryChallan).await?;
        let challan_number = spec.format(value);

        let row = sqlx::query_as::<_, ChallanRow>(
            r#"
            INSERT INTO delivery_challans
                (tenant_id, challan_number, challan_type, from_warehouse_id, to_warehouse_id,
                 customer_id, sales_order_id, status, vehicle_no, remarks, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'draft', $8, $9, $10)
            RETURNING id, tenant_id, challan_number, challan_type, from_warehouse_id,
                      to_warehouse_id, customer_id, sales_order_id, status, vehicle_no,
                      remarks, created_by, created_at, updated_at, dispatched_at, cancelled_at
            "#,
        )
        .bind(tenant_id)
        .bind(&challan_number)
        .bind(input.challan_type)
        .bind(input.from_warehouse_id)
        .bind(input.to_warehouse_id)
        .bind(input.customer_id)
        .bind(input.sales_order_id)
        .bind(&input.vehicle_no)
        .bind(&input.remarks)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let lines: Vec<(i64, i64)> = input
            .items
            .iter()
            .map(|i| (i.product_id, i.quantity))
            .collect();
        let items = Self::insert_items(&mut tx, row.id, &lines).await?;

        tx.commit().await?;

        Ok(row.into_challan(items))
    }

    /// Cut a draft challan from a confirmed sales order, carrying the
    /// undispatched remainder of every order line.
    pub async fn create_from_order(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        order_id: i64,
        input: CreateChallanFromOrderInput,
    ) -> AppResult<DeliveryChallan> {
        ensure_warehouse_exists(&self.db, tenant_id, input.from_warehouse_id).await?;

        let spec = self
            .numbers
            .series_spec(tenant_id, DocumentKind::DeliveryChallan)
            .await?;

        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, (i64, i64, SalesOrderStatus)>(
            r#"
            SELECT id, customer_id, status
            FROM sales_orders
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Sales order".to_string()))?;

        if order.2 != SalesOrderStatus::Confirmed {
            return Err(AppError::InvalidStateTransition(format!(
                "Only confirmed sales orders can be dispatched against, not '{}'",
                order.2.as_str()
            )));
        }

        let order_lines = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT product_id, ordered_qty, dispatched_qty FROM sales_order_items \
             WHERE sales_order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        let lines: Vec<(i64, i64)> = order_lines
            .into_iter()
            .filter_map(|(product_id, ordered, dispatched)| {
                let remaining = remaining_quantity(ordered, dispatched);
                (remaining > 0).then_some((product_id, remaining))
            })
            .collect();

        if lines.is_empty() {
            return Err(AppError::ValidationError(
                "Order is fully dispatched".to_string(),
            ));
        }

        let value =
            DocumentNumbers::next_value(&mut tx, tenant_id, DocumentKind::DeliveryChallan).await?;
        let challan_number = spec.format(value);

        let row = sqlx::query_as::<_, ChallanRow>(
            r#"
            INSERT INTO delivery_challans
                (tenant_id, challan_number, challan_type, from_warehouse_id, to_warehouse_id,
                 customer_id, sales_order_id, status, vehicle_no, remarks, created_by)
            VALUES ($1, $2, 'so', $3, NULL, $4, $5, 'draft', $6, $7, $8)
            RETURNING id, tenant_id, challan_number, challan_type, from_warehouse_id,
                      to_warehouse_id, customer_id, sales_order_id, status, vehicle_no,
                      remarks, created_by, created_at, updated_at, dispatched_at, cancelled_at
            "#,
        )
        .bind(tenant_id)
        .bind(&challan_number)
        .bind(input.from_warehouse_id)
        .bind(order.1)
        .bind(order.0)
        .bind(&input.vehicle_no)
        .bind(&input.remarks)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let items = Self::insert_items(&mut tx, row.id, &lines).await?;

        tx.commit().await?;

        Ok(row.into_challan(items))
    }

    /// Dispatch a draft challan, moving its quantities out of stock. For
    /// transfer challans the destination warehouse is credited in the same
    /// transaction; for order-linked challans the order's dispatched
    /// quantities are advanced.
    pub async fn dispatch(&self, tenant_id: Uuid, challan_id: i64) -> AppResult<DeliveryChallan> {
        let allow_negative = self.config.allow_negative_stock(tenant_id).await?;

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, challan_id).await?;
        if !row.status.can_transition_to(ChallanStatus::Dispatched) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot dispatch challan in '{}' status",
                row.status.as_str()
            )));
        }

        let items = Self::fetch_items(&mut *tx, row.id).await?;
        let lines: Vec<(i64, i64)> = items.iter().map(|i| (i.product_id, i.quantity)).collect();

        let to_warehouse = match row.challan_type {
            ChallanType::Transfer => row.to_warehouse_id,
            _ => None,
        };
        let plan = dispatch_plan(row.from_warehouse_id, to_warehouse, &lines);

        StockService::apply_plan(
            &mut tx,
            tenant_id,
            &plan,
            StockRefType::DeliveryChallan,
            row.id,
            Utc::now().date_naive(),
            allow_negative,
        )
        .await?;

        if let Some(order_id) = row.sales_order_id {
            Self::shift_order_dispatched(&mut tx, order_id, &lines, 1).await?;
        }

        let row = sqlx::query_as::<_, ChallanRow>(
            r#"
            UPDATE delivery_challans
            SET status = 'dispatched', dispatched_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, challan_number, challan_type, from_warehouse_id,
                      to_warehouse_id, customer_id, sales_order_id, status, vehicle_no,
                      remarks, created_by, created_at, updated_at, dispatched_at, cancelled_at
            "#,
        )
        .bind(challan_id)
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Challan {} dispatched: {} lines out of warehouse {}",
            row.challan_number,
            items.len(),
            row.from_warehouse_id
        );

        Ok(row.into_challan(items))
    }

    /// Cancel a challan. A dispatched challan has its stock movements
    /// exactly inverted and, when order-linked, the dispatched quantities
    /// handed back to the order.
    pub async fn cancel(&self, tenant_id: Uuid, challan_id: i64) -> AppResult<DeliveryChallan> {
        let allow_negative = self.config.allow_negative_stock(tenant_id).await?;

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, challan_id).await?;
        if !row.status.can_transition_to(ChallanStatus::Cancelled) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot cancel challan in '{}' status",
                row.status.as_str()
            )));
        }

        let items = Self::fetch_items(&mut *tx, row.id).await?;
        let was_dispatched = row.status == ChallanStatus::Dispatched;

        if was_dispatched {
            let lines: Vec<(i64, i64)> = items.iter().map(|i| (i.product_id, i.quantity)).collect();
            let to_warehouse = match row.challan_type {
                ChallanType::Transfer => row.to_warehouse_id,
                _ => None,
            };
            let plan = invert_plan(&dispatch_plan(row.from_warehouse_id, to_warehouse, &lines));

            StockService::apply_plan(
                &mut tx,
                tenant_id,
                &plan,
                StockRefType::DeliveryChallan,
                row.id,
                Utc::now().date_naive(),
                allow_negative,
            )
            .await?;

            if let Some(order_id) = row.sales_order_id {
                Self::shift_order_dispatched(&mut tx, order_id, &lines, -1).await?;
            }
        }

        let row = sqlx::query_as::<_, ChallanRow>(
            r#"
            UPDATE delivery_challans
            SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, challan_number, challan_type, from_warehouse_id,
                      to_warehouse_id, customer_id, sales_order_id, status, vehicle_no,
                      remarks, created_by, created_at, updated_at, dispatched_at, cancelled_at
            "#,
        )
        .bind(challan_id)
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if was_dispatched {
            tracing::info!(
                "Challan {} cancelled, stock effect reversed",
                row.challan_number
            );
        }

        Ok(row.into_challan(items))
    }

    /// Replace the mutable fields of a draft challan.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        challan_id: i64,
        input: UpdateChallanInput,
    ) -> AppResult<DeliveryChallan> {
        if let Some(items) = &input.items {
            Self::validate_items(items)?;
            let product_ids: Vec<i64> = items.iter().map(|i| i.product_id).collect();
            ensure_products_exist(&self.db, tenant_id, &product_ids).await?;
        }

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, challan_id).await?;
        if row.status != ChallanStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft challans can be edited".to_string(),
            ));
        }

        let items = match &input.items {
            Some(new_items) => {
                sqlx::query("DELETE FROM challan_items WHERE challan_id = $1")
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
                let lines: Vec<(i64, i64)> = new_items
                    .iter()
                    .map(|i| (i.product_id, i.quantity))
                    .collect();
                Self::insert_items(&mut tx, row.id, &lines).await?
            }
            None => Self::fetch_items(&mut *tx, row.id).await?,
        };

        let row = sqlx::query_as::<_, ChallanRow>(
            r#"
            UPDATE delivery_challans
            SET vehicle_no = COALESCE($3, vehicle_no),
                remarks = COALESCE($4, remarks),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, challan_number, challan_type, from_warehouse_id,
                      to_warehouse_id, customer_id, sales_order_id, status, vehicle_no,
                      remarks, created_by, created_at, updated_at, dispatched_at, cancelled_at
            "#,
        )
        .bind(challan_id)
        .bind(tenant_id)
        .bind(&input.vehicle_no)
        .bind(&input.remarks)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_challan(items))
    }

    /// Delete a draft challan and its lines.
    pub async fn remove(&self, tenant_id: Uuid, challan_id: i64) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, challan_id).await?;
        if row.status != ChallanStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft challans can be deleted".to_string(),
            ));
        }

        sqlx::query("DELETE FROM delivery_challans WHERE id = $1 AND tenant_id = $2")
            .bind(challan_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Fetch one challan with its lines.
    pub async fn find_one(&self, tenant_id: Uuid, challan_id: i64) -> AppResult<DeliveryChallan> {
        let row = sqlx::query_as::<_, ChallanRow>(
            r#"
            SELECT id, tenant_id, challan_number, challan_type, from_warehouse_id,
                   to_warehouse_id, customer_id, sales_order_id, status, vehicle_no,
                   remarks, created_by, created_at, updated_at, dispatched_at, cancelled_at
            FROM delivery_challans
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(challan_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery challan".to_string()))?;

        let items = Self::fetch_items(&self.db, row.id).await?;

        Ok(row.into_challan(items))
    }

    /// List challans matching the filters, newest first.
    pub async fn find_all(
        &self,
        tenant_id: Uuid,
        filter: ChallanFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<DeliveryChallan>> {
        let total_items = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM delivery_challans
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR status = $2)
              AND ($3::VARCHAR IS NULL OR challan_type = $3)
              AND ($4::BIGINT IS NULL OR customer_id = $4)
              AND ($5::BIGINT IS NULL OR sales_order_id = $5)
              AND ($6::DATE IS NULL OR created_at::DATE >= $6)
              AND ($7::DATE IS NULL OR created_at::DATE <= $7)
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status)
        .bind(filter.challan_type)
        .bind(filter.customer_id)
        .bind(filter.sales_order_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, ChallanRow>(
            r#"
            SELECT id, tenant_id, challan_number, challan_type, from_warehouse_id,
                   to_warehouse_id, customer_id, sales_order_id, status, vehicle_no,
                   remarks, created_by, created_at, updated_at, dispatched_at, cancelled_at
            FROM delivery_challans
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR status = $2)
              AND ($3::VARCHAR IS NULL OR challan_type = $3)
              AND ($4::BIGINT IS NULL OR customer_id = $4)
              AND ($5::BIGINT IS NULL OR sales_order_id = $5)
              AND ($6::DATE IS NULL OR created_at::DATE >= $6)
              AND ($7::DATE IS NULL OR created_at::DATE <= $7)
            ORDER BY id DESC
            LIMIT $8 OFFSET $9
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status)
        .bind(filter.challan_type)
        .bind(filter.customer_id)
        .bind(filter.sales_order_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut by_challan: HashMap<i64, Vec<ChallanItem>> = HashMap::new();

        if !ids.is_empty() {
            let items = sqlx::query_as::<_, ChallanItem>(
                "SELECT id, challan_id, product_id, quantity FROM challan_items \
                 WHERE challan_id = ANY($1) ORDER BY id",
            )
            .bind(&ids)
            .fetch_all(&self.db)
            .await?;

            for item in items {
                by_challan.entry(item.challan_id).or_default().push(item);
            }
        }

        let data = rows
            .into_iter()
            .map(|row| {
                let items = by_challan.remove(&row.id).unwrap_or_default();
                row.into_challan(items)
            })
            .collect();

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total_items as u64),
        })
    }

    fn validate_items(items: &[ChallanItemInput]) -> AppResult<()> {
        if let Err(message) = validate_items_not_empty(items.len()) {
            return Err(AppError::validation("items", message));
        }
        for item in items {
            if let Err(message) = validate_quantity(item.quantity) {
                return Err(AppError::validation("quantity", message));
            }
        }
        Ok(())
    }

    /// Move the linked order's dispatched quantities by `direction` times
    /// each line quantity. Lines without a matching order item are left
    /// alone.
    async fn shift_order_dispatched(
        tx: &mut Transaction<'_, Postgres>,
        order_id: i64,
        lines: &[(i64, i64)],
        direction: i64,
    ) -> AppResult<()> {
        for (product_id, quantity) in lines {
            sqlx::query(
                "UPDATE sales_order_items SET dispatched_qty = dispatched_qty + $3 \
                 WHERE sales_order_id = $1 AND product_id = $2",
            )
            .bind(order_id)
            .bind(product_id)
            .bind(quantity * direction)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        challan_id: i64,
    ) -> AppResult<ChallanRow> {
        sqlx::query_as::<_, ChallanRow>(
            r#"
            SELECT id, tenant_id, challan_number, challan_type, from_warehouse_id,
                   to_warehouse_id, customer_id, sales_order_id, status, vehicle_no,
                   remarks, created_by, created_at, updated_at, dispatched_at, cancelled_at
            FROM delivery_challans
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(challan_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery challan".to_string()))
    }

    async fn insert_items(
        tx: &mut Transaction<'_, Postgres>,
        challan_id: i64,
        lines: &[(i64, i64)],
    ) -> AppResult<Vec<ChallanItem>> {
        let mut rows = Vec::with_capacity(lines.len());
        for (product_id, quantity) in lines {
            let row = sqlx::query_as::<_, ChallanItem>(
                r#"
                INSERT INTO challan_items (challan_id, product_id, quantity)
                VALUES ($1, $2, $3)
                RETURNING id, challan_id, product_id, quantity
                "#,
            )
            .bind(challan_id)
            .bind(product_id)
            .bind(quantity)
            .fetch_one(&mut **tx)
            .await?;
            rows.push(row);
        }
        Ok(rows)
    }

    async fn fetch_items<'e, E>(executor: E, challan_id: i64) -> AppResult<Vec<ChallanItem>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let items = sqlx::query_as::<_, ChallanItem>(
            "SELECT id, challan_id, product_id, quantity FROM challan_items \
             WHERE challan_id = $1 ORDER BY id",
        )
        .bind(challan_id)
        .fetch_all(executor)
        .await?;
        Ok(items)
    }
}
