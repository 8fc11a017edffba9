//! Sales orders
//!
//! A pure status machine with no stock effects. Order lines track ordered
//! and dispatched quantities; the dispatched side is maintained by the
//! delivery challan engine as challans against the order move. Orders are
//! created directly or cut from an accepted quotation.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use shared::{
    compute_totals, line_total, standard_gst_rate, validate_gst_rate, validate_items_not_empty,
    validate_price, validate_quantity, DocumentKind, DocumentTotals, PaginatedResponse,
    Pagination, PaginationMeta,
};

use crate::error::{AppError, AppResult};
use crate::services::numbering::DocumentNumbers;
use crate::services::quotation::QuotationStatus;
use crate::services::settings::ConfigProvider;

/// Sales order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SalesOrderStatus {
    Draft,
    Confirmed,
    Cancelled,
}

impl SalesOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalesOrderStatus::Draft => "draft",
            SalesOrderStatus::Confirmed => "confirmed",
            SalesOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(SalesOrderStatus::Draft),
            "confirmed" => Some(SalesOrderStatus::Confirmed),
            "cancelled" => Some(SalesOrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Allowed lifecycle transitions. Any live state can be cancelled.
    pub fn can_transition_to(&self, next: SalesOrderStatus) -> bool {
        matches!(
            (*self, next),
            (SalesOrderStatus::Draft, SalesOrderStatus::Confirmed)
                | (SalesOrderStatus::Draft, SalesOrderStatus::Cancelled)
                | (SalesOrderStatus::Confirmed, SalesOrderStatus::Cancelled)
        )
    }
}

/// A sales order with its lines.
#[derive(Debug, Clone, Serialize)]
pub struct SalesOrder {
    pub id: i64,
    pub tenant_id: Uuid,
    pub so_number: String,
    pub customer_id: i64,
    pub quotation_id: Option<i64>,
    pub status: SalesOrderStatus,
    pub total_before_tax: Decimal,
    pub total_tax: Decimal,
    pub total_amount: Decimal,
    pub remarks: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub items: Vec<SalesOrderItem>,
}

/// One order line with fulfilment tracking.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SalesOrderItem {
    pub id: i64,
    pub sales_order_id: i64,
    pub product_id: i64,
    pub ordered_qty: i64,
    pub dispatched_qty: i64,
    pub price: Decimal,
    pub tax_rate: Decimal,
    pub line_total: Decimal,
}

/// Input line for a sales order. When `tax_rate` is omitted the product's
/// GST rate is applied.
#[derive(Debug, Clone, Deserialize)]
pub struct SalesOrderItemInput {
    pub product_id: i64,
    pub quantity: i64,
    pub price: Decimal,
    pub tax_rate: Option<Decimal>,
}

/// Input for creating a sales order
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSalesOrderInput {
    pub customer_id: i64,
    pub remarks: Option<String>,
    pub items: Vec<SalesOrderItemInput>,
}

/// Input for updating a draft order
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSalesOrderInput {
    pub customer_id: Option<i64>,
    pub remarks: Option<String>,
    pub items: Option<Vec<SalesOrderItemInput>>,
}

/// Filters for listing orders
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SalesOrderFilter {
    pub status: Option<SalesOrderStatus>,
    pub customer_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(sqlx::FromRow)]
struct SalesOrderRow {
    id: i64,
    tenant_id: Uuid,
    so_number: String,
    customer_id: i64,
    quotation_id: Option<i64>,
    status: SalesOrderStatus,
    total_before_tax: Decimal,
    total_tax: Decimal,
    total_amount: Decimal,
    remarks: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl SalesOrderRow {
    fn into_order(self, items: Vec<SalesOrderItem>) -> SalesOrder {
        SalesOrder {
            id: self.id,
            tenant_id: self.tenant_id,
            so_number: self.so_number,
            customer_id: self.customer_id,
            quotation_id: self.quotation_id,
            status: self.status,
            total_before_tax: self.total_before_tax,
            total_tax: self.total_tax,
            total_amount: self.total_amount,
            remarks: self.remarks,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            confirmed_at: self.confirmed_at,
            cancelled_at: self.cancelled_at,
            items,
        }
    }
}

/// An order line with its tax rate settled.
struct ResolvedOrderLine {
    product_id: i64,
    quantity: i64,
    price: Decimal,
    tax_rate: Decimal,
}

/// Service for sales orders
#[derive(Clone)]
pub struct SalesOrderService {
    db: PgPool,
    numbers: DocumentNumbers,
}

impl SalesOrderService {
    pub fn new(db: PgPool, config: Arc<dyn ConfigProvider>) -> Self {
        let numbers = DocumentNumbers::new(config);
        Self { db, numbers }
    }

    /// Create a draft order.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        input: CreateSalesOrderInput,
    ) -> AppResult<SalesOrder> {
        Self::validate_items(&input.items)?;
        let lines = self.resolve_lines(tenant_id, &input.items).await?;
        let totals = Self::totals_for(&lines);

        let spec = self
            .numbers
            .series_spec(tenant_id, DocumentKind::SalesOrder)
            .await?;

        let mut tx = self.db.begin().await?;

        let value =
            DocumentNumbers::next_value(&mut tx, tenant_id, DocumentKind::SalesOrder).await?;
        let so_number = spec.format(value);

        let row = Self::insert_header(
            &mut tx,
            tenant_id,
            &so_number,
            input.customer_id,
            None,
            &totals,
            input.remarks.as_deref(),
            user_id,
        )
        .await?;

        let items = Self::insert_items(&mut tx, row.id, &lines).await?;

        tx.commit().await?;

        Ok(row.into_order(items))
    }

    /// Cut a sales order from an accepted quotation. Lines are copied at the
    /// quoted unit prices with the standard GST rate applied; the quotation
    /// stays accepted so further orders can be cut from it.
    pub async fn create_from_quotation(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        quotation_id: i64,
    ) -> AppResult<SalesOrder> {
        let spec = self
            .numbers
            .series_spec(tenant_id, DocumentKind::SalesOrder)
            .await?;

        let mut tx = self.db.begin().await?;

        let quotation = sqlx::query_as::<_, (i64, i64, QuotationStatus, Option<String>)>(
            r#"
            SELECT id, customer_id, status, remarks
            FROM quotations
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(quotation_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Quotation".to_string()))?;

        if quotation.2 != QuotationStatus::Accepted {
            return Err(AppError::InvalidStateTransition(format!(
                "Only accepted quotations can be converted, not '{}'",
                quotation.2.as_str()
            )));
        }

        let quoted = sqlx::query_as::<_, (i64, i64, Decimal)>(
            "SELECT product_id, quantity, unit_price FROM quotation_items \
             WHERE quotation_id = $1 ORDER BY id",
        )
        .bind(quotation_id)
        .fetch_all(&mut *tx)
        .await?;

        if quoted.is_empty() {
            return Err(AppError::ValidationError(
                "Quotation has no items to convert".to_string(),
            ));
        }

        let lines: Vec<ResolvedOrderLine> = quoted
            .into_iter()
            .map(|(product_id, quantity, unit_price)| ResolvedOrderLine {
                product_id,
                quantity,
                price: unit_price,
                tax_rate: standard_gst_rate(),
            })
            .collect();
        let totals = Self::totals_for(&lines);

        let value =
            DocumentNumbers::next_value(&mut tx, tenant_id, DocumentKind::SalesOrder).await?;
        let so_number = spec.format(value);

        let row = Self::insert_header(
            &mut tx,
            tenant_id,
            &so_number,
            quotation.1,
            Some(quotation.0),
            &totals,
            quotation.3.as_deref(),
            user_id,
        )
        .await?;

        let items = Self::insert_items(&mut tx, row.id, &lines).await?;

        tx.commit().await?;

        Ok(row.into_order(items))
    }

    /// Confirm a draft order, freezing its lines for fulfilment.
    pub async fn confirm(&self, tenant_id: Uuid, order_id: i64) -> AppResult<SalesOrder> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, order_id).await?;
        if !row.status.can_transition_to(SalesOrderStatus::Confirmed) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot confirm sales order in '{}' status",
                row.status.as_str()
            )));
        }

        let row = sqlx::query_as::<_, SalesOrderRow>(
            r#"
            UPDATE sales_orders
            SET status = 'confirmed', confirmed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, so_number, customer_id, quotation_id, status,
                      total_before_tax, total_tax, total_amount, remarks, created_by,
                      created_at, updated_at, confirmed_at, cancelled_at
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

    /// Cancel an order in any live state. No stock is touched; challans
    /// already cut against the order keep their own lifecycles.
    pub async fn cancel(&self, tenant_id: Uuid, order_id: i64) -> AppResult<SalesOrder> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, order_id).await?;
        if !row.status.can_transition_to(SalesOrderStatus::Cancelled) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot cancel sales order in '{}' status",
                row.status.as_str()
            )));
        }

        let row = sqlx::query_as::<_, SalesOrderRow>(
            r#"
            UPDATE sales_orders
            SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, so_number, customer_id, quotation_id, status,
                      total_before_tax, total_tax, total_amount, remarks, created_by,
                      created_at, updated_at, confirmed_at, cancelled_at
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

    /// Replace the mutable fields of a draft order.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        order_id: i64,
        input: UpdateSalesOrderInput,
    ) -> AppResult<SalesOrder> {
        let new_lines = match &input.items {
            Some(items) => {
                Self::validate_items(items)?;
                Some(self.resolve_lines(tenant_id, items).await?)
            }
            None => None,
        };

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, order_id).await?;
        if row.status != SalesOrderStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft sales orders can be edited".to_string(),
            ));
        }

        let items = match new_lines {
            Some(lines) => {
                sqlx::query("DELETE FROM sales_order_items WHERE sales_order_id = $1")
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
                Self::insert_items(&mut tx, row.id, &lines).await?
            }
            None => Self::fetch_items(&mut *tx, row.id).await?,
        };

        let totals = compute_totals(items.iter().map(|i| (i.ordered_qty, i.price, i.tax_rate)));

        let row = sqlx::query_as::<_, SalesOrderRow>(
            r#"
            UPDATE sales_orders
            SET customer_id = COALESCE($3, customer_id),
                remarks = COALESCE($4, remarks),
                total_before_tax = $5,
                total_tax = $6,
                total_amount = $7,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, so_number, customer_id, quotation_id, status,
                      total_before_tax, total_tax, total_amount, remarks, created_by,
                      created_at, updated_at, confirmed_at, cancelled_at
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .bind(input.customer_id)
        .bind(&input.remarks)
        .bind(totals.total_before_tax)
        .bind(totals.total_tax)
        .bind(totals.total_amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_order(items))
    }

    /// Delete a draft order and its lines.
    pub async fn remove(&self, tenant_id: Uuid, order_id: i64) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, order_id).await?;
        if row.status != SalesOrderStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft sales orders can be deleted".to_string(),
            ));
        }

        sqlx::query("DELETE FROM sales_orders WHERE id = $1 AND tenant_id = $2")
            .bind(order_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Fetch one order with its lines.
    pub async fn find_one(&self, tenant_id: Uuid, order_id: i64) -> AppResult<SalesOrder> {
        let row = sqlx::query_as::<_, SalesOrderRow>(
            r#"
            SELECT id, tenant_id, so_number, customer_id, quotation_id, status,
                   total_before_tax, total_tax, total_amount, remarks, created_by,
                   created_at, updated_at, confirmed_at, cancelled_at
            FROM sales_orders
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Sales order".to_string()))?;

        let items = Self::fetch_items(&self.db, row.id).await?;

        Ok(row.into_order(items))
    }

    /// List orders matching the filters, newest first.
    pub async fn find_all(
        &self,
        tenant_id: Uuid,
        filter: SalesOrderFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<SalesOrder>> {
        let total_items = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM sales_orders
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR status = $2)
              AND ($3::BIGINT IS NULL OR customer_id = $3)
              AND ($4::DATE IS NULL OR created_at::DATE >= $4)
              AND ($5::DATE IS NULL OR created_at::DATE <= $5)
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status)
        .bind(filter.customer_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, SalesOrderRow>(
            r#"
            SELECT id, tenant_id, so_number, customer_id, quotation_id, status,
                   total_before_tax, total_tax, total_amount, remarks, created_by,
                   created_at, updated_at, confirmed_at, cancelled_at
            FROM sales_orders
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR status = $2)
              AND ($3::BIGINT IS NULL OR customer_id = $3)
              AND ($4::DATE IS NULL OR created_at::DATE >= $4)
              AND ($5::DATE IS NULL OR created_at::DATE <= $5)
            ORDER BY id DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status)
        .bind(filter.customer_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut by_order: HashMap<i64, Vec<SalesOrderItem>> = HashMap::new();

        if !ids.is_empty() {
            let items = sqlx::query_as::<_, SalesOrderItem>(
                "SELECT id, sales_order_id, product_id, ordered_qty, dispatched_qty, \
                 price, tax_rate, line_total \
                 FROM sales_order_items WHERE sales_order_id = ANY($1) ORDER BY id",
            )
            .bind(&ids)
            .fetch_all(&self.db)
            .await?;

            for item in items {
                by_order.entry(item.sales_order_id).or_default().push(item);
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

    fn validate_items(items: &[SalesOrderItemInput]) -> AppResult<()> {
        if let Err(message) = validate_items_not_empty(items.len()) {
            return Err(AppError::validation("items", message));
        }
        for item in items {
            if let Err(message) = validate_quantity(item.quantity) {
                return Err(AppError::validation("quantity", message));
            }
            if let Err(message) = validate_price(item.price) {
                return Err(AppError::validation("price", message));
            }
            if let Some(tax_rate) = item.tax_rate {
                if let Err(message) = validate_gst_rate(tax_rate) {
                    return Err(AppError::validation("tax_rate", message));
                }
            }
        }
        Ok(())
    }

    /// Settle each line's tax rate, defaulting to the product's GST rate.
    /// Doubles as the product existence check.
    async fn resolve_lines(
        &self,
        tenant_id: Uuid,
        items: &[SalesOrderItemInput],
    ) -> AppResult<Vec<ResolvedOrderLine>> {
        let mut distinct: Vec<i64> = items.iter().map(|i| i.product_id).collect();
        distinct.sort_unstable();
        distinct.dedup();

        let rates: HashMap<i64, Decimal> = sqlx::query_as::<_, (i64, Decimal)>(
            "SELECT id, gst_rate FROM products WHERE tenant_id = $1 AND id = ANY($2)",
        )
        .bind(tenant_id)
        .bind(&distinct)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .collect();

        if rates.len() != distinct.len() {
            return Err(AppError::NotFound("Product".to_string()));
        }

        Ok(items
            .iter()
            .map(|item| ResolvedOrderLine {
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
                tax_rate: item.tax_rate.unwrap_or(rates[&item.product_id]),
            })
            .collect())
    }

    fn totals_for(lines: &[ResolvedOrderLine]) -> DocumentTotals {
        compute_totals(lines.iter().map(|l| (l.quantity, l.price, l.tax_rate)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_header(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        so_number: &str,
        customer_id: i64,
        quotation_id: Option<i64>,
        totals: &DocumentTotals,
        remarks: Option<&str>,
        user_id: Uuid,
    ) -> AppResult<SalesOrderRow> {
        let row = sqlx::query_as::<_, SalesOrderRow>(
            r#"
            INSERT INTO sales_orders
                (tenant_id, so_number, customer_id, quotation_id, status, total_before_tax,
                 total_tax, total_amount, remarks, created_by)
            VALUES ($1, $2, $3, $4, 'draft', $5, $6, $7, $8, $9)
            RETURNING id, tenant_id, so_number, customer_id, quotation_id, status,
                      total_before_tax, total_tax, total_amount, remarks, created_by,
                      created_at, updated_at, confirmed_at, cancelled_at
            "#,
        )
        .bind(tenant_id)
        .bind(so_number)
        .bind(customer_id)
        .bind(quotation_id)
        .bind(totals.total_before_tax)
        .bind(totals.total_tax)
        .bind(totals.total_amount)
        .bind(remarks)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    async fn insert_items(
        tx: &mut Transaction<'_, Postgres>,
        order_id: i64,
        lines: &[ResolvedOrderLine],
    ) -> AppResult<Vec<SalesOrderItem>> {
        let mut rows = Vec::with_capacity(lines.len());
        for line in lines {
            let row = sqlx::query_as::<_, SalesOrderItem>(
                r#"
                INSERT INTO sales_order_items
                    (sales_order_id, product_id, ordered_qty, price, tax_rate, line_total)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, sales_order_id, product_id, ordered_qty, dispatched_qty,
                          price, tax_rate, line_total
                "#,
            )
            .bind(order_id)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(line.price)
            .bind(line.tax_rate)
            .bind(line_total(line.quantity, line.price))
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
    ) -> AppResult<SalesOrderRow> {
        sqlx::query_as::<_, SalesOrderRow>(
            r#"
            SELECT id, tenant_id, so_number, customer_id, quotation_id, status,
                   total_before_tax, total_tax, total_amount, remarks, created_by,
                   created_at, updated_at, confirmed_at, cancelled_at
            FROM sales_orders
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Sales order".to_string()))
    }

    async fn fetch_items<'e, E>(executor: E, order_id: i64) -> AppResult<Vec<SalesOrderItem>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let items = sqlx::query_as::<_, SalesOrderItem>(
            "SELECT id, sales_order_id, product_id, ordered_qty, dispatched_qty, \
             price, tax_rate, line_total \
             FROM sales_order_items WHERE sales_order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(executor)
        .await?;
        Ok(items)
    }
}
