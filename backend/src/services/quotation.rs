//! Quotations
//!
//! A pure status machine with no stock effects. Totals are untaxed sums of
//! the quoted lines; GST enters only when an accepted quotation is converted
//! into a sales order.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use shared::{
    line_total, sum_line_totals, validate_items_not_empty, validate_price, validate_quantity,
    DocumentKind, PaginatedResponse, Pagination, PaginationMeta,
};

use crate::error::{AppError, AppResult};
use crate::services::catalog::ensure_products_exist;
use crate::services::numbering::DocumentNumbers;
use crate::services::settings::ConfigProvider;

/// Quotation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuotationStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Cancelled,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotationStatus::Draft => "draft",
            QuotationStatus::Sent => "sent",
            QuotationStatus::Accepted => "accepted",
            QuotationStatus::Rejected => "rejected",
            QuotationStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(QuotationStatus::Draft),
            "sent" => Some(QuotationStatus::Sent),
            "accepted" => Some(QuotationStatus::Accepted),
            "rejected" => Some(QuotationStatus::Rejected),
            "cancelled" => Some(QuotationStatus::Cancelled),
            _ => None,
        }
    }

    /// Allowed lifecycle transitions. Any live state can be cancelled.
    pub fn can_transition_to(&self, next: QuotationStatus) -> bool {
        if next == QuotationStatus::Cancelled {
            return *self != QuotationStatus::Cancelled;
        }
        matches!(
            (*self, next),
            (QuotationStatus::Draft, QuotationStatus::Sent)
                | (QuotationStatus::Sent, QuotationStatus::Accepted)
                | (QuotationStatus::Sent, QuotationStatus::Rejected)
        )
    }
}

/// A quotation with its lines.
#[derive(Debug, Clone, Serialize)]
pub struct Quotation {
    pub id: i64,
    pub tenant_id: Uuid,
    pub quotation_number: String,
    pub customer_id: i64,
    pub status: QuotationStatus,
    pub valid_until: Option<NaiveDate>,
    pub total_amount: Decimal,
    pub remarks: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<QuotationItem>,
}

/// One quoted line.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuotationItem {
    pub id: i64,
    pub quotation_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Input line for a quotation
#[derive(Debug, Clone, Deserialize)]
pub struct QuotationItemInput {
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// Input for creating a quotation
#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuotationInput {
    pub customer_id: i64,
    pub valid_until: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub items: Vec<QuotationItemInput>,
}

/// Input for updating a draft quotation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateQuotationInput {
    pub customer_id: Option<i64>,
    pub valid_until: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub items: Option<Vec<QuotationItemInput>>,
}

/// Filters for listing quotations
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotationFilter {
    pub status: Option<QuotationStatus>,
    pub customer_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(sqlx::FromRow)]
struct QuotationRow {
    id: i64,
    tenant_id: Uuid,
    quotation_number: String,
    customer_id: i64,
    status: QuotationStatus,
    valid_until: Option<NaiveDate>,
    total_amount: Decimal,
    remarks: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl QuotationRow {
    fn into_quotation(self, items: Vec<QuotationItem>) -> Quotation {
        Quotation {
            id: self.id,
            tenant_id: self.tenant_id,
            quotation_number: self.quotation_number,
            customer_id: self.customer_id,
            status: self.status,
            valid_until: self.valid_until,
            total_amount: self.total_amount,
            remarks: self.remarks,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items,
        }
    }
}

/// Service for quotations
#[derive(Clone)]
pub struct QuotationService {
    db: PgPool,
    numbers: DocumentNumbers,
}

impl QuotationService {
    pub fn new(db: PgPool, config: Arc<dyn ConfigProvider>) -> Self {
        let numbers = DocumentNumbers::new(config);
        Self { db, numbers }
    }

    /// Create a draft quotation.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        input: CreateQuotationInput,
    ) -> AppResult<Quotation> {
        Self::validate_items(&input.items)?;
        let product_ids: Vec<i64> = input.items.iter().map(|i| i.product_id).collect();
        ensure_products_exist(&self.db, tenant_id, &product_ids).await?;

        let total_amount = sum_line_totals(input.items.iter().map(|i| (i.quantity, i.unit_price)));
        let spec = self
            .numbers
            .series_spec(tenant_id, DocumentKind::Quotation)
            .await?;

        let mut tx = self.db.begin().await?;

        let value =
            DocumentNumbers::next_value(&mut tx, tenant_id, DocumentKind::Quotation).await?;
        let quotation_number = spec.format(value);

        let row = sqlx::query_as::<_, QuotationRow>(
            r#"
            INSERT INTO quotations
                (tenant_id, quotation_number, customer_id, status, valid_until, total_amount,
                 remarks, created_by)
            VALUES ($1, $2, $3, 'draft', $4, $5, $6, $7)
            RETURNING id, tenant_id, quotation_number, customer_id, status, valid_until,
                      total_amount, remarks, created_by, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(&quotation_number)
        .bind(input.customer_id)
        .bind(input.valid_until)
        .bind(total_amount)
        .bind(&input.remarks)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let items = Self::insert_items(&mut tx, row.id, &input.items).await?;

        tx.commit().await?;

        Ok(row.into_quotation(items))
    }

    /// Mark a draft quotation as sent to the customer.
    pub async fn send(&self, tenant_id: Uuid, quotation_id: i64) -> AppResult<Quotation> {
        self.transition(tenant_id, quotation_id, QuotationStatus::Sent)
            .await
    }

    /// Record customer acceptance of a sent quotation.
    pub async fn accept(&self, tenant_id: Uuid, quotation_id: i64) -> AppResult<Quotation> {
        self.transition(tenant_id, quotation_id, QuotationStatus::Accepted)
            .await
    }

    /// Record customer rejection of a sent quotation.
    pub async fn reject(&self, tenant_id: Uuid, quotation_id: i64) -> AppResult<Quotation> {
        self.transition(tenant_id, quotation_id, QuotationStatus::Rejected)
            .await
    }

    /// Cancel a quotation in any live state.
    pub async fn cancel(&self, tenant_id: Uuid, quotation_id: i64) -> AppResult<Quotation> {
        self.transition(tenant_id, quotation_id, QuotationStatus::Cancelled)
            .await
    }

    /// Replace the mutable fields of a draft quotation.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        quotation_id: i64,
        input: UpdateQuotationInput,
    ) -> AppResult<Quotation> {
        if let Some(ref items) = input.items {
            Self::validate_items(items)?;
            let product_ids: Vec<i64> = items.iter().map(|i| i.product_id).collect();
            ensure_products_exist(&self.db, tenant_id, &product_ids).await?;
        }

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, quotation_id).await?;
        if row.status != QuotationStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft quotations can be edited".to_string(),
            ));
        }

        let items = match &input.items {
            Some(new_items) => {
                sqlx::query("DELETE FROM quotation_items WHERE quotation_id = $1")
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
                Self::insert_items(&mut tx, row.id, new_items).await?
            }
            None => Self::fetch_items(&mut *tx, row.id).await?,
        };

        let total_amount = sum_line_totals(items.iter().map(|i| (i.quantity, i.unit_price)));

        let row = sqlx::query_as::<_, QuotationRow>(
            r#"
            UPDATE quotations
            SET customer_id = COALESCE($3, customer_id),
                valid_until = COALESCE($4, valid_until),
                remarks = COALESCE($5, remarks),
                total_amount = $6,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, quotation_number, customer_id, status, valid_until,
                      total_amount, remarks, created_by, created_at, updated_at
            "#,
        )
        .bind(quotation_id)
        .bind(tenant_id)
        .bind(input.customer_id)
        .bind(input.valid_until)
        .bind(&input.remarks)
        .bind(total_amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_quotation(items))
    }

    /// Delete a draft quotation and its lines.
    pub async fn remove(&self, tenant_id: Uuid, quotation_id: i64) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, quotation_id).await?;
        if row.status != QuotationStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft quotations can be deleted".to_string(),
            ));
        }

        sqlx::query("DELETE FROM quotations WHERE id = $1 AND tenant_id = $2")
            .bind(quotation_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Fetch one quotation with its lines.
    pub async fn find_one(&self, tenant_id: Uuid, quotation_id: i64) -> AppResult<Quotation> {
        let row = sqlx::query_as::<_, QuotationRow>(
            r#"
            SELECT id, tenant_id, quotation_number, customer_id, status, valid_until,
                   total_amount, remarks, created_by, created_at, updated_at
            FROM quotations
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(quotation_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Quotation".to_string()))?;

        let items = Self::fetch_items(&self.db, row.id).await?;

        Ok(row.into_quotation(items))
    }

    /// List quotations matching the filters, newest first.
    pub async fn find_all(
        &self,
        tenant_id: Uuid,
        filter: QuotationFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Quotation>> {
        let total_items = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM quotations
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

        let rows = sqlx::query_as::<_, QuotationRow>(
            r#"
            SELECT id, tenant_id, quotation_number, customer_id, status, valid_until,
                   total_amount, remarks, created_by, created_at, updated_at
            FROM quotations
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
        let mut by_quotation: HashMap<i64, Vec<QuotationItem>> = HashMap::new();

        if !ids.is_empty() {
            let items = sqlx::query_as::<_, QuotationItem>(
                "SELECT id, quotation_id, product_id, quantity, unit_price, line_total \
                 FROM quotation_items WHERE quotation_id = ANY($1) ORDER BY id",
            )
            .bind(&ids)
            .fetch_all(&self.db)
            .await?;

            for item in items {
                by_quotation.entry(item.quotation_id).or_default().push(item);
            }
        }

        let data = rows
            .into_iter()
            .map(|row| {
                let items = by_quotation.remove(&row.id).unwrap_or_default();
                row.into_quotation(items)
            })
            .collect();

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total_items as u64),
        })
    }

    async fn transition(
        &self,
        tenant_id: Uuid,
        quotation_id: i64,
        next: QuotationStatus,
    ) -> AppResult<Quotation> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, quotation_id).await?;
        if !row.status.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot move quotation from '{}' to '{}'",
                row.status.as_str(),
                next.as_str()
            )));
        }

        let row = sqlx::query_as::<_, QuotationRow>(
            r#"
            UPDATE quotations
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, quotation_number, customer_id, status, valid_until,
                      total_amount, remarks, created_by, created_at, updated_at
            "#,
        )
        .bind(quotation_id)
        .bind(tenant_id)
        .bind(next)
        .fetch_one(&mut *tx)
        .await?;

        let items = Self::fetch_items(&mut *tx, row.id).await?;

        tx.commit().await?;

        Ok(row.into_quotation(items))
    }

    fn validate_items(items: &[QuotationItemInput]) -> AppResult<()> {
        if let Err(message) = validate_items_not_empty(items.len()) {
            return Err(AppError::validation("items", message));
        }
        for item in items {
            if let Err(message) = validate_quantity(item.quantity) {
                return Err(AppError::validation("quantity", message));
            }
            if let Err(message) = validate_price(item.unit_price) {
                return Err(AppError::validation("unit_price", message));
            }
        }
        Ok(())
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        quotation_id: i64,
    ) -> AppResult<QuotationRow> {
        sqlx::query_as::<_, QuotationRow>(
            r#"
            SELECT id, tenant_id, quotation_number, customer_id, status, valid_until,
                   total_amount, remarks, created_by, created_at, updated_at
            FROM quotations
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(quotation_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Quotation".to_string()))
    }

    async fn insert_items(
        tx: &mut Transaction<'_, Postgres>,
        quotation_id: i64,
        items: &[QuotationItemInput],
    ) -> AppResult<Vec<QuotationItem>> {
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query_as::<_, QuotationItem>(
                r#"
                INSERT INTO quotation_items (quotation_id, product_id, quantity, unit_price, line_total)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, quotation_id, product_id, quantity, unit_price, line_total
                "#,
            )
            .bind(quotation_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(line_total(item.quantity, item.unit_price))
            .fetch_one(&mut **tx)
            .await?;
            rows.push(row);
        }
        Ok(rows)
    }

    async fn fetch_items<'e, E>(executor: E, quotation_id: i64) -> AppResult<Vec<QuotationItem>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let items = sqlx::query_as::<_, QuotationItem>(
            "SELECT id, quotation_id, product_id, quantity, unit_price, line_total \
             FROM quotation_items WHERE quotation_id = $1 ORDER BY id",
        )
        .bind(quotation_id)
        .fetch_all(executor)
        .await?;
        Ok(items)
    }
}
