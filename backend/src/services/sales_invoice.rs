//! Sales invoices
//!
//! Invoices bill goods that already left the warehouse, so nothing here
//! ever touches stock; the movement happened at challan dispatch. An
//! invoice may link dispatched challans (each billable on at most one live
//! invoice), and cancelling or removing the invoice releases them back to
//! `dispatched` for rebilling.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use shared::{
    compute_totals, line_total, tax_amount, validate_gst_rate, validate_items_not_empty,
    validate_price, validate_quantity, DocumentKind, DocumentTotals, PaginatedResponse,
    Pagination, PaginationMeta,
};

use crate::error::{AppError, AppResult};
use crate::services::delivery_challan::ChallanStatus;
use crate::services::numbering::DocumentNumbers;
use crate::services::settings::ConfigProvider;

/// Sales invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Posted,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Posted => "posted",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "posted" => Some(InvoiceStatus::Posted),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }

    /// Allowed lifecycle transitions
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (*self, next),
            (InvoiceStatus::Draft, InvoiceStatus::Posted)
                | (InvoiceStatus::Draft, InvoiceStatus::Cancelled)
                | (InvoiceStatus::Posted, InvoiceStatus::Cancelled)
        )
    }
}

/// A sales invoice with its lines and linked challans.
#[derive(Debug, Clone, Serialize)]
pub struct SalesInvoice {
    pub id: i64,
    pub tenant_id: Uuid,
    pub invoice_number: String,
    pub customer_id: i64,
    pub invoice_date: NaiveDate,
    pub status: InvoiceStatus,
    pub total_before_tax: Decimal,
    pub total_tax: Decimal,
    pub total_amount: Decimal,
    pub remarks: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub items: Vec<InvoiceItem>,
    pub challan_ids: Vec<i64>,
}

/// One invoice line with its tax breakup.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvoiceItem {
    pub id: i64,
    pub invoice_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub price: Decimal,
    pub tax_rate: Decimal,
    pub line_total: Decimal,
    pub tax_amount: Decimal,
}

/// Input line for an invoice. When `tax_rate` is omitted the product's GST
/// rate is applied.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceItemInput {
    pub product_id: i64,
    pub quantity: i64,
    pub price: Decimal,
    pub tax_rate: Option<Decimal>,
}

/// Input for creating an invoice directly
#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceInput {
    pub customer_id: i64,
    pub invoice_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub items: Vec<InvoiceItemInput>,
    pub challan_ids: Option<Vec<i64>>,
}

/// Input for updating a draft invoice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateInvoiceInput {
    pub customer_id: Option<i64>,
    pub invoice_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub items: Option<Vec<InvoiceItemInput>>,
}

/// Filters for listing invoices
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: i64,
    tenant_id: Uuid,
    invoice_number: String,
    customer_id: i64,
    invoice_date: NaiveDate,
    status: InvoiceStatus,
    total_before_tax: Decimal,
    total_tax: Decimal,
    total_amount: Decimal,
    remarks: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    posted_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl InvoiceRow {
    fn into_invoice(self, items: Vec<InvoiceItem>, challan_ids: Vec<i64>) -> SalesInvoice {
        SalesInvoice {
            id: self.id,
            tenant_id: self.tenant_id,
            invoice_number: self.invoice_number,
            customer_id: self.customer_id,
            invoice_date: self.invoice_date,
            status: self.status,
            total_before_tax: self.total_before_tax,
            total_tax: self.total_tax,
            total_amount: self.total_amount,
            remarks: self.remarks,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            posted_at: self.posted_at,
            cancelled_at: self.cancelled_at,
            items,
            challan_ids,
        }
    }
}

/// An invoice line with its tax rate settled.
struct ResolvedInvoiceLine {
    product_id: i64,
    quantity: i64,
    price: Decimal,
    tax_rate: Decimal,
}

/// Service for sales invoices
#[derive(Clone)]
pub struct SalesInvoiceService {
    db: PgPool,
    numbers: DocumentNumbers,
}

impl SalesInvoiceService {
    pub fn new(db: PgPool, config: Arc<dyn ConfigProvider>) -> Self {
        let numbers = DocumentNumbers::new(config);
        Self { db, numbers }
    }

    /// Create a draft invoice from supplied lines, optionally claiming
    /// dispatched challans. A missing challan fails with `NotFound`; a
    /// challan in any other state fails the whole creation.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        input: CreateInvoiceInput,
    ) -> AppResult<SalesInvoice> {
        Self::validate_items(&input.items)?;
        let lines = self.resolve_lines(tenant_id, &input.items).await?;
        let totals = Self::totals_for(&lines);
        let invoice_date = input.invoice_date.unwrap_or_else(|| Utc::now().date_naive());

        let spec = self
            .numbers
            .series_spec(tenant_id, DocumentKind::SalesInvoice)
            .await?;

        let mut tx = self.db.begin().await?;

        let value =
            DocumentNumbers::next_value(&mut tx, tenant_id, DocumentKind::SalesInvoice).await?;
        let invoice_number = spec.format(value);

        let row = Self::insert_header(
            &mut tx,
            tenant_id,
            &invoice_number,
            input.customer_id,
            invoice_date,
            &totals,
            input.remarks.as_deref(),
            user_id,
        )
        .await?;

        let items = Self::insert_items(&mut tx, row.id, &lines).await?;

        let mut challan_ids = input.challan_ids.unwrap_or_default();
        challan_ids.sort_unstable();
        challan_ids.dedup();
        for &challan_id in &challan_ids {
            Self::claim_challan(&mut tx, tenant_id, row.id, challan_id).await?;
        }

        tx.commit().await?;

        Ok(row.into_invoice(items, challan_ids))
    }

    /// Build an invoice from dispatched challans. All challans must belong
    /// to the same customer; their lines are merged per product and priced
    /// at the current product price and GST rate.
    pub async fn create_from_challans(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        challan_ids: Vec<i64>,
    ) -> AppResult<SalesInvoice> {
        let mut challan_ids = challan_ids;
        challan_ids.sort_unstable();
        challan_ids.dedup();
        if challan_ids.is_empty() {
            return Err(AppError::ValidationError(
                "No challans supplied".to_string(),
            ));
        }

        let spec = self
            .numbers
            .series_spec(tenant_id, DocumentKind::SalesInvoice)
            .await?;

        let mut tx = self.db.begin().await?;

        let challans = sqlx::query_as::<_, (i64, Option<i64>, ChallanStatus)>(
            r#"
            SELECT id, customer_id, status
            FROM delivery_challans
            WHERE tenant_id = $1 AND id = ANY($2)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(&challan_ids)
        .fetch_all(&mut *tx)
        .await?;

        if challans.len() != challan_ids.len() {
            return Err(AppError::NotFound("Delivery challan".to_string()));
        }

        let mut customer_id = None;
        for (id, customer, status) in &challans {
            if *status != ChallanStatus::Dispatched {
                return Err(AppError::ValidationError(format!(
                    "Challan {} is '{}', only dispatched challans can be invoiced",
                    id,
                    status.as_str()
                )));
            }
            let customer = customer.ok_or_else(|| {
                AppError::ValidationError(format!("Challan {} has no customer", id))
            })?;
            match customer_id {
                None => customer_id = Some(customer),
                Some(existing) if existing != customer => {
                    return Err(AppError::ValidationError(
                        "Challans belong to different customers".to_string(),
                    ));
                }
                Some(_) => {}
            }
        }
        let customer_id = customer_id.ok_or_else(|| {
            AppError::ValidationError("No challans supplied".to_string())
        })?;

        // Merge challan lines per product.
        let challan_lines = sqlx::query_as::<_, (i64, i64)>(
            "SELECT product_id, quantity FROM challan_items WHERE challan_id = ANY($1)",
        )
        .bind(&challan_ids)
        .fetch_all(&mut *tx)
        .await?;

        let mut quantities: BTreeMap<i64, i64> = BTreeMap::new();
        for (product_id, quantity) in challan_lines {
            *quantities.entry(product_id).or_default() += quantity;
        }
        if quantities.is_empty() {
            return Err(AppError::ValidationError(
                "Challans have no items to bill".to_string(),
            ));
        }

        let product_ids: Vec<i64> = quantities.keys().copied().collect();
        let pricing: HashMap<i64, (Decimal, Decimal)> =
            sqlx::query_as::<_, (i64, Decimal, Decimal)>(
                "SELECT id, price, gst_rate FROM products WHERE tenant_id = $1 AND id = ANY($2)",
            )
            .bind(tenant_id)
            .bind(&product_ids)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|(id, price, gst_rate)| (id, (price, gst_rate)))
            .collect();

        let mut lines = Vec::with_capacity(quantities.len());
        for (product_id, quantity) in quantities {
            let (price, tax_rate) = pricing
                .get(&product_id)
                .copied()
                .ok_or_else(|| AppError::NotFound("Product".to_string()))?;
            lines.push(ResolvedInvoiceLine {
                product_id,
                quantity,
                price,
                tax_rate,
            });
        }
        let totals = Self::totals_for(&lines);

        let value =
            DocumentNumbers::next_value(&mut tx, tenant_id, DocumentKind::SalesInvoice).await?;
        let invoice_number = spec.format(value);

        let row = Self::insert_header(
            &mut tx,
            tenant_id,
            &invoice_number,
            customer_id,
            Utc::now().date_naive(),
            &totals,
            None,
            user_id,
        )
        .await?;

        let items = Self::insert_items(&mut tx, row.id, &lines).await?;

        for &challan_id in &challan_ids {
            sqlx::query("INSERT INTO invoice_challans (invoice_id, challan_id) VALUES ($1, $2)")
                .bind(row.id)
                .bind(challan_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "UPDATE delivery_challans SET status = 'invoiced', updated_at = NOW() \
             WHERE tenant_id = $1 AND id = ANY($2)",
        )
        .bind(tenant_id)
        .bind(&challan_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_invoice(items, challan_ids))
    }

    /// Post a draft invoice. Pure status transition.
    pub async fn post(&self, tenant_id: Uuid, invoice_id: i64) -> AppResult<SalesInvoice> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, invoice_id).await?;
        if !row.status.can_transition_to(InvoiceStatus::Posted) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot post invoice in '{}' status",
                row.status.as_str()
            )));
        }

        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            UPDATE sales_invoices
            SET status = 'posted', posted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, invoice_number, customer_id, invoice_date, status,
                      total_before_tax, total_tax, total_amount, remarks, created_by,
                      created_at, updated_at, posted_at, cancelled_at
            "#,
        )
        .bind(invoice_id)
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        let items = Self::fetch_items(&mut *tx, row.id).await?;
        let challan_ids = Self::fetch_challan_ids(&mut *tx, row.id).await?;

        tx.commit().await?;

        Ok(row.into_invoice(items, challan_ids))
    }

    /// Cancel an invoice, releasing its challans back to `dispatched` so
    /// they can be rebilled. Stock is never touched.
    pub async fn cancel(&self, tenant_id: Uuid, invoice_id: i64) -> AppResult<SalesInvoice> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, invoice_id).await?;
        if !row.status.can_transition_to(InvoiceStatus::Cancelled) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot cancel invoice in '{}' status",
                row.status.as_str()
            )));
        }

        Self::release_challans(&mut tx, tenant_id, row.id).await?;

        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            UPDATE sales_invoices
            SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, invoice_number, customer_id, invoice_date, status,
                      total_before_tax, total_tax, total_amount, remarks, created_by,
                      created_at, updated_at, posted_at, cancelled_at
            "#,
        )
        .bind(invoice_id)
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        let items = Self::fetch_items(&mut *tx, row.id).await?;

        tx.commit().await?;

        Ok(row.into_invoice(items, Vec::new()))
    }

    /// Replace the mutable fields of a draft invoice.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        invoice_id: i64,
        input: UpdateInvoiceInput,
    ) -> AppResult<SalesInvoice> {
        let new_lines = match &input.items {
            Some(items) => {
                Self::validate_items(items)?;
                Some(self.resolve_lines(tenant_id, items).await?)
            }
            None => None,
        };

        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, invoice_id).await?;
        if row.status != InvoiceStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft invoices can be edited".to_string(),
            ));
        }

        let items = match new_lines {
            Some(lines) => {
                sqlx::query("DELETE FROM sales_invoice_items WHERE invoice_id = $1")
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
                Self::insert_items(&mut tx, row.id, &lines).await?
            }
            None => Self::fetch_items(&mut *tx, row.id).await?,
        };

        let totals = compute_totals(items.iter().map(|i| (i.quantity, i.price, i.tax_rate)));

        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            UPDATE sales_invoices
            SET customer_id = COALESCE($3, customer_id),
                invoice_date = COALESCE($4, invoice_date),
                remarks = COALESCE($5, remarks),
                total_before_tax = $6,
                total_tax = $7,
                total_amount = $8,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, invoice_number, customer_id, invoice_date, status,
                      total_before_tax, total_tax, total_amount, remarks, created_by,
                      created_at, updated_at, posted_at, cancelled_at
            "#,
        )
        .bind(invoice_id)
        .bind(tenant_id)
        .bind(input.customer_id)
        .bind(input.invoice_date)
        .bind(&input.remarks)
        .bind(totals.total_before_tax)
        .bind(totals.total_tax)
        .bind(totals.total_amount)
        .fetch_one(&mut *tx)
        .await?;

        let challan_ids = Self::fetch_challan_ids(&mut *tx, row.id).await?;

        tx.commit().await?;

        Ok(row.into_invoice(items, challan_ids))
    }

    /// Delete a draft invoice, releasing any linked challans.
    pub async fn remove(&self, tenant_id: Uuid, invoice_id: i64) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let row = Self::fetch_for_update(&mut tx, tenant_id, invoice_id).await?;
        if row.status != InvoiceStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft invoices can be deleted".to_string(),
            ));
        }

        Self::release_challans(&mut tx, tenant_id, row.id).await?;

        sqlx::query("DELETE FROM sales_invoices WHERE id = $1 AND tenant_id = $2")
            .bind(invoice_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Fetch one invoice with its lines and linked challans.
    pub async fn find_one(&self, tenant_id: Uuid, invoice_id: i64) -> AppResult<SalesInvoice> {
        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT id, tenant_id, invoice_number, customer_id, invoice_date, status,
                   total_before_tax, total_tax, total_amount, remarks, created_by,
                   created_at, updated_at, posted_at, cancelled_at
            FROM sales_invoices
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(invoice_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Sales invoice".to_string()))?;

        let items = Self::fetch_items(&self.db, row.id).await?;
        let challan_ids = Self::fetch_challan_ids(&self.db, row.id).await?;

        Ok(row.into_invoice(items, challan_ids))
    }

    /// List invoices matching the filters, newest first.
    pub async fn find_all(
        &self,
        tenant_id: Uuid,
        filter: InvoiceFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<SalesInvoice>> {
        let total_items = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM sales_invoices
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR status = $2)
              AND ($3::BIGINT IS NULL OR customer_id = $3)
              AND ($4::DATE IS NULL OR invoice_date >= $4)
              AND ($5::DATE IS NULL OR invoice_date <= $5)
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status)
        .bind(filter.customer_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT id, tenant_id, invoice_number, customer_id, invoice_date, status,
                   total_before_tax, total_tax, total_amount, remarks, created_by,
                   created_at, updated_at, posted_at, cancelled_at
            FROM sales_invoices
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR status = $2)
              AND ($3::BIGINT IS NULL OR customer_id = $3)
              AND ($4::DATE IS NULL OR invoice_date >= $4)
              AND ($5::DATE IS NULL OR invoice_date <= $5)
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
        let mut items_by_invoice: HashMap<i64, Vec<InvoiceItem>> = HashMap::new();
        let mut challans_by_invoice: HashMap<i64, Vec<i64>> = HashMap::new();

        if !ids.is_empty() {
            let items = sqlx::query_as::<_, InvoiceItem>(
                "SELECT id, invoice_id, product_id, quantity, price, tax_rate, \
                 line_total, tax_amount \
                 FROM sales_invoice_items WHERE invoice_id = ANY($1) ORDER BY id",
            )
            .bind(&ids)
            .fetch_all(&self.db)
            .await?;
            for item in items {
                items_by_invoice
                    .entry(item.invoice_id)
                    .or_default()
                    .push(item);
            }

            let links = sqlx::query_as::<_, (i64, i64)>(
                "SELECT invoice_id, challan_id FROM invoice_challans \
                 WHERE invoice_id = ANY($1) ORDER BY challan_id",
            )
            .bind(&ids)
            .fetch_all(&self.db)
            .await?;
            for (invoice_id, challan_id) in links {
                challans_by_invoice
                    .entry(invoice_id)
                    .or_default()
                    .push(challan_id);
            }
        }

        let data = rows
            .into_iter()
            .map(|row| {
                let items = items_by_invoice.remove(&row.id).unwrap_or_default();
                let challan_ids = challans_by_invoice.remove(&row.id).unwrap_or_default();
                row.into_invoice(items, challan_ids)
            })
            .collect();

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total_items as u64),
        })
    }

    fn validate_items(items: &[InvoiceItemInput]) -> AppResult<()> {
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
        items: &[InvoiceItemInput],
    ) -> AppResult<Vec<ResolvedInvoiceLine>> {
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
            .map(|item| ResolvedInvoiceLine {
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
                tax_rate: item.tax_rate.unwrap_or(rates[&item.product_id]),
            })
            .collect())
    }

    fn totals_for(lines: &[ResolvedInvoiceLine]) -> DocumentTotals {
        compute_totals(lines.iter().map(|l| (l.quantity, l.price, l.tax_rate)))
    }

    /// Claim one dispatched challan for this invoice, marking it invoiced.
    async fn claim_challan(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_id: i64,
        challan_id: i64,
    ) -> AppResult<()> {
        let status = sqlx::query_scalar::<_, ChallanStatus>(
            "SELECT status FROM delivery_challans WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
        )
        .bind(challan_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery challan".to_string()))?;

        if status != ChallanStatus::Dispatched {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot invoice challan in '{}' status",
                status.as_str()
            )));
        }

        sqlx::query("INSERT INTO invoice_challans (invoice_id, challan_id) VALUES ($1, $2)")
            .bind(invoice_id)
            .bind(challan_id)
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            "UPDATE delivery_challans SET status = 'invoiced', updated_at = NOW() \
             WHERE id = $1 AND tenant_id = $2",
        )
        .bind(challan_id)
        .bind(tenant_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Hand the invoice's challans back to `dispatched` and drop the links.
    async fn release_challans(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_id: i64,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE delivery_challans SET status = 'dispatched', updated_at = NOW()
            WHERE tenant_id = $1
              AND id IN (SELECT challan_id FROM invoice_challans WHERE invoice_id = $2)
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM invoice_challans WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_header(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_number: &str,
        customer_id: i64,
        invoice_date: NaiveDate,
        totals: &DocumentTotals,
        remarks: Option<&str>,
        user_id: Uuid,
    ) -> AppResult<InvoiceRow> {
        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            INSERT INTO sales_invoices
                (tenant_id, invoice_number, customer_id, invoice_date, status,
                 total_before_tax, total_tax, total_amount, remarks, created_by)
            VALUES ($1, $2, $3, $4, 'draft', $5, $6, $7, $8, $9)
            RETURNING id, tenant_id, invoice_number, customer_id, invoice_date, status,
                      total_before_tax, total_tax, total_amount, remarks, created_by,
                      created_at, updated_at, posted_at, cancelled_at
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_number)
        .bind(customer_id)
        .bind(invoice_date)
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
        invoice_id: i64,
        lines: &[ResolvedInvoiceLine],
    ) -> AppResult<Vec<InvoiceItem>> {
        let mut rows = Vec::with_capacity(lines.len());
        for line in lines {
            let amount = line_total(line.quantity, line.price);
            let row = sqlx::query_as::<_, InvoiceItem>(
                r#"
                INSERT INTO sales_invoice_items
                    (invoice_id, product_id, quantity, price, tax_rate, line_total, tax_amount)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, invoice_id, product_id, quantity, price, tax_rate,
                          line_total, tax_amount
                "#,
            )
            .bind(invoice_id)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(line.price)
            .bind(line.tax_rate)
            .bind(amount)
            .bind(tax_amount(amount, line.tax_rate))
            .fetch_one(&mut **tx)
            .await?;
            rows.push(row);
        }
        Ok(rows)
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_id: i64,
    ) -> AppResult<InvoiceRow> {
        sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT id, tenant_id, invoice_number, customer_id, invoice_date, status,
                   total_before_tax, total_tax, total_amount, remarks, created_by,
                   created_at, updated_at, posted_at, cancelled_at
            FROM sales_invoices
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Sales invoice".to_string()))
    }

    async fn fetch_items<'e, E>(executor: E, invoice_id: i64) -> AppResult<Vec<InvoiceItem>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let items = sqlx::query_as::<_, InvoiceItem>(
            "SELECT id, invoice_id, product_id, quantity, price, tax_rate, \
             line_total, tax_amount \
             FROM sales_invoice_items WHERE invoice_id = $1 ORDER BY id",
        )
        .bind(invoice_id)
        .fetch_all(executor)
        .await?;
        Ok(items)
    }

    async fn fetch_challan_ids<'e, E>(executor: E, invoice_id: i64) -> AppResult<Vec<i64>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT challan_id FROM invoice_challans WHERE invoice_id = $1 ORDER BY challan_id",
        )
        .bind(invoice_id)
        .fetch_all(executor)
        .await?;
        Ok(ids)
    }
}
