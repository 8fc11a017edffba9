//! Document workflow
//!
//! The Quotation → Sales Order → Delivery Challan → Sales Invoice chain.
//! Each conversion is owned by the engine that produces the new document;
//! this service stitches them together and adds the cross-document read
//! views: the trail of documents hanging off a sales order, and the order's
//! fulfilment position.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use shared::{remaining_quantity, DocumentKind};

use crate::error::{AppError, AppResult};
use crate::services::delivery_challan::{
    CreateChallanFromOrderInput, DeliveryChallan, DeliveryChallanService,
};
use crate::services::sales_invoice::{SalesInvoice, SalesInvoiceService};
use crate::services::sales_order::{SalesOrder, SalesOrderService};
use crate::services::settings::ConfigProvider;

/// One document in a sales order's trail.
#[derive(Debug, Clone, Serialize)]
pub struct TrailDocument {
    pub id: i64,
    pub kind: DocumentKind,
    pub number: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// One order line's fulfilment position.
#[derive(Debug, Clone, Serialize)]
pub struct FulfilmentLine {
    pub product_id: i64,
    pub ordered_qty: i64,
    pub dispatched_qty: i64,
    pub remaining_qty: i64,
}

/// Service for the cross-document sales workflow
#[derive(Clone)]
pub struct WorkflowService {
    db: PgPool,
    orders: SalesOrderService,
    challans: DeliveryChallanService,
    invoices: SalesInvoiceService,
}

impl WorkflowService {
    pub fn new(db: PgPool, config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            orders: SalesOrderService::new(db.clone(), config.clone()),
            challans: DeliveryChallanService::new(db.clone(), config.clone()),
            invoices: SalesInvoiceService::new(db.clone(), config),
            db,
        }
    }

    /// Cut a sales order from an accepted quotation.
    pub async fn convert_quotation_to_order(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        quotation_id: i64,
    ) -> AppResult<SalesOrder> {
        self.orders
            .create_from_quotation(tenant_id, user_id, quotation_id)
            .await
    }

    /// Cut a challan from a confirmed order for its undispatched remainder.
    pub async fn create_challan_from_order(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        order_id: i64,
        input: CreateChallanFromOrderInput,
    ) -> AppResult<DeliveryChallan> {
        self.challans
            .create_from_order(tenant_id, user_id, order_id, input)
            .await
    }

    /// Merge dispatched challans into one invoice.
    pub async fn invoice_challans(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        challan_ids: Vec<i64>,
    ) -> AppResult<SalesInvoice> {
        self.invoices
            .create_from_challans(tenant_id, user_id, challan_ids)
            .await
    }

    /// Every document hanging off a sales order, in chain order: the source
    /// quotation (if any), the order itself, its challans, and the invoices
    /// billing those challans.
    pub async fn document_trail(
        &self,
        tenant_id: Uuid,
        order_id: i64,
    ) -> AppResult<Vec<TrailDocument>> {
        let order = sqlx::query_as::<_, (i64, String, String, Option<i64>, DateTime<Utc>)>(
            "SELECT id, so_number, status, quotation_id, created_at \
             FROM sales_orders WHERE id = $1 AND tenant_id = $2",
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Sales order".to_string()))?;

        let mut trail = Vec::new();

        if let Some(quotation_id) = order.3 {
            let quotation = sqlx::query_as::<_, (i64, String, String, DateTime<Utc>)>(
                "SELECT id, quotation_number, status, created_at \
                 FROM quotations WHERE id = $1 AND tenant_id = $2",
            )
            .bind(quotation_id)
            .bind(tenant_id)
            .fetch_optional(&self.db)
            .await?;
            if let Some((id, number, status, created_at)) = quotation {
                trail.push(TrailDocument {
                    id,
                    kind: DocumentKind::Quotation,
                    number,
                    status,
                    created_at,
                });
            }
        }

        trail.push(TrailDocument {
            id: order.0,
            kind: DocumentKind::SalesOrder,
            number: order.1,
            status: order.2,
            created_at: order.4,
        });

        let challans = sqlx::query_as::<_, (i64, String, String, DateTime<Utc>)>(
            "SELECT id, challan_number, status, created_at \
             FROM delivery_challans WHERE sales_order_id = $1 AND tenant_id = $2 ORDER BY id",
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;
        for (id, number, status, created_at) in challans {
            trail.push(TrailDocument {
                id,
                kind: DocumentKind::DeliveryChallan,
                number,
                status,
                created_at,
            });
        }

        let invoices = sqlx::query_as::<_, (i64, String, String, DateTime<Utc>)>(
            r#"
            SELECT DISTINCT si.id, si.invoice_number, si.status, si.created_at
            FROM sales_invoices si
            JOIN invoice_challans ic ON ic.invoice_id = si.id
            JOIN delivery_challans dc ON dc.id = ic.challan_id
            WHERE dc.sales_order_id = $1 AND si.tenant_id = $2
            ORDER BY si.id
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;
        for (id, number, status, created_at) in invoices {
            trail.push(TrailDocument {
                id,
                kind: DocumentKind::SalesInvoice,
                number,
                status,
                created_at,
            });
        }

        Ok(trail)
    }

    /// Per-line fulfilment position of a sales order.
    pub async fn order_fulfilment(
        &self,
        tenant_id: Uuid,
        order_id: i64,
    ) -> AppResult<Vec<FulfilmentLine>> {
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

        let lines = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT product_id, ordered_qty, dispatched_qty \
             FROM sales_order_items WHERE sales_order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        Ok(lines
            .into_iter()
            .map(|(product_id, ordered_qty, dispatched_qty)| FulfilmentLine {
                product_id,
                ordered_qty,
                dispatched_qty,
                remaining_qty: remaining_quantity(ordered_qty, dispatched_qty),
            })
            .collect())
    }
}
