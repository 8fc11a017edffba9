//! Product and warehouse catalog
//!
//! The read model the document engines resolve line items against. Products
//! carry `stock_qty`, the flat on-hand aggregate at the main warehouse; it is
//! moved only by purchase-order receipts and main-warehouse transfer legs,
//! never by the branch ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use shared::{
    validate_gst_rate, validate_name, validate_price, validate_sku, PaginatedResponse, Pagination,
    PaginationMeta,
};

use crate::error::{AppError, AppResult};

/// A catalog product.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub tenant_id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub unit: String,
    pub price: Decimal,
    pub purchase_price: Decimal,
    pub gst_rate: Decimal,
    pub warranty_months: i32,
    pub stock_qty: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A warehouse or branch godown.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Warehouse {
    pub id: i64,
    pub tenant_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a product
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductInput {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub price: Decimal,
    pub purchase_price: Decimal,
    pub gst_rate: Option<Decimal>,
    pub warranty_months: Option<i32>,
}

/// Input for updating a product (all fields optional)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProductInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub price: Option<Decimal>,
    pub purchase_price: Option<Decimal>,
    pub gst_rate: Option<Decimal>,
    pub warranty_months: Option<i32>,
}

/// Input for creating a warehouse
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWarehouseInput {
    pub name: String,
    pub address: Option<String>,
}

/// Service for managing the product and warehouse catalog
#[derive(Clone)]
pub struct CatalogService {
    db: PgPool,
}

impl CatalogService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    // ========================================================================
    // Products
    // ========================================================================

    /// Create a new product.
    pub async fn create_product(
        &self,
        tenant_id: Uuid,
        input: CreateProductInput,
    ) -> AppResult<Product> {
        if let Err(message) = validate_sku(&input.sku) {
            return Err(AppError::validation("sku", message));
        }
        if let Err(message) = validate_name(&input.name) {
            return Err(AppError::validation("name", message));
        }
        if let Err(message) = validate_price(input.price) {
            return Err(AppError::validation("price", message));
        }
        if let Err(message) = validate_price(input.purchase_price) {
            return Err(AppError::validation("purchase_price", message));
        }
        if let Some(gst_rate) = input.gst_rate {
            if let Err(message) = validate_gst_rate(gst_rate) {
                return Err(AppError::validation("gst_rate", message));
            }
        }

        let sku_taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM products WHERE tenant_id = $1 AND sku = $2)",
        )
        .bind(tenant_id)
        .bind(&input.sku)
        .fetch_one(&self.db)
        .await?;

        if sku_taken {
            return Err(AppError::DuplicateEntry(format!(
                "product with SKU '{}'",
                input.sku
            )));
        }

        let product = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products
                (tenant_id, sku, name, description, unit, price, purchase_price,
                 gst_rate, warranty_months)
            VALUES ($1, $2, $3, $4, COALESCE($5, 'pcs'), $6, $7, COALESCE($8, 18), COALESCE($9, 0))
            RETURNING id, tenant_id, sku, name, description, unit, price, purchase_price,
                      gst_rate, warranty_months, stock_qty, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(&input.sku)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.unit)
        .bind(input.price)
        .bind(input.purchase_price)
        .bind(input.gst_rate)
        .bind(input.warranty_months)
        .fetch_one(&self.db)
        .await?;

        Ok(product)
    }

    /// Update product fields. Untouched fields keep their values.
    pub async fn update_product(
        &self,
        tenant_id: Uuid,
        product_id: i64,
        input: UpdateProductInput,
    ) -> AppResult<Product> {
        if let Some(ref name) = input.name {
            if let Err(message) = validate_name(name) {
                return Err(AppError::validation("name", message));
            }
        }
        if let Some(price) = input.price {
            if let Err(message) = validate_price(price) {
                return Err(AppError::validation("price", message));
            }
        }
        if let Some(purchase_price) = input.purchase_price {
            if let Err(message) = validate_price(purchase_price) {
                return Err(AppError::validation("purchase_price", message));
            }
        }
        if let Some(gst_rate) = input.gst_rate {
            if let Err(message) = validate_gst_rate(gst_rate) {
                return Err(AppError::validation("gst_rate", message));
            }
        }

        let product = sqlx::query_as::<_, Product>(
            r#"
            UPDATE products
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                unit = COALESCE($5, unit),
                price = COALESCE($6, price),
                purchase_price = COALESCE($7, purchase_price),
                gst_rate = COALESCE($8, gst_rate),
                warranty_months = COALESCE($9, warranty_months),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, sku, name, description, unit, price, purchase_price,
                      gst_rate, warranty_months, stock_qty, created_at, updated_at
            "#,
        )
        .bind(product_id)
        .bind(tenant_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.unit)
        .bind(input.price)
        .bind(input.purchase_price)
        .bind(input.gst_rate)
        .bind(input.warranty_months)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        Ok(product)
    }

    /// Fetch one product.
    pub async fn find_product(&self, tenant_id: Uuid, product_id: i64) -> AppResult<Product> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, tenant_id, sku, name, description, unit, price, purchase_price,
                   gst_rate, warranty_months, stock_qty, created_at, updated_at
            FROM products
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(product_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        Ok(product)
    }

    /// List products, optionally filtered by a name/SKU search term.
    pub async fn list_products(
        &self,
        tenant_id: Uuid,
        search: Option<String>,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Product>> {
        let total_items = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM products
            WHERE tenant_id = $1
              AND ($2::TEXT IS NULL OR name ILIKE '%' || $2 || '%' OR sku ILIKE '%' || $2 || '%')
            "#,
        )
        .bind(tenant_id)
        .bind(&search)
        .fetch_one(&self.db)
        .await?;

        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, tenant_id, sku, name, description, unit, price, purchase_price,
                   gst_rate, warranty_months, stock_qty, created_at, updated_at
            FROM products
            WHERE tenant_id = $1
              AND ($2::TEXT IS NULL OR name ILIKE '%' || $2 || '%' OR sku ILIKE '%' || $2 || '%')
            ORDER BY name
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(&search)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse {
            data: products,
            pagination: PaginationMeta::new(&pagination, total_items as u64),
        })
    }

    // ========================================================================
    // Warehouses
    // ========================================================================

    /// Create a warehouse.
    pub async fn create_warehouse(
        &self,
        tenant_id: Uuid,
        input: CreateWarehouseInput,
    ) -> AppResult<Warehouse> {
        if let Err(message) = validate_name(&input.name) {
            return Err(AppError::validation("name", message));
        }

        let warehouse = sqlx::query_as::<_, Warehouse>(
            r#"
            INSERT INTO warehouses (tenant_id, name, address)
            VALUES ($1, $2, $3)
            RETURNING id, tenant_id, name, address, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(&input.name)
        .bind(&input.address)
        .fetch_one(&self.db)
        .await?;

        Ok(warehouse)
    }

    /// Fetch one warehouse.
    pub async fn find_warehouse(&self, tenant_id: Uuid, warehouse_id: i64) -> AppResult<Warehouse> {
        let warehouse = sqlx::query_as::<_, Warehouse>(
            "SELECT id, tenant_id, name, address, created_at FROM warehouses WHERE id = $1 AND tenant_id = $2",
        )
        .bind(warehouse_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Warehouse".to_string()))?;

        Ok(warehouse)
    }

    /// List all warehouses for a tenant.
    pub async fn list_warehouses(&self, tenant_id: Uuid) -> AppResult<Vec<Warehouse>> {
        let warehouses = sqlx::query_as::<_, Warehouse>(
            "SELECT id, tenant_id, name, address, created_at FROM warehouses WHERE tenant_id = $1 ORDER BY name",
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(warehouses)
    }

    // ========================================================================
    // Main-warehouse aggregate
    // ========================================================================

    /// Adjust the flat main-warehouse quantity under a row lock. Used by
    /// purchase-order receipts and main-warehouse transfer legs. Fails with
    /// insufficient stock when the decrement would go negative and the
    /// policy forbids it.
    pub async fn adjust_main_quantity(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        product_id: i64,
        delta: i64,
        allow_negative: bool,
    ) -> AppResult<i64> {
        let current = sqlx::query_scalar::<_, i64>(
            "SELECT stock_qty FROM products WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
        )
        .bind(product_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        let next = current + delta;
        if next < 0 && !allow_negative {
            return Err(AppError::InsufficientStock {
                product_id,
                warehouse_id: None,
                requested: -delta,
                available: current,
            });
        }

        sqlx::query("UPDATE products SET stock_qty = $3, updated_at = NOW() WHERE id = $1 AND tenant_id = $2")
            .bind(product_id)
            .bind(tenant_id)
            .bind(next)
            .execute(&mut **tx)
            .await?;

        Ok(next)
    }
}

/// Verify every referenced product belongs to the tenant.
pub(crate) async fn ensure_products_exist(
    db: &PgPool,
    tenant_id: Uuid,
    product_ids: &[i64],
) -> AppResult<()> {
    let mut distinct = product_ids.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM products WHERE tenant_id = $1 AND id = ANY($2)",
    )
    .bind(tenant_id)
    .bind(&distinct)
    .fetch_one(db)
    .await?;

    if count != distinct.len() as i64 {
        return Err(AppError::NotFound("Product".to_string()));
    }

    Ok(())
}

/// Verify a warehouse belongs to the tenant.
pub(crate) async fn ensure_warehouse_exists(
    db: &PgPool,
    tenant_id: Uuid,
    warehouse_id: i64,
) -> AppResult<()> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM warehouses WHERE id = $1 AND tenant_id = $2)",
    )
    .bind(warehouse_id)
    .bind(tenant_id)
    .fetch_one(db)
    .await?;

    if !exists {
        return Err(AppError::NotFound("Warehouse".to_string()));
    }

    Ok(())
}
