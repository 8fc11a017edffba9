//! Tenant settings and the configuration provider
//!
//! Document engines read tenant-scoped tunables (number series, stock
//! policies) through the `ConfigProvider` trait so the lookup source can be
//! swapped out in tests. `DbConfigProvider` backs the trait with the
//! settings table; `StaticConfigProvider` serves a fixed in-memory map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Setting key: allow outbound movements to drive a balance negative.
pub const ALLOW_NEGATIVE_STOCK: &str = "sales.allowNegativeStockOnDC";

/// Setting key: require a sales order reference on new delivery challans.
pub const REQUIRE_SALES_ORDER_FOR_DC: &str = "sales.requireSalesOrderForDC";

/// Setting key holding the number prefix for a document series.
pub fn series_prefix_key(series: &str) -> String {
    format!("docSeries.{}.prefix", series)
}

/// Setting key holding the zero-pad width for a document series.
pub fn series_padding_key(series: &str) -> String {
    format!("docSeries.{}.padding", series)
}

/// A stored tenant setting.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub tenant_id: Uuid,
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Read access to tenant configuration values.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Raw JSON value for a key, or None when unset.
    async fn get_value(&self, tenant_id: Uuid, key: &str)
        -> AppResult<Option<serde_json::Value>>;

    /// Boolean value, accepting JSON booleans and "true"/"false" strings.
    async fn get_bool(&self, tenant_id: Uuid, key: &str) -> AppResult<Option<bool>> {
        Ok(self
            .get_value(tenant_id, key)
            .await?
            .and_then(|value| match value {
                serde_json::Value::Bool(b) => Some(b),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            }))
    }

    /// Integer value, accepting JSON numbers and numeric strings.
    async fn get_i64(&self, tenant_id: Uuid, key: &str) -> AppResult<Option<i64>> {
        Ok(self
            .get_value(tenant_id, key)
            .await?
            .and_then(|value| match value {
                serde_json::Value::Number(n) => n.as_i64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            }))
    }

    /// String value. Non-string JSON yields None.
    async fn get_string(&self, tenant_id: Uuid, key: &str) -> AppResult<Option<String>> {
        Ok(self
            .get_value(tenant_id, key)
            .await?
            .and_then(|value| match value {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            }))
    }

    /// Policy: may outbound movements drive a stock balance negative.
    /// Applies to dispatches, reversals, transfers, and adjustments alike.
    async fn allow_negative_stock(&self, tenant_id: Uuid) -> AppResult<bool> {
        Ok(self
            .get_bool(tenant_id, ALLOW_NEGATIVE_STOCK)
            .await?
            .unwrap_or(false))
    }

    /// Policy: must sales-type challans reference a sales order.
    async fn require_sales_order_for_dc(&self, tenant_id: Uuid) -> AppResult<bool> {
        Ok(self
            .get_bool(tenant_id, REQUIRE_SALES_ORDER_FOR_DC)
            .await?
            .unwrap_or(false))
    }
}

/// Config provider backed by the settings table.
#[derive(Clone)]
pub struct DbConfigProvider {
    db: PgPool,
}

/// Config provider over a fixed map, for tests and tooling.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    values: HashMap<String, serde_json::Value>,
}

/// Service for managing tenant settings
#[derive(Clone)]
pub struct SettingsService {
    db: PgPool,
}

impl DbConfigProvider {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConfigProvider for DbConfigProvider {
    async fn get_value(
        &self,
        tenant_id: Uuid,
        key: &str,
    ) -> AppResult<Option<serde_json::Value>> {
        let value = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT value FROM settings WHERE tenant_id = $1 AND key = $2",
        )
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&self.db)
        .await?;

        Ok(value)
    }
}

impl StaticConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a value, builder style.
    pub fn with_value(mut self, key: &str, value: serde_json::Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn get_value(
        &self,
        _tenant_id: Uuid,
        key: &str,
    ) -> AppResult<Option<serde_json::Value>> {
        Ok(self.values.get(key).cloned())
    }
}

impl SettingsService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create or replace a setting.
    pub async fn set_value(
        &self,
        tenant_id: Uuid,
        key: &str,
        value: serde_json::Value,
    ) -> AppResult<Setting> {
        if key.trim().is_empty() {
            return Err(AppError::validation("key", "Setting key cannot be empty"));
        }

        let setting = sqlx::query_as::<_, Setting>(
            r#"
            INSERT INTO settings (tenant_id, key, value, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (tenant_id, key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            RETURNING tenant_id, key, value, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(key)
        .bind(value)
        .fetch_one(&self.db)
        .await?;

        Ok(setting)
    }

    /// Fetch a single setting value.
    pub async fn get_value(
        &self,
        tenant_id: Uuid,
        key: &str,
    ) -> AppResult<Option<serde_json::Value>> {
        DbConfigProvider::new(self.db.clone())
            .get_value(tenant_id, key)
            .await
    }

    /// List all settings for a tenant.
    pub async fn list(&self, tenant_id: Uuid) -> AppResult<Vec<Setting>> {
        let settings = sqlx::query_as::<_, Setting>(
            "SELECT tenant_id, key, value, updated_at FROM settings WHERE tenant_id = $1 ORDER BY key",
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(settings)
    }

    /// Delete a setting, restoring the built-in default for its key.
    pub async fn remove(&self, tenant_id: Uuid, key: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM settings WHERE tenant_id = $1 AND key = $2")
            .bind(tenant_id)
            .bind(key)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Setting".to_string()));
        }

        Ok(())
    }
}
