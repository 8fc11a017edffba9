//! Document numbering
//!
//! Numbers are a prefix plus a zero-padded counter value. Prefix and padding
//! come from tenant configuration (`docSeries.<series>.prefix` and
//! `.padding`) with built-in defaults per kind. The counter row is claimed
//! with an upsert inside the caller's transaction, so a value is only
//! consumed when the document commits. UNIQUE (tenant_id, number) on every
//! document table backs the counter up.

use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use shared::{validate_series_padding, validate_series_prefix, DocumentKind};

use crate::error::AppResult;
use crate::services::settings::{series_padding_key, series_prefix_key, ConfigProvider};

/// Resolved prefix and padding for one document series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSpec {
    pub prefix: String,
    pub padding: u32,
}

impl SeriesSpec {
    /// Built-in spec for a kind, used when the tenant has no overrides.
    pub fn default_for(kind: DocumentKind) -> Self {
        Self {
            prefix: kind.default_prefix().to_string(),
            padding: DocumentKind::DEFAULT_PADDING,
        }
    }

    pub fn format(&self, value: i64) -> String {
        format_document_number(&self.prefix, self.padding, value)
    }
}

/// Allocates per-tenant, per-series document numbers.
#[derive(Clone)]
pub struct DocumentNumbers {
    config: Arc<dyn ConfigProvider>,
}

impl DocumentNumbers {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self { config }
    }

    /// Resolve the series spec from tenant configuration. Resolve before
    /// opening the document transaction; the counter claim goes inside it.
    pub async fn series_spec(&self, tenant_id: Uuid, kind: DocumentKind) -> AppResult<SeriesSpec> {
        let series = kind.series();
        let mut spec = SeriesSpec::default_for(kind);

        // Unusable overrides fall back to the built-in spec.
        if let Some(prefix) = self
            .config
            .get_string(tenant_id, &series_prefix_key(series))
            .await?
        {
            if validate_series_prefix(&prefix).is_ok() {
                spec.prefix = prefix;
            }
        }

        if let Some(padding) = self
            .config
            .get_i64(tenant_id, &series_padding_key(series))
            .await?
        {
            if validate_series_padding(padding).is_ok() {
                spec.padding = padding as u32;
            }
        }

        Ok(spec)
    }

    /// Claim the next counter value for a series. The row lock taken by the
    /// upsert serializes concurrent creators until the transaction ends.
    pub async fn next_value(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        kind: DocumentKind,
    ) -> AppResult<i64> {
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO doc_sequences (tenant_id, series, next_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (tenant_id, series)
            DO UPDATE SET next_value = doc_sequences.next_value + 1
            RETURNING next_value
            "#,
        )
        .bind(tenant_id)
        .bind(kind.series())
        .fetch_one(&mut **tx)
        .await?;

        Ok(value)
    }
}

/// Prefix followed by the counter value left-padded with zeros.
pub fn format_document_number(prefix: &str, padding: u32, value: i64) -> String {
    format!("{}{:0width$}", prefix, value, width = padding as usize)
}
