//! Tenant configuration provider tests
//!
//! Tests for typed settings access including:
//! - JSON and string coercion for boolean and integer values
//! - Built-in defaults for the stock and challan policies
//! - Exact key strings the engines resolve

use serde_json::json;
use uuid::Uuid;

use bahi_erp_backend::services::settings::{
    series_padding_key, series_prefix_key, ConfigProvider, StaticConfigProvider,
    ALLOW_NEGATIVE_STOCK, REQUIRE_SALES_ORDER_FOR_DC,
};

fn tenant() -> Uuid {
    Uuid::new_v4()
}

// ============================================================================
// Key Strings
// ============================================================================

#[test]
fn test_policy_key_strings() {
    assert_eq!(ALLOW_NEGATIVE_STOCK, "sales.allowNegativeStockOnDC");
    assert_eq!(REQUIRE_SALES_ORDER_FOR_DC, "sales.requireSalesOrderForDC");
}

#[test]
fn test_series_key_strings() {
    assert_eq!(series_prefix_key("qt"), "docSeries.qt.prefix");
    assert_eq!(series_padding_key("po"), "docSeries.po.padding");
}

// ============================================================================
// Typed Accessors
// ============================================================================

#[tokio::test]
async fn test_get_value_missing_key() {
    let config = StaticConfigProvider::new();
    let value = config.get_value(tenant(), "does.not.exist").await.unwrap();
    assert!(value.is_none());
}

#[tokio::test]
async fn test_get_bool_accepts_json_bool() {
    let config = StaticConfigProvider::new().with_value("flag", json!(true));
    assert_eq!(config.get_bool(tenant(), "flag").await.unwrap(), Some(true));
}

#[tokio::test]
async fn test_get_bool_accepts_string_forms() {
    let config = StaticConfigProvider::new()
        .with_value("yes", json!("true"))
        .with_value("no", json!("false"))
        .with_value("garbage", json!("maybe"));

    assert_eq!(config.get_bool(tenant(), "yes").await.unwrap(), Some(true));
    assert_eq!(config.get_bool(tenant(), "no").await.unwrap(), Some(false));
    assert_eq!(config.get_bool(tenant(), "garbage").await.unwrap(), None);
}

#[tokio::test]
async fn test_get_bool_rejects_numbers() {
    let config = StaticConfigProvider::new().with_value("flag", json!(1));
    assert_eq!(config.get_bool(tenant(), "flag").await.unwrap(), None);
}

#[tokio::test]
async fn test_get_i64_accepts_number_and_numeric_string() {
    let config = StaticConfigProvider::new()
        .with_value("width", json!(6))
        .with_value("width_str", json!("8"))
        .with_value("width_bad", json!("wide"));

    assert_eq!(config.get_i64(tenant(), "width").await.unwrap(), Some(6));
    assert_eq!(
        config.get_i64(tenant(), "width_str").await.unwrap(),
        Some(8)
    );
    assert_eq!(config.get_i64(tenant(), "width_bad").await.unwrap(), None);
}

#[tokio::test]
async fn test_get_string_only_from_strings() {
    let config = StaticConfigProvider::new()
        .with_value("prefix", json!("GRN/"))
        .with_value("number", json!(42));

    assert_eq!(
        config.get_string(tenant(), "prefix").await.unwrap(),
        Some("GRN/".to_string())
    );
    assert_eq!(config.get_string(tenant(), "number").await.unwrap(), None);
}

// ============================================================================
// Policy Defaults
// ============================================================================

#[tokio::test]
async fn test_allow_negative_stock_defaults_false() {
    let config = StaticConfigProvider::new();
    assert!(!config.allow_negative_stock(tenant()).await.unwrap());
}

#[tokio::test]
async fn test_allow_negative_stock_reads_setting() {
    let config = StaticConfigProvider::new().with_value(ALLOW_NEGATIVE_STOCK, json!(true));
    assert!(config.allow_negative_stock(tenant()).await.unwrap());
}

#[tokio::test]
async fn test_require_sales_order_defaults_false() {
    let config = StaticConfigProvider::new();
    assert!(!config.require_sales_order_for_dc(tenant()).await.unwrap());
}

#[tokio::test]
async fn test_require_sales_order_reads_string_setting() {
    let config = StaticConfigProvider::new().with_value(REQUIRE_SALES_ORDER_FOR_DC, json!("true"));
    assert!(config.require_sales_order_for_dc(tenant()).await.unwrap());
}
