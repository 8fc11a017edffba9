//! Document numbering tests
//!
//! Tests for sequence number formatting and series configuration including:
//! - Distinct counter values always format to distinct numbers
//! - Padding widens short values and never truncates wide ones
//! - Tenant overrides apply only when usable, falling back to built-ins

use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

use bahi_erp_backend::services::numbering::{format_document_number, DocumentNumbers, SeriesSpec};
use bahi_erp_backend::services::settings::{
    series_padding_key, series_prefix_key, StaticConfigProvider,
};
use shared::DocumentKind;
use std::sync::Arc;

fn numbers_with(config: StaticConfigProvider) -> DocumentNumbers {
    DocumentNumbers::new(Arc::new(config))
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Test the document kind catalogue is closed and unambiguous
    #[test]
    fn test_document_kinds_distinct() {
        assert_eq!(DocumentKind::ALL.len(), 7);

        let mut series: Vec<&str> = DocumentKind::ALL.iter().map(|k| k.series()).collect();
        series.sort_unstable();
        series.dedup();
        assert_eq!(series.len(), 7);

        let mut prefixes: Vec<&str> = DocumentKind::ALL
            .iter()
            .map(|k| k.default_prefix())
            .collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), 7);
    }

    /// Test built-in series specs per document kind
    #[test]
    fn test_default_series_specs() {
        let expected = [
            (DocumentKind::Grn, "GRN-"),
            (DocumentKind::DeliveryChallan, "DC-"),
            (DocumentKind::SalesInvoice, "INV-"),
            (DocumentKind::SalesOrder, "SO-"),
            (DocumentKind::Quotation, "QT-"),
            (DocumentKind::PurchaseOrder, "PO-"),
        ];

        for (kind, prefix) in expected {
            let spec = SeriesSpec::default_for(kind);
            assert_eq!(spec.prefix, prefix);
            assert_eq!(spec.padding, 4);
        }
    }

    /// Test zero padding to the configured width
    #[test]
    fn test_format_pads_value() {
        assert_eq!(format_document_number("GRN-", 4, 1), "GRN-0001");
        assert_eq!(format_document_number("GRN-", 4, 42), "GRN-0042");
        assert_eq!(format_document_number("INV-", 6, 9), "INV-000009");
    }

    /// Test values wider than the padding render unpadded, never truncated
    #[test]
    fn test_format_wide_value_not_truncated() {
        assert_eq!(format_document_number("GRN-", 4, 10000), "GRN-10000");
        assert_eq!(format_document_number("DC-", 2, 12345), "DC-12345");
    }

    /// Test spec formatting delegates to the shared formatter
    #[test]
    fn test_spec_format() {
        let spec = SeriesSpec {
            prefix: "QT-".to_string(),
            padding: 5,
        };
        assert_eq!(spec.format(7), "QT-00007");
    }

    /// Test the settings keys a series resolves through
    #[test]
    fn test_series_config_keys() {
        assert_eq!(series_prefix_key("grn"), "docSeries.grn.prefix");
        assert_eq!(series_padding_key("invoice"), "docSeries.invoice.padding");
    }
}

// ============================================================================
// Series Resolution (static config, no database)
// ============================================================================

#[tokio::test]
async fn test_series_spec_defaults_when_unset() {
    let numbers = numbers_with(StaticConfigProvider::new());

    let spec = numbers
        .series_spec(Uuid::new_v4(), DocumentKind::Grn)
        .await
        .unwrap();

    assert_eq!(spec, SeriesSpec::default_for(DocumentKind::Grn));
}

#[tokio::test]
async fn test_series_spec_honours_overrides() {
    let config = StaticConfigProvider::new()
        .with_value(&series_prefix_key("grn"), json!("RCPT/"))
        .with_value(&series_padding_key("grn"), json!(6));
    let numbers = numbers_with(config);

    let spec = numbers
        .series_spec(Uuid::new_v4(), DocumentKind::Grn)
        .await
        .unwrap();

    assert_eq!(spec.prefix, "RCPT/");
    assert_eq!(spec.padding, 6);
    assert_eq!(spec.format(12), "RCPT/000012");
}

#[tokio::test]
async fn test_series_spec_accepts_numeric_string_padding() {
    let config = StaticConfigProvider::new().with_value(&series_padding_key("so"), json!("6"));
    let numbers = numbers_with(config);

    let spec = numbers
        .series_spec(Uuid::new_v4(), DocumentKind::SalesOrder)
        .await
        .unwrap();

    assert_eq!(spec.padding, 6);
}

#[tokio::test]
async fn test_series_spec_rejects_out_of_range_padding() {
    let config = StaticConfigProvider::new()
        .with_value(&series_padding_key("dc"), json!(0))
        .with_value(&series_prefix_key("dc"), json!("OUT-"));
    let numbers = numbers_with(config);

    let spec = numbers
        .series_spec(Uuid::new_v4(), DocumentKind::DeliveryChallan)
        .await
        .unwrap();

    // Prefix applies, unusable padding falls back to the default
    assert_eq!(spec.prefix, "OUT-");
    assert_eq!(spec.padding, 4);
}

#[tokio::test]
async fn test_series_spec_rejects_unusable_prefix() {
    let config = StaticConfigProvider::new()
        .with_value(&series_prefix_key("po"), json!("PO WITH SPACES-"));
    let numbers = numbers_with(config);

    let spec = numbers
        .series_spec(Uuid::new_v4(), DocumentKind::PurchaseOrder)
        .await
        .unwrap();

    assert_eq!(spec.prefix, "PO-");
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn padding_strategy() -> impl Strategy<Value = u32> {
        1u32..=10
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Distinct counter values format to distinct numbers under one spec
        #[test]
        fn prop_distinct_values_distinct_numbers(
            a in 1i64..=1_000_000,
            b in 1i64..=1_000_000,
            padding in padding_strategy()
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(
                format_document_number("GRN-", padding, a),
                format_document_number("GRN-", padding, b)
            );
        }

        /// The formatted number always starts with the prefix and parses back
        /// to the counter value
        #[test]
        fn prop_format_round_trips(
            value in 1i64..=1_000_000,
            padding in padding_strategy()
        ) {
            let number = format_document_number("SO-", padding, value);

            let digits = number.strip_prefix("SO-").unwrap();
            prop_assert_eq!(digits.parse::<i64>().unwrap(), value);
        }

        /// Padding sets a floor on the digit width, never a ceiling
        #[test]
        fn prop_padding_is_floor_not_ceiling(
            value in 1i64..=1_000_000,
            padding in padding_strategy()
        ) {
            let number = format_document_number("X", padding, value);
            let digits = number.len() - 1;

            prop_assert!(digits >= padding as usize);
            prop_assert!(digits >= value.to_string().len());
        }

        /// Counter order is preserved by the rendered numbers at fixed width
        #[test]
        fn prop_same_width_numbers_sort_like_values(
            a in 1i64..=9_999,
            b in 1i64..=9_999
        ) {
            let number_a = format_document_number("QT-", 4, a);
            let number_b = format_document_number("QT-", 4, b);

            prop_assert_eq!(number_a.cmp(&number_b), a.cmp(&b));
        }
    }
}
