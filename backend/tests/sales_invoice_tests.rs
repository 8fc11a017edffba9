//! Sales invoice tests
//!
//! Tests for invoice billing including:
//! - Status machine: post and cancel without any stock effect
//! - Line totals, per-line tax, and the three document totals
//! - Billing merged challan lines at current product prices

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

use bahi_erp_backend::services::delivery_challan::ChallanStatus;
use bahi_erp_backend::services::sales_invoice::InvoiceStatus;
use shared::{compute_totals, line_total, standard_gst_rate, tax_amount};

/// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Test the full transition table
    #[test]
    fn test_status_transitions() {
        use InvoiceStatus::*;

        let allowed = [(Draft, Posted), (Draft, Cancelled), (Posted, Cancelled)];

        for from in [Draft, Posted, Cancelled] {
            for to in [Draft, Posted, Cancelled] {
                let expected = allowed.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expected, "{:?} -> {:?}", from, to);
            }
        }
    }

    /// Test status string round-trips
    #[test]
    fn test_status_strings() {
        for status in [
            InvoiceStatus::Draft,
            InvoiceStatus::Posted,
            InvoiceStatus::Cancelled,
        ] {
            assert_eq!(InvoiceStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(InvoiceStatus::from_str("paid"), None);
    }

    /// Test only dispatched challans are billable
    #[test]
    fn test_billable_challan_states() {
        assert!(ChallanStatus::Dispatched.can_transition_to(ChallanStatus::Invoiced));
        assert!(!ChallanStatus::Draft.can_transition_to(ChallanStatus::Invoiced));
        assert!(!ChallanStatus::Invoiced.can_transition_to(ChallanStatus::Invoiced));
        assert!(!ChallanStatus::Cancelled.can_transition_to(ChallanStatus::Invoiced));
    }

    /// Test the three totals for a single line
    #[test]
    fn test_totals_single_line() {
        // 2 x 100.00 at 18% GST
        let totals = compute_totals([(2i64, dec("100.00"), dec("18"))]);

        assert_eq!(totals.total_before_tax, dec("200.00"));
        assert_eq!(totals.total_tax, dec("36.00"));
        assert_eq!(totals.total_amount, dec("236.00"));
    }

    /// Test totals accumulate across mixed-rate lines
    #[test]
    fn test_totals_mixed_rates() {
        let lines = [
            (1i64, dec("500.00"), dec("18")), // 500.00 + 90.00
            (4, dec("25.00"), dec("5")),      // 100.00 + 5.00
            (2, dec("10.00"), dec("0")),      // 20.00 + 0
        ];
        let totals = compute_totals(lines);

        assert_eq!(totals.total_before_tax, dec("620.00"));
        assert_eq!(totals.total_tax, dec("95.00"));
        assert_eq!(totals.total_amount, dec("715.00"));
    }

    /// Test per-line tax rounds to two decimal places
    #[test]
    fn test_tax_amount_rounding() {
        assert_eq!(tax_amount(dec("100.00"), dec("18")), dec("18.00"));
        assert_eq!(tax_amount(dec("99.99"), dec("18")), dec("18.00"));
        assert_eq!(tax_amount(dec("33.40"), dec("18")), dec("6.01"));
    }

    /// Test the fixed GST assumption used when deriving lines
    #[test]
    fn test_standard_gst_rate() {
        assert_eq!(standard_gst_rate(), dec("18"));
    }

    /// Test merging challan lines per product before pricing
    #[test]
    fn test_merged_challan_lines() {
        // Two challans both carrying product 7, one also product 9
        let challan_items = [(7i64, 2i64), (9, 1), (7, 3)];

        let mut merged: BTreeMap<i64, i64> = BTreeMap::new();
        for (product_id, quantity) in challan_items {
            *merged.entry(product_id).or_insert(0) += quantity;
        }

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[&7], 5);
        assert_eq!(merged[&9], 1);

        // Priced at the current product price, one line per product
        let totals = compute_totals(
            merged
                .iter()
                .map(|(_, &quantity)| (quantity, dec("40.00"), dec("18"))),
        );
        assert_eq!(totals.total_before_tax, dec("240.00"));
        assert_eq!(totals.total_amount, dec("283.20"));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Strategy for prices with at most two decimal places
    fn price_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=1_000_000).prop_map(|n| Decimal::new(n, 2))
    }

    /// Strategy for GST rates between 0 and 100 percent
    fn rate_strategy() -> impl Strategy<Value = Decimal> {
        (0i64..=100).prop_map(Decimal::from)
    }

    fn invoice_lines_strategy() -> impl Strategy<Value = Vec<(i64, Decimal, Decimal)>> {
        prop::collection::vec((1i64..=500, price_strategy(), rate_strategy()), 1..10)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The grand total is always the sum of the other two totals
        #[test]
        fn prop_totals_additive(lines in invoice_lines_strategy()) {
            let totals = compute_totals(lines);
            prop_assert_eq!(
                totals.total_amount,
                totals.total_before_tax + totals.total_tax
            );
        }

        /// The pre-tax total is the sum of the line totals
        #[test]
        fn prop_before_tax_is_line_sum(lines in invoice_lines_strategy()) {
            let totals = compute_totals(lines.clone());
            let by_hand: Decimal = lines
                .iter()
                .map(|&(quantity, price, _)| line_total(quantity, price))
                .sum();
            prop_assert_eq!(totals.total_before_tax, by_hand);
        }

        /// Two-decimal prices make line totals exact, so quantity scales them
        #[test]
        fn prop_line_total_scales_exact_prices(
            quantity in 1i64..=500,
            price in price_strategy()
        ) {
            prop_assert_eq!(
                line_total(quantity, price),
                Decimal::from(quantity) * price
            );
        }

        /// Zero-rate lines contribute no tax
        #[test]
        fn prop_zero_rate_no_tax(lines in prop::collection::vec((1i64..=500, price_strategy()), 1..10)) {
            let totals = compute_totals(
                lines.into_iter().map(|(quantity, price)| (quantity, price, Decimal::ZERO)),
            );
            prop_assert_eq!(totals.total_tax, Decimal::ZERO);
            prop_assert_eq!(totals.total_amount, totals.total_before_tax);
        }

        /// Tax grows weakly with the rate at a fixed line total
        #[test]
        fn prop_tax_monotone_in_rate(
            line in price_strategy(),
            low in 0i64..=99
        ) {
            let low_rate = Decimal::from(low);
            let high_rate = Decimal::from(low + 1);
            prop_assert!(tax_amount(line, low_rate) <= tax_amount(line, high_rate));
        }

        /// Merging challan quantities per product preserves the billed total
        #[test]
        fn prop_merge_preserves_quantity(
            items in prop::collection::vec((1i64..=10, 1i64..=100), 1..20)
        ) {
            let mut merged: BTreeMap<i64, i64> = BTreeMap::new();
            for &(product_id, quantity) in &items {
                *merged.entry(product_id).or_insert(0) += quantity;
            }

            let raw_total: i64 = items.iter().map(|&(_, q)| q).sum();
            let merged_total: i64 = merged.values().sum();
            prop_assert_eq!(raw_total, merged_total);

            // One billed line per product
            let mut distinct: Vec<i64> = items.iter().map(|&(p, _)| p).collect();
            distinct.sort_unstable();
            distinct.dedup();
            prop_assert_eq!(merged.len(), distinct.len());
        }
    }
}
