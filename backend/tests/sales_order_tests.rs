//! Quotation and sales order tests
//!
//! Tests for the pre-dispatch sales documents including:
//! - Quotation lifecycle: draft, sent, accepted or rejected, cancel from any
//!   live state
//! - Sales order lifecycle and draft-only editing
//! - Conversion pricing: quoted prices plus the standard GST assumption
//! - Fulfilment arithmetic over ordered and dispatched quantities

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

use bahi_erp_backend::services::quotation::QuotationStatus;
use bahi_erp_backend::services::sales_order::SalesOrderStatus;
use shared::{compute_totals, remaining_quantity, standard_gst_rate, sum_line_totals};

/// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

const QUOTATION_STATES: [QuotationStatus; 5] = [
    QuotationStatus::Draft,
    QuotationStatus::Sent,
    QuotationStatus::Accepted,
    QuotationStatus::Rejected,
    QuotationStatus::Cancelled,
];

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Test the quotation transition table
    #[test]
    fn test_quotation_transitions() {
        use QuotationStatus::*;

        for from in QUOTATION_STATES {
            for to in QUOTATION_STATES {
                let expected = match (from, to) {
                    (Draft, Sent) | (Sent, Accepted) | (Sent, Rejected) => true,
                    (Cancelled, Cancelled) => false,
                    (_, Cancelled) => true,
                    _ => false,
                };
                assert_eq!(from.can_transition_to(to), expected, "{:?} -> {:?}", from, to);
            }
        }
    }

    /// Test a quotation can be cancelled from any live state
    #[test]
    fn test_quotation_cancel_from_live_states() {
        for from in [
            QuotationStatus::Draft,
            QuotationStatus::Sent,
            QuotationStatus::Accepted,
            QuotationStatus::Rejected,
        ] {
            assert!(from.can_transition_to(QuotationStatus::Cancelled));
        }
        assert!(!QuotationStatus::Cancelled.can_transition_to(QuotationStatus::Cancelled));
    }

    /// Test acceptance requires the quotation to have been sent
    #[test]
    fn test_quotation_accept_needs_sent() {
        assert!(QuotationStatus::Sent.can_transition_to(QuotationStatus::Accepted));
        assert!(!QuotationStatus::Draft.can_transition_to(QuotationStatus::Accepted));
        assert!(!QuotationStatus::Rejected.can_transition_to(QuotationStatus::Accepted));
    }

    /// Test the sales order transition table
    #[test]
    fn test_sales_order_transitions() {
        use SalesOrderStatus::*;

        let allowed = [
            (Draft, Confirmed),
            (Draft, Cancelled),
            (Confirmed, Cancelled),
        ];

        for from in [Draft, Confirmed, Cancelled] {
            for to in [Draft, Confirmed, Cancelled] {
                let expected = allowed.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expected, "{:?} -> {:?}", from, to);
            }
        }
    }

    /// Test status string round-trips
    #[test]
    fn test_status_strings() {
        for status in QUOTATION_STATES {
            assert_eq!(QuotationStatus::from_str(status.as_str()), Some(status));
        }
        for status in [
            SalesOrderStatus::Draft,
            SalesOrderStatus::Confirmed,
            SalesOrderStatus::Cancelled,
        ] {
            assert_eq!(SalesOrderStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(QuotationStatus::from_str("expired"), None);
    }

    /// Test quotation totals carry no tax
    #[test]
    fn test_quotation_total_untaxed() {
        let total = sum_line_totals([(10i64, dec("100.00")), (2, dec("49.50"))]);
        assert_eq!(total, dec("1099.00"));
    }

    /// Test conversion prices quoted lines with the standard GST rate
    #[test]
    fn test_conversion_pricing() {
        // Quoted: 10 x 100.00. Converted order adds 18% GST.
        let quoted = [(10i64, dec("100.00"))];
        let totals = compute_totals(
            quoted
                .iter()
                .map(|&(quantity, price)| (quantity, price, standard_gst_rate())),
        );

        assert_eq!(totals.total_before_tax, dec("1000.00"));
        assert_eq!(totals.total_tax, dec("180.00"));
        assert_eq!(totals.total_amount, dec("1180.00"));
    }

    /// Test fulfilment arithmetic on an order line
    #[test]
    fn test_fulfilment_line() {
        assert_eq!(remaining_quantity(10, 0), 10);
        assert_eq!(remaining_quantity(10, 4), 6);
        assert_eq!(remaining_quantity(10, 10), 0);
        // Over-dispatch shows as fully dispatched, never negative
        assert_eq!(remaining_quantity(10, 12), 0);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn quotation_status_strategy() -> impl Strategy<Value = QuotationStatus> {
        prop::sample::select(QUOTATION_STATES.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Cancellation is available from exactly the non-cancelled states
        #[test]
        fn prop_cancel_from_any_live_state(from in quotation_status_strategy()) {
            prop_assert_eq!(
                from.can_transition_to(QuotationStatus::Cancelled),
                from != QuotationStatus::Cancelled
            );
        }

        /// Nothing ever leaves the cancelled state
        #[test]
        fn prop_cancelled_is_absorbing(to in quotation_status_strategy()) {
            prop_assert!(!QuotationStatus::Cancelled.can_transition_to(to));
        }

        /// Converted totals equal the quoted total plus 18% of it, for
        /// two-decimal quoted prices
        #[test]
        fn prop_conversion_adds_standard_gst(
            quoted in prop::collection::vec(
                (1i64..=500, (1i64..=100_000).prop_map(|n| Decimal::new(n, 2))),
                1..10
            )
        ) {
            let untaxed = sum_line_totals(quoted.iter().copied());
            let totals = compute_totals(
                quoted
                    .iter()
                    .map(|&(quantity, price)| (quantity, price, standard_gst_rate())),
            );

            prop_assert_eq!(totals.total_before_tax, untaxed);
            // Per-line rounding can shave tiny lines to zero tax, never below
            prop_assert!(totals.total_tax >= Decimal::ZERO);
            prop_assert!(totals.total_amount >= totals.total_before_tax);
        }

        /// Remaining quantity is non-negative and consistent with dispatch
        #[test]
        fn prop_remaining_quantity_consistent(
            ordered in 0i64..=10_000,
            dispatched in 0i64..=12_000
        ) {
            let remaining = remaining_quantity(ordered, dispatched);

            prop_assert!(remaining >= 0);
            prop_assert!(remaining <= ordered.max(0));
            if dispatched <= ordered {
                prop_assert_eq!(remaining, ordered - dispatched);
            } else {
                prop_assert_eq!(remaining, 0);
            }
        }

        /// Dispatching a line never increases what remains
        #[test]
        fn prop_dispatch_monotone(
            ordered in 1i64..=10_000,
            dispatched in 0i64..=10_000,
            delta in 1i64..=100
        ) {
            prop_assert!(
                remaining_quantity(ordered, dispatched + delta)
                    <= remaining_quantity(ordered, dispatched)
            );
        }
    }
}
