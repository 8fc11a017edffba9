//! Stock ledger and movement arithmetic tests
//!
//! Tests for the movement planning layer including:
//! - Balance invariant: folding qty_in - qty_out reproduces every running balance
//! - Reversal symmetry: inverted plans exactly undo applied plans
//! - Negative-stock policy enforcement with shortfall reporting

use proptest::prelude::*;

use bahi_erp_backend::services::stock::StockRefType;
use shared::{
    apply_to_balance, dispatch_plan, invert_plan, receive_plan, running_balances, MovementDraft,
};

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Test inbound movement shape
    #[test]
    fn test_inbound_movement() {
        let m = MovementDraft::inbound(7, 1, 10);
        assert_eq!(m.qty_in, 10);
        assert_eq!(m.qty_out, 0);
        assert_eq!(m.net(), 10);
        assert_eq!(m.quantity(), 10);
        assert!(m.validate().is_ok());
    }

    /// Test outbound movement shape
    #[test]
    fn test_outbound_movement() {
        let m = MovementDraft::outbound(7, 1, 4);
        assert_eq!(m.qty_in, 0);
        assert_eq!(m.qty_out, 4);
        assert_eq!(m.net(), -4);
        assert_eq!(m.quantity(), 4);
        assert!(m.validate().is_ok());
    }

    /// Test movement validation rejects empty and two-sided movements
    #[test]
    fn test_movement_validation() {
        let empty = MovementDraft {
            product_id: 1,
            warehouse_id: 1,
            qty_in: 0,
            qty_out: 0,
        };
        assert!(empty.validate().is_err());

        let two_sided = MovementDraft {
            product_id: 1,
            warehouse_id: 1,
            qty_in: 5,
            qty_out: 5,
        };
        assert!(two_sided.validate().is_err());

        let negative = MovementDraft {
            product_id: 1,
            warehouse_id: 1,
            qty_in: -3,
            qty_out: 0,
        };
        assert!(negative.validate().is_err());
    }

    /// Test applying movements to a balance
    #[test]
    fn test_apply_to_balance() {
        let balance = apply_to_balance(0, &MovementDraft::inbound(1, 1, 10), false).unwrap();
        assert_eq!(balance, 10);

        let balance = apply_to_balance(balance, &MovementDraft::outbound(1, 1, 4), false).unwrap();
        assert_eq!(balance, 6);
    }

    /// Test the shortfall payload when stock would go negative
    #[test]
    fn test_shortfall_blocks_negative_balance() {
        let err = apply_to_balance(5, &MovementDraft::outbound(1, 1, 8), false).unwrap_err();
        assert_eq!(err.requested, 8);
        assert_eq!(err.available, 5);
    }

    /// Test the policy override allows negative balances
    #[test]
    fn test_negative_balance_allowed_by_policy() {
        let balance = apply_to_balance(5, &MovementDraft::outbound(1, 1, 8), true).unwrap();
        assert_eq!(balance, -3);
    }

    /// Test that a movement and its inverse cancel exactly
    #[test]
    fn test_reversal_restores_balance() {
        let movement = MovementDraft::outbound(3, 2, 7);
        let after = apply_to_balance(20, &movement, false).unwrap();
        assert_eq!(after, 13);

        let restored = apply_to_balance(after, &movement.invert(), false).unwrap();
        assert_eq!(restored, 20);
    }

    /// Test running balances over a movement sequence
    #[test]
    fn test_running_balances() {
        let movements = vec![
            MovementDraft::inbound(1, 1, 10),
            MovementDraft::outbound(1, 1, 4),
            MovementDraft::inbound(1, 1, 2),
        ];

        // 0 +10 = 10, 10 -4 = 6, 6 +2 = 8
        assert_eq!(running_balances(0, &movements), vec![10, 6, 8]);
    }

    /// Test receive plans target a single warehouse
    #[test]
    fn test_receive_plan() {
        let plan = receive_plan(4, &[(10, 5), (11, 3)]);

        assert_eq!(plan.len(), 2);
        for movement in &plan {
            assert_eq!(movement.warehouse_id, 4);
            assert_eq!(movement.qty_out, 0);
        }
        assert_eq!(plan[0].product_id, 10);
        assert_eq!(plan[0].qty_in, 5);
        assert_eq!(plan[1].product_id, 11);
        assert_eq!(plan[1].qty_in, 3);
    }

    /// Test dispatch plans without a destination produce only outbound legs
    #[test]
    fn test_dispatch_plan_no_destination() {
        let plan = dispatch_plan(1, None, &[(10, 5), (11, 3)]);

        assert_eq!(plan.len(), 2);
        for movement in &plan {
            assert_eq!(movement.warehouse_id, 1);
            assert_eq!(movement.qty_in, 0);
        }
    }

    /// Test dispatch plans with a destination pair each outbound with an inbound
    #[test]
    fn test_dispatch_plan_with_destination() {
        let plan = dispatch_plan(1, Some(2), &[(10, 5)]);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], MovementDraft::outbound(10, 1, 5));
        assert_eq!(plan[1], MovementDraft::inbound(10, 2, 5));
    }

    /// Test plan inversion swaps in and out on every movement
    #[test]
    fn test_invert_plan() {
        let plan = dispatch_plan(1, Some(2), &[(10, 5), (11, 3)]);
        let inverse = invert_plan(&plan);

        assert_eq!(plan.len(), inverse.len());
        for (forward, backward) in plan.iter().zip(&inverse) {
            assert_eq!(forward.qty_in, backward.qty_out);
            assert_eq!(forward.qty_out, backward.qty_in);
            assert_eq!(forward.product_id, backward.product_id);
            assert_eq!(forward.warehouse_id, backward.warehouse_id);
        }
    }

    /// Test ledger reference type string round-trips
    #[test]
    fn test_ref_type_round_trip() {
        let kinds = [
            StockRefType::Grn,
            StockRefType::DeliveryChallan,
            StockRefType::Transfer,
            StockRefType::Adjustment,
        ];

        for kind in kinds {
            assert_eq!(StockRefType::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(StockRefType::from_str("invoice"), None);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Strategy for a single valid movement
    fn movement_strategy() -> impl Strategy<Value = MovementDraft> {
        (1i64..=50, 1i64..=10, 1i64..=1000, any::<bool>()).prop_map(
            |(product_id, warehouse_id, quantity, inbound)| {
                if inbound {
                    MovementDraft::inbound(product_id, warehouse_id, quantity)
                } else {
                    MovementDraft::outbound(product_id, warehouse_id, quantity)
                }
            },
        )
    }

    /// Strategy for (product_id, quantity) document lines
    fn lines_strategy() -> impl Strategy<Value = Vec<(i64, i64)>> {
        prop::collection::vec((1i64..=50, 1i64..=1000), 1..10)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Balance invariant: every running balance equals the prior balance
        /// plus the movement's net effect, and the last equals start + Σ net
        #[test]
        fn prop_running_balances_fold_nets(
            start in 0i64..=10_000,
            movements in prop::collection::vec(movement_strategy(), 1..20)
        ) {
            let balances = running_balances(start, &movements);
            prop_assert_eq!(balances.len(), movements.len());

            let mut previous = start;
            for (movement, balance) in movements.iter().zip(&balances) {
                prop_assert_eq!(*balance, previous + movement.net());
                previous = *balance;
            }

            let net_sum: i64 = movements.iter().map(|m| m.net()).sum();
            prop_assert_eq!(*balances.last().unwrap(), start + net_sum);
        }

        /// Inverting a plan twice yields the original plan
        #[test]
        fn prop_invert_is_involution(
            lines in lines_strategy(),
            to in prop::option::of(1i64..=10)
        ) {
            let plan = dispatch_plan(11, to, &lines);
            prop_assert_eq!(invert_plan(&invert_plan(&plan)), plan);
        }

        /// A plan followed by its inverse leaves the balance where it started
        #[test]
        fn prop_plan_then_inverse_nets_zero(
            start in 0i64..=10_000,
            movements in prop::collection::vec(movement_strategy(), 1..20)
        ) {
            let mut round_trip = movements.clone();
            round_trip.extend(invert_plan(&movements));

            let balances = running_balances(start, &round_trip);
            prop_assert_eq!(*balances.last().unwrap(), start);
        }

        /// When the policy forbids negatives, a rejected movement reports the
        /// requested and available quantities and an accepted one never goes
        /// below zero
        #[test]
        fn prop_negative_policy_enforced(
            start in 0i64..=100,
            quantity in 1i64..=200
        ) {
            let movement = MovementDraft::outbound(1, 1, quantity);

            match apply_to_balance(start, &movement, false) {
                Ok(balance) => {
                    prop_assert!(balance >= 0);
                    prop_assert_eq!(balance, start - quantity);
                }
                Err(shortfall) => {
                    prop_assert!(quantity > start);
                    prop_assert_eq!(shortfall.requested, quantity);
                    prop_assert_eq!(shortfall.available, start);
                }
            }
        }

        /// With the policy relaxed the same movement always applies
        #[test]
        fn prop_negative_allowed_always_applies(
            start in 0i64..=100,
            quantity in 1i64..=200
        ) {
            let movement = MovementDraft::outbound(1, 1, quantity);
            let balance = apply_to_balance(start, &movement, true);
            prop_assert_eq!(balance, Ok(start - quantity));
        }

        /// Transfer-style dispatch plans conserve total stock across warehouses
        #[test]
        fn prop_transfer_plan_conserves_stock(lines in lines_strategy()) {
            let plan = dispatch_plan(1, Some(2), &lines);
            let net_sum: i64 = plan.iter().map(|m| m.net()).sum();
            prop_assert_eq!(net_sum, 0);
        }

        /// Every movement a plan produces passes validation
        #[test]
        fn prop_planned_movements_valid(
            lines in lines_strategy(),
            to in prop::option::of(1i64..=10)
        ) {
            for movement in dispatch_plan(11, to, &lines) {
                prop_assert!(movement.validate().is_ok());
            }
            for movement in receive_plan(11, &lines) {
                prop_assert!(movement.validate().is_ok());
            }
        }
    }
}
