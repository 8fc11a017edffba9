//! Stock movement arithmetic
//!
//! Pure quantity math shared by the ledger service, the document engines,
//! and the test suites. A movement is applied to a running balance under the
//! tenant's negative-stock policy; reversals are exact inversions of the
//! originally applied movements.

use serde::{Deserialize, Serialize};

/// One planned quantity movement against a (product, warehouse) key.
/// Exactly one of `qty_in`/`qty_out` is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub product_id: i64,
    pub warehouse_id: i64,
    pub qty_in: i64,
    pub qty_out: i64,
}

impl MovementDraft {
    /// A movement bringing `quantity` units into a warehouse.
    pub fn inbound(product_id: i64, warehouse_id: i64, quantity: i64) -> Self {
        Self {
            product_id,
            warehouse_id,
            qty_in: quantity,
            qty_out: 0,
        }
    }

    /// A movement taking `quantity` units out of a warehouse.
    pub fn outbound(product_id: i64, warehouse_id: i64, quantity: i64) -> Self {
        Self {
            product_id,
            warehouse_id,
            qty_in: 0,
            qty_out: quantity,
        }
    }

    /// The exact reversing movement (in and out swapped).
    pub fn invert(&self) -> Self {
        Self {
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            qty_in: self.qty_out,
            qty_out: self.qty_in,
        }
    }

    /// Signed effect on the balance.
    pub fn net(&self) -> i64 {
        self.qty_in - self.qty_out
    }

    /// The moved quantity, whichever side it is on.
    pub fn quantity(&self) -> i64 {
        self.qty_in.max(self.qty_out)
    }

    /// A movement must move something, on exactly one side.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.qty_in < 0 || self.qty_out < 0 {
            return Err("Movement quantities cannot be negative");
        }
        if (self.qty_in == 0) == (self.qty_out == 0) {
            return Err("Exactly one of qty_in/qty_out must be non-zero");
        }
        Ok(())
    }
}

/// Why a movement cannot be applied at the current balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockShortfall {
    pub requested: i64,
    pub available: i64,
}

/// Applies one movement to a running balance. When `allow_negative` is false
/// and the result would drop below zero, nothing is applied and the shortfall
/// is reported.
pub fn apply_to_balance(
    current: i64,
    movement: &MovementDraft,
    allow_negative: bool,
) -> Result<i64, StockShortfall> {
    let next = current + movement.qty_in - movement.qty_out;
    if next < 0 && !allow_negative {
        return Err(StockShortfall {
            requested: movement.qty_out,
            available: current,
        });
    }
    Ok(next)
}

/// Movements for receiving `(product_id, quantity)` lines into one warehouse.
pub fn receive_plan(warehouse_id: i64, items: &[(i64, i64)]) -> Vec<MovementDraft> {
    items
        .iter()
        .map(|&(product_id, quantity)| MovementDraft::inbound(product_id, warehouse_id, quantity))
        .collect()
}

/// Movements for dispatching `(product_id, quantity)` lines out of `from`,
/// and into `to` when the dispatch is a warehouse transfer.
pub fn dispatch_plan(
    from_warehouse_id: i64,
    to_warehouse_id: Option<i64>,
    items: &[(i64, i64)],
) -> Vec<MovementDraft> {
    let mut plan = Vec::with_capacity(items.len() * 2);
    for &(product_id, quantity) in items {
        plan.push(MovementDraft::outbound(
            product_id,
            from_warehouse_id,
            quantity,
        ));
        if let Some(to) = to_warehouse_id {
            plan.push(MovementDraft::inbound(product_id, to, quantity));
        }
    }
    plan
}

/// The exact inverse of a previously applied plan.
pub fn invert_plan(plan: &[MovementDraft]) -> Vec<MovementDraft> {
    plan.iter().map(MovementDraft::invert).collect()
}

/// Folds movements over a starting balance, yielding every post-movement
/// balance, the sequence the ledger's `balance_qty` column records.
pub fn running_balances(start: i64, movements: &[MovementDraft]) -> Vec<i64> {
    let mut balance = start;
    movements
        .iter()
        .map(|m| {
            balance += m.net();
            balance
        })
        .collect()
}
