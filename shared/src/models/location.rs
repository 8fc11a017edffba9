//! Stock locations

use serde::{Deserialize, Serialize};

/// Where stock physically sits: a branch warehouse row, or the tenant's main
/// warehouse, which has no row of its own and is tracked on the product's
/// flat aggregate quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "warehouse_id", rename_all = "snake_case")]
pub enum StockLocation {
    Branch(i64),
    MainWarehouse,
}

impl StockLocation {
    /// Decode the nullable column form used by the stock_transfers table.
    pub fn from_branch_id(id: Option<i64>) -> Self {
        match id {
            Some(id) => StockLocation::Branch(id),
            None => StockLocation::MainWarehouse,
        }
    }

    /// Encode back to the nullable column form.
    pub fn branch_id(&self) -> Option<i64> {
        match self {
            StockLocation::Branch(id) => Some(*id),
            StockLocation::MainWarehouse => None,
        }
    }

    pub fn is_main(&self) -> bool {
        matches!(self, StockLocation::MainWarehouse)
    }
}

impl std::fmt::Display for StockLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockLocation::Branch(id) => write!(f, "warehouse {}", id),
            StockLocation::MainWarehouse => write!(f, "main warehouse"),
        }
    }
}
