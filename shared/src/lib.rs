//! Shared domain types for the Bahi ERP inventory core
//!
//! This crate contains the pure business rules (document taxonomy, stock
//! movement arithmetic, totals, validation) used by the backend engines and
//! usable by other components without a database connection.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
