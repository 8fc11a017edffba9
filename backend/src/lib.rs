//! Bahi ERP inventory document and stock-ledger engine
//!
//! Seven business documents (GRN, delivery challan, sales invoice, sales
//! order, quotation, purchase order, stock transfer), each with a status
//! state machine whose stock-affecting transitions mutate per-warehouse
//! branch stock and append to the immutable stock ledger inside one database
//! transaction. HTTP, auth, and presentation live outside this crate; every
//! operation takes an already-authorized actor id.

pub mod config;
pub mod error;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
