//! Domain models for the Bahi ERP inventory core

mod document;
mod location;
mod stock;

pub use document::*;
pub use location::*;
pub use stock::*;
