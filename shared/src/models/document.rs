//! Document taxonomy, money totals, and fulfilment arithmetic

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The closed set of document types the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Grn,
    DeliveryChallan,
    SalesInvoice,
    SalesOrder,
    Quotation,
    PurchaseOrder,
    StockTransfer,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 7] = [
        DocumentKind::Grn,
        DocumentKind::DeliveryChallan,
        DocumentKind::SalesInvoice,
        DocumentKind::SalesOrder,
        DocumentKind::Quotation,
        DocumentKind::PurchaseOrder,
        DocumentKind::StockTransfer,
    ];

    pub const DEFAULT_PADDING: u32 = 4;

    /// Series key used for numbering counters and the
    /// `docSeries.<series>.prefix` / `docSeries.<series>.padding` config keys.
    pub fn series(&self) -> &'static str {
        match self {
            DocumentKind::Grn => "grn",
            DocumentKind::DeliveryChallan => "dc",
            DocumentKind::SalesInvoice => "invoice",
            DocumentKind::SalesOrder => "so",
            DocumentKind::Quotation => "qt",
            DocumentKind::PurchaseOrder => "po",
            DocumentKind::StockTransfer => "transfer",
        }
    }

    /// Built-in number prefix, overridable per tenant via configuration.
    pub fn default_prefix(&self) -> &'static str {
        match self {
            DocumentKind::Grn => "GRN-",
            DocumentKind::DeliveryChallan => "DC-",
            DocumentKind::SalesInvoice => "INV-",
            DocumentKind::SalesOrder => "SO-",
            DocumentKind::Quotation => "QT-",
            DocumentKind::PurchaseOrder => "PO-",
            DocumentKind::StockTransfer => "TRF-",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DocumentKind::Grn => "goods receipt note",
            DocumentKind::DeliveryChallan => "delivery challan",
            DocumentKind::SalesInvoice => "sales invoice",
            DocumentKind::SalesOrder => "sales order",
            DocumentKind::Quotation => "quotation",
            DocumentKind::PurchaseOrder => "purchase order",
            DocumentKind::StockTransfer => "stock transfer",
        }
    }
}

/// GST rate applied when quotation lines are converted to order lines.
pub fn standard_gst_rate() -> Decimal {
    Decimal::from(18)
}

/// Document money totals, frozen once the document leaves draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub total_before_tax: Decimal,
    pub total_tax: Decimal,
    pub total_amount: Decimal,
}

/// `quantity × unit price`, rounded to two decimal places.
pub fn line_total(quantity: i64, unit_price: Decimal) -> Decimal {
    (Decimal::from(quantity) * unit_price).round_dp(2)
}

/// Tax on a line total at a percent rate, rounded to two decimal places.
pub fn tax_amount(line_total: Decimal, tax_rate: Decimal) -> Decimal {
    (line_total * tax_rate / Decimal::from(100)).round_dp(2)
}

/// Sums `(quantity, unit_price, tax_rate)` lines into document totals.
pub fn compute_totals<I>(lines: I) -> DocumentTotals
where
    I: IntoIterator<Item = (i64, Decimal, Decimal)>,
{
    let mut totals = DocumentTotals::default();
    for (quantity, unit_price, tax_rate) in lines {
        let line = line_total(quantity, unit_price);
        totals.total_before_tax += line;
        totals.total_tax += tax_amount(line, tax_rate);
    }
    totals.total_amount = totals.total_before_tax + totals.total_tax;
    totals
}

/// Untaxed document total over `(quantity, unit_price)` lines
/// (GRN, purchase order, quotation).
pub fn sum_line_totals<I>(lines: I) -> Decimal
where
    I: IntoIterator<Item = (i64, Decimal)>,
{
    lines
        .into_iter()
        .map(|(quantity, unit_price)| line_total(quantity, unit_price))
        .sum()
}

/// Quantity still to dispatch on an order line.
pub fn remaining_quantity(ordered: i64, dispatched: i64) -> i64 {
    (ordered - dispatched).max(0)
}
