//! Business logic services for the Bahi ERP inventory engine

pub mod catalog;
pub mod delivery_challan;
pub mod grn;
pub mod numbering;
pub mod purchase_order;
pub mod quotation;
pub mod sales_invoice;
pub mod sales_order;
pub mod settings;
pub mod stock;
pub mod stock_transfer;
pub mod workflow;

pub use catalog::CatalogService;
pub use delivery_challan::DeliveryChallanService;
pub use grn::GrnService;
pub use numbering::DocumentNumbers;
pub use purchase_order::PurchaseOrderService;
pub use quotation::QuotationService;
pub use sales_invoice::SalesInvoiceService;
pub use sales_order::SalesOrderService;
pub use settings::{ConfigProvider, DbConfigProvider, SettingsService, StaticConfigProvider};
pub use stock::StockService;
pub use stock_transfer::StockTransferService;
pub use workflow::WorkflowService;
