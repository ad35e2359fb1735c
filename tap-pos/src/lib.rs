//! tap-pos: retail POS workflows for TapRS.
//!
//! Typed entities plus the transactional business operations of a liquor
//! retail POS: purchases (stock in, vendor stock, price history), sales
//! (stock out with a floor at zero), payments, and reporting. Every
//! operation is tenant-scoped and rides the tap-store transaction layer,
//! so partial writes are impossible by construction.

pub mod entities;
pub mod payment;
pub mod purchase;
pub mod reports;
pub mod sale;
pub mod service;

pub use entities::{
    PaymentStatus, PricePoint, Product, ProductId, Purchase, PurchaseId, PurchaseItem, Sale,
    SaleId, SaleItem, Vendor, VendorId, VendorStock, PRICE_HISTORY_CAP,
};
pub use purchase::{PurchaseDraft, PurchaseLine};
pub use reports::{business_day_window, PurchaseReport, StockLine, BUSINESS_DAY_START_HOUR};
pub use sale::{SaleDraft, SaleLine};
pub use service::{PosService, RetryPolicy};
