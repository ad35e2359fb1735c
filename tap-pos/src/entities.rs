//! Typed POS entities.
//!
//! Each entity lives in its own per-tenant collection; the id newtypes
//! keep references between them from crossing wires.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tap_store::{Entity, EntityKind};

/// Maximum price-history entries retained per product.
pub const PRICE_HISTORY_CAP: usize = 50;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new unique id
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a product
    ProductId
);
entity_id!(
    /// Unique identifier for a vendor
    VendorId
);
entity_id!(
    /// Unique identifier for a purchase
    PurchaseId
);
entity_id!(
    /// Unique identifier for a sale
    SaleId
);

/// One price observed for a product, appended at purchase time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub vendor_id: Option<VendorId>,
    pub unit_cost: f64,
    pub at: DateTime<Utc>,
}

/// A stocked product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: Option<String>,
    /// Retail price charged on sales
    pub selling_price: f64,
    pub stock_qty: i64,
    /// Recent cost history, oldest first, capped at [`PRICE_HISTORY_CAP`]
    pub price_history: Vec<PricePoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new<S: Into<String>>(name: S, selling_price: f64) -> Self {
        let now = Utc::now();
        Self {
            id: ProductId::new(),
            name: name.into(),
            category: None,
            selling_price,
            stock_qty: 0,
            price_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_category<S: Into<String>>(mut self, category: S) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_stock(mut self, stock_qty: i64) -> Self {
        self.stock_qty = stock_qty;
        self
    }

    /// Append a price point, dropping the oldest past the cap.
    pub fn push_price(&mut self, point: PricePoint) {
        self.price_history.push(point);
        if self.price_history.len() > PRICE_HISTORY_CAP {
            let excess = self.price_history.len() - PRICE_HISTORY_CAP;
            self.price_history.drain(..excess);
        }
    }
}

impl Entity for Product {
    const KIND: EntityKind = EntityKind::Product;

    fn id(&self) -> String {
        self.id.to_string()
    }
}

/// A supplier of stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: String,
    pub contact: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Vendor {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            id: VendorId::new(),
            name: name.into(),
            contact: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_contact<S: Into<String>>(mut self, contact: S) -> Self {
        self.contact = Some(contact.into());
        self
    }
}

impl Entity for Vendor {
    const KIND: EntityKind = EntityKind::Vendor;

    fn id(&self) -> String {
        self.id.to_string()
    }
}

/// Running inventory per (vendor, product): quantity received so far plus
/// the last price paid. Keyed deterministically so purchase workflows
/// upsert instead of duplicating rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorStock {
    pub id: String,
    pub vendor_id: VendorId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub last_unit_price: f64,
    pub last_purchase_at: DateTime<Utc>,
}

impl VendorStock {
    /// Deterministic document id for a (vendor, product) pair.
    pub fn key(vendor_id: &VendorId, product_id: &ProductId) -> String {
        format!("{vendor_id}:{product_id}")
    }

    pub fn new(vendor_id: VendorId, product_id: ProductId) -> Self {
        Self {
            id: Self::key(&vendor_id, &product_id),
            vendor_id,
            product_id,
            quantity: 0,
            last_unit_price: 0.0,
            last_purchase_at: Utc::now(),
        }
    }
}

impl Entity for VendorStock {
    const KIND: EntityKind = EntityKind::VendorStock;

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Payment status derived from paid amount vs total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    /// `Paid` if paid ≥ total, `Partial` if 0 < paid < total, else `Pending`.
    pub fn derive(paid: f64, total: f64) -> Self {
        if paid >= total {
            Self::Paid
        } else if paid > 0.0 {
            Self::Partial
        } else {
            Self::Pending
        }
    }
}

/// One line of a recorded purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub product_id: ProductId,
    /// Product name at purchase time
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub line_total: f64,
}

/// A recorded acquisition of stock from a vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub vendor_id: VendorId,
    pub items: Vec<PurchaseItem>,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
    pub paid_amount: f64,
    pub due_amount: f64,
    pub status: PaymentStatus,
    pub purchased_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Purchase {
    const KIND: EntityKind = EntityKind::Purchase;

    fn id(&self) -> String {
        self.id.to_string()
    }
}

/// One line of a recorded sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub line_total: f64,
}

/// A recorded sale to a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub items: Vec<SaleItem>,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
    pub paid_amount: f64,
    pub due_amount: f64,
    pub status: PaymentStatus,
    pub sold_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Sale {
    const KIND: EntityKind = EntityKind::Sale;

    fn id(&self) -> String {
        self.id.to_string()
    }
}
