//! Catalogue products.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use storehouse_core::ProductId;

/// A catalogue product. Read-only from the storefront's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub description: String,
    /// Unit price in the store currency's standard unit.
    pub price: Decimal,
    pub images: Vec<String>,
}

impl Product {
    /// Denormalised copy of the display fields, embedded in cart lines.
    #[must_use]
    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot {
            title: self.title.clone(),
            images: self.images.clone(),
            description: self.description.clone(),
        }
    }
}

/// Display fields copied from a product at the time it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub title: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub description: String,
}
