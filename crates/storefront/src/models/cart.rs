//! Cart lines and favorites.
//!
//! Both collections are keyed by product: an owner holds at most one line
//! (or favorite entry) per product. Reconciliation between the anonymous
//! session copy and the account copy goes through the pure [`merge_lines`]
//! and [`merge_favorites`] functions so every backend agrees on the result.

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use storehouse_core::{ProductId, Quantity};

use super::product::{Product, ProductSnapshot};

/// Something a cart-like collection stores, one per product.
pub trait Item: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The product this entry refers to.
    fn product_id(&self) -> &ProductId;

    /// Fold `incoming` into `existing`, keeping one entry per product.
    fn merge(existing: Vec<Self>, incoming: &[Self]) -> Vec<Self>;
}

/// A single product line in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: Quantity,
    /// Price of one unit when the line was created.
    pub unit_price: Decimal,
    /// Always `quantity * unit_price`.
    pub line_total: Decimal,
    pub product: ProductSnapshot,
}

impl CartLine {
    /// Create a line for `product` priced at its current catalogue price.
    #[must_use]
    pub fn new(product: &Product, quantity: Quantity) -> Self {
        let mut line = Self {
            product_id: product.id.clone(),
            quantity,
            unit_price: product.price,
            line_total: Decimal::ZERO,
            product: product.snapshot(),
        };
        line.set_quantity(quantity);
        line
    }

    /// Replace the quantity and recompute the line total.
    pub fn set_quantity(&mut self, quantity: Quantity) {
        self.quantity = quantity;
        self.line_total = self.unit_price * Decimal::from(quantity.get());
    }

    /// Increase the quantity, capped at [`Quantity::MAX`].
    pub fn add_quantity(&mut self, quantity: Quantity) {
        self.set_quantity(self.quantity.saturating_add(quantity));
    }
}

impl Item for CartLine {
    fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    fn merge(existing: Vec<Self>, incoming: &[Self]) -> Vec<Self> {
        merge_lines(existing, incoming)
    }
}

/// A favorited product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    pub product_id: ProductId,
    pub product: ProductSnapshot,
}

impl FavoriteEntry {
    #[must_use]
    pub fn new(product: &Product) -> Self {
        Self {
            product_id: product.id.clone(),
            product: product.snapshot(),
        }
    }
}

impl Item for FavoriteEntry {
    fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    fn merge(existing: Vec<Self>, incoming: &[Self]) -> Vec<Self> {
        merge_favorites(existing, incoming)
    }
}

/// Merge cart lines by product.
///
/// Overlapping products have their quantities summed (capped at
/// [`Quantity::MAX`]) and keep the existing line's unit price. Products only
/// present in `incoming` are appended in their original order.
#[must_use]
pub fn merge_lines(mut existing: Vec<CartLine>, incoming: &[CartLine]) -> Vec<CartLine> {
    for line in incoming {
        match existing.iter_mut().find(|l| l.product_id == line.product_id) {
            Some(current) => current.add_quantity(line.quantity),
            None => existing.push(line.clone()),
        }
    }
    existing
}

/// Union of two favorite sets by product, existing entries first.
#[must_use]
pub fn merge_favorites(
    mut existing: Vec<FavoriteEntry>,
    incoming: &[FavoriteEntry],
) -> Vec<FavoriteEntry> {
    for entry in incoming {
        if !existing.iter().any(|e| e.product_id == entry.product_id) {
            existing.push(entry.clone());
        }
    }
    existing
}

/// Add `quantity` of `product` to `lines`, returning a copy of the resulting line.
pub fn add_to_lines(lines: &mut Vec<CartLine>, product: &Product, quantity: Quantity) -> CartLine {
    if let Some(line) = lines.iter_mut().find(|l| l.product_id == product.id) {
        line.add_quantity(quantity);
        return line.clone();
    }
    let line = CartLine::new(product, quantity);
    lines.push(line.clone());
    line
}
