//! Order drafts, summaries, and submitted orders.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use storehouse_core::{
    AddressId, DraftId, OrderId, OrderStatus, PaymentMethod, ProductId, Quantity, UserId,
};

use super::address::AddressSnapshot;
use super::cart::CartLine;

/// One line of an order summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryLine {
    pub product_id: ProductId,
    pub title: String,
    pub quantity: Quantity,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    #[serde(default)]
    pub image: Option<String>,
}

impl From<&CartLine> for SummaryLine {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product_id.clone(),
            title: line.product.title.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total,
            image: line.product.images.first().cloned(),
        }
    }
}

/// Priced view of the cart attached to a draft.
///
/// `total` is always `subtotal + delivery_cost`, where `subtotal` is the sum
/// of the line totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub lines: Vec<SummaryLine>,
    pub subtotal: Decimal,
    pub delivery_cost: Decimal,
    pub total: Decimal,
}

impl OrderSummary {
    /// Price the given cart lines.
    #[must_use]
    pub fn compute(lines: &[CartLine], delivery_cost: Decimal) -> Self {
        let subtotal = lines.iter().map(|l| l.line_total).sum::<Decimal>();
        Self {
            lines: lines.iter().map(SummaryLine::from).collect(),
            subtotal,
            delivery_cost,
            total: subtotal + delivery_cost,
        }
    }

    /// Whether the stored totals agree with the lines.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let subtotal = self.lines.iter().map(|l| l.line_total).sum::<Decimal>();
        subtotal == self.subtotal && self.total == self.subtotal + self.delivery_cost
    }
}

/// How a card payment is funded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CardSelection {
    /// Card details entered at checkout.
    New,
    /// A card saved earlier, referenced by its provider token.
    Saved { token: String },
}

/// Resolved payment path for a complete draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentMode {
    NewCard,
    SavedCard { token: String },
    CashOnDelivery,
}

/// An order being assembled at checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub id: DraftId,
    pub user_id: UserId,
    pub delivery_address_id: Option<AddressId>,
    pub billing_address_id: Option<AddressId>,
    pub payment_method: Option<PaymentMethod>,
    pub card_selection: Option<CardSelection>,
    /// `None` when nothing was persisted yet or the stored value was unreadable.
    pub summary: Option<OrderSummary>,
    pub updated_at: DateTime<Utc>,
}

impl OrderDraft {
    /// A fresh draft with every selection empty.
    #[must_use]
    pub fn new(id: DraftId, user_id: UserId) -> Self {
        Self {
            id,
            user_id,
            delivery_address_id: None,
            billing_address_id: None,
            payment_method: None,
            card_selection: None,
            summary: None,
            updated_at: Utc::now(),
        }
    }

    /// Names of the selections still required before submission.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.delivery_address_id.is_none() {
            missing.push("delivery_address");
        }
        if self.billing_address_id.is_none() {
            missing.push("billing_address");
        }
        match self.payment_method {
            None => missing.push("payment_method"),
            Some(PaymentMethod::Card) if self.card_selection.is_none() => {
                missing.push("card_selection");
            }
            Some(_) => {}
        }
        missing
    }

    /// Resolve the payment path, or name the missing selections.
    ///
    /// # Errors
    ///
    /// Returns the list from [`OrderDraft::missing_fields`] when it is not empty.
    pub fn payment_mode(&self) -> Result<PaymentMode, Vec<&'static str>> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(missing);
        }
        match (self.payment_method, &self.card_selection) {
            (Some(PaymentMethod::CashOnDelivery), _) => Ok(PaymentMode::CashOnDelivery),
            (Some(PaymentMethod::Card), Some(CardSelection::Saved { token })) => {
                Ok(PaymentMode::SavedCard {
                    token: token.clone(),
                })
            }
            (Some(PaymentMethod::Card), Some(CardSelection::New)) => Ok(PaymentMode::NewCard),
            (Some(PaymentMethod::Card), None) => Err(vec!["card_selection"]),
            (None, _) => Err(vec!["payment_method"]),
        }
    }

    /// Whether either address slot points at `address`.
    #[must_use]
    pub fn references(&self, address: AddressId) -> bool {
        self.delivery_address_id == Some(address) || self.billing_address_id == Some(address)
    }
}

/// A product line frozen into a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedProduct {
    pub product_id: ProductId,
    pub title: String,
    pub quantity: Quantity,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    #[serde(default)]
    pub image: Option<String>,
}

impl From<&SummaryLine> for OrderedProduct {
    fn from(line: &SummaryLine) -> Self {
        Self {
            product_id: line.product_id.clone(),
            title: line.title.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total,
            image: line.image.clone(),
        }
    }
}

/// An accepted order. Immutable once written, apart from the payment summary
/// being upgraded after a card is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedOrder {
    pub id: OrderId,
    pub draft_id: DraftId,
    #[serde(skip_serializing)]
    pub user_id: UserId,
    pub order_number: String,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub delivery_address: AddressSnapshot,
    pub billing_address: AddressSnapshot,
    pub payment_summary: String,
    pub products_ordered: Vec<OrderedProduct>,
    pub delivery_cost: Decimal,
    pub order_total: Decimal,
}

/// Fields for inserting a submitted order.
#[derive(Debug, Clone)]
pub struct NewSubmittedOrder {
    pub draft_id: DraftId,
    pub user_id: UserId,
    pub order_number: String,
    pub status: OrderStatus,
    pub delivery_address: AddressSnapshot,
    pub billing_address: AddressSnapshot,
    pub payment_summary: String,
    pub products_ordered: Vec<OrderedProduct>,
    pub delivery_cost: Decimal,
    pub order_total: Decimal,
}

/// What the confirmation view needs after the cart has been cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationSnapshot {
    pub draft_id: DraftId,
    pub order_number: String,
    pub order_total: Decimal,
    pub delivery_cost: Decimal,
    pub payment_summary: String,
    pub lines: Vec<OrderedProduct>,
    pub created_at: DateTime<Utc>,
}

impl From<&SubmittedOrder> for ConfirmationSnapshot {
    fn from(order: &SubmittedOrder) -> Self {
        Self {
            draft_id: order.draft_id,
            order_number: order.order_number.clone(),
            order_total: order.order_total,
            delivery_cost: order.delivery_cost,
            payment_summary: order.payment_summary.clone(),
            lines: order.products_ordered.clone(),
            created_at: order.created_at,
        }
    }
}
