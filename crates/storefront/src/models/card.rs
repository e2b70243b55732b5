//! Cards saved with the payments provider.

use chrono::{DateTime, Utc};
use serde::Serialize;

use storehouse_core::{SavedCardId, UserId};

/// A card the user chose to keep for later purchases.
///
/// Only the provider's payment method token and display details are stored;
/// the card number never reaches this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedCard {
    pub id: SavedCardId,
    #[serde(skip_serializing)]
    pub user_id: UserId,
    /// Provider payment method id (`pm_...`).
    pub card_token: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: i32,
    pub exp_year: i32,
    pub holder_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SavedCard {
    /// Human-readable label, e.g. `visa ending in 4242`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} ending in {}", self.brand, self.last4)
    }
}

/// Fields needed to persist a new saved card.
#[derive(Debug, Clone)]
pub struct NewSavedCard {
    pub card_token: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: i32,
    pub exp_year: i32,
    pub holder_name: Option<String>,
}
