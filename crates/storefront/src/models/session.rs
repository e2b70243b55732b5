//! Session-related types.
//!
//! The cookie session doubles as the anonymous visitor's local storage: cart
//! and favorites live here until sign-in, alongside the checkout draft id and
//! address selections that must survive a reload.

use serde::{Deserialize, Serialize};

use storehouse_core::{Email, UserId};

/// Session-stored user identity.
///
/// Minimal data stored in the session to identify the logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User's database ID.
    pub id: UserId,
    /// User's email address.
    pub email: Email,
}

/// Session keys.
pub mod keys {
    /// Key for storing the current logged-in user.
    pub const CURRENT_USER: &str = "current_user";

    /// Anonymous cart lines.
    pub const CART_ITEMS: &str = "cart_items";

    /// Anonymous favorites.
    pub const FAVORITE_ITEMS: &str = "favorite_items";

    /// Merge token minted for the anonymous cart set.
    pub const CART_MERGE_TOKEN: &str = "cart_merge_token";

    /// Merge token minted for the anonymous favorites set.
    pub const FAVORITE_MERGE_TOKEN: &str = "favorite_merge_token";

    /// Client-generated id of the in-progress order draft.
    pub const TEMP_ORDER_ID: &str = "temp_order_id";

    /// Delivery address picked on the checkout page.
    pub const SELECTED_DELIVERY_ADDRESS_ID: &str = "selected_delivery_address_id";

    /// Billing address picked on the checkout page.
    pub const SELECTED_BILLING_ADDRESS_ID: &str = "selected_billing_address_id";

    /// Snapshot of the last accepted order for the confirmation view.
    pub const LAST_ORDER: &str = "last_order";
}
