//! User domain types.

use chrono::{DateTime, Utc};

use storehouse_core::{Email, UserId};

/// A storefront account.
#[derive(Debug, Clone)]
pub struct User {
    /// Unique user ID.
    pub id: UserId,
    /// User's email address.
    pub email: Email,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
}

/// Profile data kept next to the account.
#[derive(Debug, Clone, Default)]
pub struct UserDetails {
    /// Display name used in confirmation emails.
    pub full_name: Option<String>,
    /// Customer id at the payments provider, created on first card save.
    pub payment_customer_id: Option<String>,
}
