//! Database operations for storefront `PostgreSQL`.
//!
//! # Schema: `storefront`
//!
//! ## Tables
//!
//! - `user`, `user_password`, `user_details` - Accounts and profile data
//! - `session` - Tower-sessions storage
//! - `user_address` - Address book (one `is_default` row per user)
//! - `cart_line`, `favorite` - Signed-in cart and favorites
//! - `cart_merge` - Ledger of applied sign-in merges
//! - `order_draft` - In-progress checkout, keyed by the session's draft id
//! - `submitted_order` - Accepted orders, unique per draft
//! - `saved_card` - Provider card tokens kept for reuse
//! - `product` - Read-only catalogue
//!
//! Every repository is a trait so the services can run against the
//! in-memory stores used by the tests; the `Pg*` types are the production
//! implementations.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p storehouse-cli -- migrate
//! ```

pub mod accounts;
pub mod addresses;
pub mod cards;
pub mod cart;
pub mod drafts;
pub mod favorites;
pub mod items;
pub mod orders;
pub mod products;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use accounts::{AccountRepository, PgAccountRepository};
pub use addresses::{AddressRemoval, AddressRepository, PgAddressRepository};
pub use cards::{CardRepository, PgCardRepository};
pub use cart::PgCartRepository;
pub use drafts::{DraftField, DraftRepository, PgDraftRepository};
pub use favorites::PgFavoriteRepository;
pub use items::{ItemRepository, ItemStore, RemoteItems, SessionItems};
pub use orders::{OrderRepository, PgOrderRepository};
pub use products::{PgProductRepository, ProductRepository};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Reading or writing the visitor's session failed.
    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique email).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Map a unique violation to [`RepositoryError::Conflict`].
    pub(crate) fn conflict_on_unique(err: sqlx::Error, message: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::Conflict(message.to_owned());
        }
        Self::Database(err)
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
