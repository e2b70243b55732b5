//! Business logic services for storefront.
//!
//! # Services
//!
//! - `accounts` - Password registration and login
//! - `cart` - Local-first cart and favorites with sign-in reconciliation
//! - `catalog` - Cached product lookups
//! - `addresses` - Address book with a single default per user
//! - `checkout` - Order draft bound to the visitor's session
//! - `payment` - Payment orchestration and order acceptance
//! - `history` - Submitted order listing
//! - `email` - Order confirmation emails
//!
//! Services are built once at start-up and live in `AppState`. Per-request
//! views (`CartCache`, `CheckoutSession`) borrow a service together with the
//! visitor's session.

pub mod accounts;
pub mod addresses;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod email;
pub mod history;
pub mod payment;

use std::fmt::Display;
use std::future::Future;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::db::RepositoryError;
use crate::payments::PaymentError;

pub use accounts::{AccountService, AuthError};
pub use addresses::AddressBook;
pub use cart::{CartCache, CartService, FavoritesCache};
pub use catalog::ProductCatalog;
pub use checkout::{CheckoutService, CheckoutSession, OrderPlan};
pub use email::{ConfirmationLine, ConfirmationMailer, MailError, OrderConfirmation, SmtpMailer};
pub use history::OrderHistory;
pub use payment::{
    CardIntent, ConfirmationLatch, PaymentDeps, PaymentOrchestrator, SubmitOutcome, SubmitRequest,
};

/// Errors surfaced by the checkout services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Required input is missing or malformed.
    #[error("invalid input: {}", missing.join(", "))]
    Validation { missing: Vec<&'static str> },

    /// The operation needs a signed-in user.
    #[error("sign-in required")]
    AuthRequired,

    /// The payments provider failed or declined.
    #[error("payment provider error: {0}")]
    Provider(#[from] PaymentError),

    /// Reading or writing stored data failed.
    #[error("data access error: {0}")]
    DataAccess(#[from] RepositoryError),

    /// Submission attempted with selections missing.
    #[error("order is incomplete: missing {}", missing.join(", "))]
    IncompleteOrder { missing: Vec<&'static str> },

    /// The selected saved card does not belong to the user.
    #[error("saved card is not available")]
    InvalidSavedCard,

    /// The referenced record does not exist or belongs to someone else.
    #[error("not found")]
    NotFound,
}

impl ServiceError {
    pub(crate) fn invalid(field: &'static str) -> Self {
        Self::Validation {
            missing: vec![field],
        }
    }
}

impl From<tower_sessions::session::Error> for ServiceError {
    fn from(err: tower_sessions::session::Error) -> Self {
        Self::DataAccess(RepositoryError::Session(err))
    }
}

/// Run `task` in the background. Failures are logged, never returned.
pub fn spawn_detached<F, E>(label: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(
        async move {
            if let Err(e) = task.await {
                tracing::error!(task = label, error = %e, "Background task failed");
            }
        }
        .in_current_span(),
    )
}
