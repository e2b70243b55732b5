//! Payments provider integration.
//!
//! The provider is consumed through [`PaymentProvider`]; [`stripe::StripeClient`]
//! is the production implementation. Amounts always travel in integer minor
//! units of the configured store currency.

pub mod stripe;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storehouse_core::{CurrencyCode, PriceError};
use thiserror::Error;

pub use stripe::StripeClient;

/// Errors that can occur when talking to the payments provider.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider rejected the request.
    #[error("provider error ({status}): {message}")]
    Provider {
        status: u16,
        message: String,
        code: Option<String>,
    },

    /// The provider answered with something we could not read.
    #[error("parse error: {0}")]
    Parse(String),

    /// The amount cannot be expressed in minor units.
    #[error("invalid amount: {0}")]
    Amount(#[from] PriceError),
}

impl PaymentError {
    /// Message safe to show to the customer.
    #[must_use]
    pub fn customer_message(&self) -> &str {
        match self {
            Self::Provider { message, .. } => message,
            Self::Amount(_) => "The order total cannot be charged",
            Self::Http(_) | Self::Parse(_) => "The payment service is unavailable",
        }
    }
}

/// A customer record at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Parameters for creating a payment intent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPaymentIntent {
    /// Amount in minor units.
    pub amount: i64,
    pub currency: CurrencyCode,
    /// Recorded as `order_id` metadata.
    pub order_id: String,
    pub customer: Option<String>,
    /// Confirm immediately with this payment method.
    pub payment_method: Option<String>,
    /// Charge a saved card without the customer present.
    pub off_session: bool,
    /// Attach the confirmed card to `customer` for later off-session charges.
    pub setup_future_usage: bool,
    pub idempotency_key: Option<String>,
}

/// A payment intent as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    /// `off_session` when the card is kept for reuse.
    #[serde(default)]
    pub setup_future_usage: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    /// Whether the funds were captured.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

/// A setup intent, used to save a card for later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub status: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

impl SetupIntent {
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

/// Card details of a payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub brand: String,
    pub last4: String,
    pub exp_month: i32,
    pub exp_year: i32,
}

/// Billing details of a payment method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A payment method (card) stored at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodDetails {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub card: Option<CardDetails>,
    #[serde(default)]
    pub billing_details: BillingDetails,
}

/// Operations the storefront needs from the payments provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_customer(&self, email: &str) -> Result<Customer, PaymentError>;

    /// Create a payment intent; confirms it too when a payment method is given.
    async fn create_payment_intent(
        &self,
        params: &NewPaymentIntent,
    ) -> Result<PaymentIntent, PaymentError>;

    async fn confirm_payment_intent(
        &self,
        intent_id: &str,
        payment_method: &str,
    ) -> Result<PaymentIntent, PaymentError>;

    async fn retrieve_payment_intent(&self, intent_id: &str)
    -> Result<PaymentIntent, PaymentError>;

    async fn create_setup_intent(&self, customer: Option<&str>)
    -> Result<SetupIntent, PaymentError>;

    async fn confirm_setup_intent(
        &self,
        intent_id: &str,
        payment_method: &str,
    ) -> Result<SetupIntent, PaymentError>;

    async fn retrieve_payment_method(
        &self,
        payment_method: &str,
    ) -> Result<PaymentMethodDetails, PaymentError>;

    async fn attach_payment_method(
        &self,
        payment_method: &str,
        customer: &str,
    ) -> Result<PaymentMethodDetails, PaymentError>;
}
