//! Payment orchestration and order acceptance.
//!
//! A complete draft resolves to a [`PaymentMode`]; each mode talks to the
//! provider differently, but all of them end in [`PaymentOrchestrator::accept`],
//! which records the order once per draft and schedules the follow-up work.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use storehouse_core::{OrderStatus, UserId};

use super::{
    CartService, CheckoutService, CheckoutSession, ConfirmationMailer, OrderConfirmation,
    OrderPlan, ServiceError, spawn_detached,
};
use crate::config::CheckoutConfig;
use crate::db::{AccountRepository, CardRepository, OrderRepository, RepositoryError};
use crate::models::{
    CartLine, ConfirmationSnapshot, CurrentUser, NewSavedCard, NewSubmittedOrder, OrderedProduct,
    PaymentMode, SavedCard, SubmittedOrder, session_keys as keys,
};
use crate::payments::{NewPaymentIntent, PaymentError, PaymentIntent, PaymentProvider};

/// Attempts at drawing an unused order number.
const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// How long a claimed confirmation stays claimed.
const LATCH_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Client-side card collection handle for a new-card payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardIntent {
    pub client_secret: String,
    pub intent_id: String,
    /// Minor units.
    pub amount: i64,
}

/// Submission from the checkout page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubmitRequest {
    /// Intent created by [`PaymentOrchestrator::start_new_card`].
    pub payment_intent_id: Option<String>,
    /// Card collected by the client, for confirming the intent.
    pub payment_method_id: Option<String>,
}

/// Result of a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub order: SubmittedOrder,
    /// Set when the card was saved for later.
    pub saved_card: Option<SavedCard>,
}

/// Single-shot guard for confirmation emails.
///
/// The first claim of a key wins; later claims within a day are refused
/// until the key is released.
#[derive(Clone)]
pub struct ConfirmationLatch {
    claimed: Cache<String, ()>,
}

impl Default for ConfirmationLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationLatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            claimed: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(LATCH_TTL)
                .build(),
        }
    }

    /// Returns `true` for the first claim of `key` only.
    pub async fn claim(&self, key: &str) -> bool {
        self.claimed
            .entry(key.to_owned())
            .or_insert(())
            .await
            .is_fresh()
    }

    /// Let the next claim of `key` win again.
    pub async fn release(&self, key: &str) {
        self.claimed.invalidate(key).await;
    }
}

/// Repositories and collaborators the orchestrator drives.
pub struct PaymentDeps {
    pub provider: Arc<dyn PaymentProvider>,
    pub accounts: Arc<dyn AccountRepository>,
    pub cards: Arc<dyn CardRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub mailer: Arc<dyn ConfirmationMailer>,
}

/// Charges drafts and turns them into submitted orders.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    deps: PaymentDeps,
    carts: CartService,
    checkout: CheckoutService,
    latch: ConfirmationLatch,
    config: CheckoutConfig,
}

impl PaymentOrchestrator {
    #[must_use]
    pub fn new(
        deps: PaymentDeps,
        carts: CartService,
        checkout: CheckoutService,
        latch: ConfirmationLatch,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                deps,
                carts,
                checkout,
                latch,
                config,
            }),
        }
    }

    /// The provider customer for `user`, created on first use.
    async fn ensure_customer(&self, user: &CurrentUser) -> Result<String, ServiceError> {
        let deps = &self.inner.deps;
        if let Some(id) = deps.accounts.details(user.id).await?.payment_customer_id {
            return Ok(id);
        }

        let customer = deps.provider.create_customer(user.email.as_str()).await?;
        deps.accounts
            .set_payment_customer(user.id, &customer.id)
            .await?;
        info!(user_id = %user.id, customer_id = %customer.id, "Created payment customer");
        Ok(customer.id)
    }

    /// Create the payment intent for a new-card checkout.
    ///
    /// Repeating the call for an unchanged total returns the same intent.
    /// With `save_card` the provider keeps the card for the customer once
    /// the intent is confirmed.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::IncompleteOrder` for an incomplete draft,
    /// `ServiceError::Validation` if the draft is not set to pay with a new
    /// card, or `ServiceError::Provider` if the provider fails.
    #[instrument(skip(self, checkout, cart), fields(user_id = %checkout.user().id))]
    pub async fn start_new_card(
        &self,
        checkout: &CheckoutSession,
        cart: &[CartLine],
        save_card: bool,
    ) -> Result<CardIntent, ServiceError> {
        let plan = checkout.plan(cart).await?;
        if plan.mode != PaymentMode::NewCard {
            return Err(ServiceError::invalid("card_selection"));
        }

        let customer = self.ensure_customer(checkout.user()).await?;
        let mut idempotency_key = format!("draft-{}-{}", plan.draft.id, plan.amount_minor);
        if save_card {
            idempotency_key.push_str("-save");
        }
        let intent = self
            .inner
            .deps
            .provider
            .create_payment_intent(&NewPaymentIntent {
                amount: plan.amount_minor,
                currency: self.inner.config.currency,
                order_id: plan.draft.id.to_string(),
                customer: Some(customer),
                setup_future_usage: save_card,
                idempotency_key: Some(idempotency_key),
                ..NewPaymentIntent::default()
            })
            .await?;

        let client_secret = intent
            .client_secret
            .ok_or_else(|| PaymentError::Parse("payment intent has no client secret".to_string()))?;

        Ok(CardIntent {
            client_secret,
            intent_id: intent.id,
            amount: plan.amount_minor,
        })
    }

    /// Charge the draft according to its payment mode and record the order.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::IncompleteOrder` for an incomplete draft,
    /// `ServiceError::InvalidSavedCard` for an unknown saved card, and
    /// `ServiceError::Provider` when the provider declines or fails. Nothing
    /// is retried.
    #[instrument(skip(self, checkout, cart, request), fields(user_id = %checkout.user().id))]
    pub async fn submit(
        &self,
        checkout: &CheckoutSession,
        cart: &[CartLine],
        request: SubmitRequest,
    ) -> Result<SubmitOutcome, ServiceError> {
        let plan = checkout.plan(cart).await?;

        let (status, payment_summary, card_to_save) = match &plan.mode {
            PaymentMode::NewCard => {
                let intent = self.settle_new_card(&plan, &request).await?;
                let card_to_save = if intent.setup_future_usage.is_some() {
                    intent
                        .payment_method
                        .or_else(|| request.payment_method_id.clone())
                } else {
                    None
                };
                (OrderStatus::Paid, "Card".to_string(), card_to_save)
            }
            PaymentMode::SavedCard { token } => {
                let card = self.charge_saved_card(checkout.user(), &plan, token).await?;
                (OrderStatus::Paid, card.label(), None)
            }
            PaymentMode::CashOnDelivery => (
                OrderStatus::AwaitingPayment,
                "Cash on delivery".to_string(),
                None,
            ),
        };

        let mut order = self
            .accept(checkout, &plan, status, payment_summary)
            .await?;

        let saved_card = match card_to_save {
            Some(payment_method) => {
                match self
                    .save_card(checkout.user(), &mut order, &payment_method)
                    .await
                {
                    Ok(card) => Some(card),
                    Err(e) => {
                        warn!(
                            error = %e,
                            order_number = %order.order_number,
                            "Card could not be saved"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        Ok(SubmitOutcome { order, saved_card })
    }

    /// Make sure the client-side intent for this draft went through.
    async fn settle_new_card(
        &self,
        plan: &OrderPlan,
        request: &SubmitRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let provider = &self.inner.deps.provider;
        let intent_id = request
            .payment_intent_id
            .as_deref()
            .ok_or_else(|| ServiceError::invalid("payment_intent_id"))?;

        let mut intent = provider.retrieve_payment_intent(intent_id).await?;
        let draft_id = plan.draft.id.to_string();
        if intent.amount != plan.amount_minor
            || intent.metadata.get("order_id") != Some(&draft_id)
        {
            warn!(
                intent_id,
                amount = intent.amount,
                expected = plan.amount_minor,
                "Intent does not match draft"
            );
            return Err(PaymentError::Provider {
                status: 409,
                message: "The payment does not match this order".to_string(),
                code: None,
            }
            .into());
        }

        if !intent.is_succeeded()
            && let Some(payment_method) = request.payment_method_id.as_deref()
        {
            intent = provider
                .confirm_payment_intent(&intent.id, payment_method)
                .await?;
        }

        if !intent.is_succeeded() {
            return Err(not_completed());
        }
        Ok(intent)
    }

    async fn charge_saved_card(
        &self,
        user: &CurrentUser,
        plan: &OrderPlan,
        token: &str,
    ) -> Result<SavedCard, ServiceError> {
        let card = self
            .inner
            .deps
            .cards
            .find_by_token(user.id, token)
            .await?
            .ok_or(ServiceError::InvalidSavedCard)?;
        let customer = self.ensure_customer(user).await?;

        let intent = self
            .inner
            .deps
            .provider
            .create_payment_intent(&NewPaymentIntent {
                amount: plan.amount_minor,
                currency: self.inner.config.currency,
                order_id: plan.draft.id.to_string(),
                customer: Some(customer),
                payment_method: Some(card.card_token.clone()),
                off_session: true,
                idempotency_key: Some(format!(
                    "draft-{}-saved-{}-{}",
                    plan.draft.id, card.card_token, plan.amount_minor
                )),
                ..NewPaymentIntent::default()
            })
            .await?;

        if !intent.is_succeeded() {
            return Err(not_completed());
        }
        Ok(card)
    }

    /// Record the order for `plan` and schedule its side effects.
    ///
    /// Accepting the same draft twice returns the first order and sends no
    /// second email.
    async fn accept(
        &self,
        checkout: &CheckoutSession,
        plan: &OrderPlan,
        status: OrderStatus,
        payment_summary: String,
    ) -> Result<SubmittedOrder, ServiceError> {
        let user = checkout.user();
        let mut new_order = NewSubmittedOrder {
            draft_id: plan.draft.id,
            user_id: user.id,
            order_number: order_number(Utc::now()),
            status,
            delivery_address: plan.delivery.clone(),
            billing_address: plan.billing.clone(),
            payment_summary,
            products_ordered: plan.summary.lines.iter().map(OrderedProduct::from).collect(),
            delivery_cost: plan.summary.delivery_cost,
            order_total: plan.summary.total,
        };

        let (order, created) = self.insert_order(&mut new_order).await?;

        checkout
            .session()
            .insert(keys::LAST_ORDER, ConfirmationSnapshot::from(&order))
            .await?;
        checkout.finish().await?;

        if created {
            info!(
                order_number = %order.order_number,
                draft_id = %order.draft_id,
                "Order accepted"
            );
            self.schedule_cleanup(user.id, &order);
            if self.inner.latch.claim(&order.order_number).await {
                self.send_confirmation(user, &order);
            }
        }

        Ok(order)
    }

    async fn insert_order(
        &self,
        order: &mut NewSubmittedOrder,
    ) -> Result<(SubmittedOrder, bool), ServiceError> {
        let mut attempt = 1;
        loop {
            match self.inner.deps.orders.insert_once(order).await {
                Err(RepositoryError::Conflict(_)) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    warn!(
                        order_number = %order.order_number,
                        "Order number taken; drawing another"
                    );
                    order.order_number = order_number(Utc::now());
                    attempt += 1;
                }
                result => return Ok(result?),
            }
        }
    }

    /// Send the confirmation in the background, releasing the latch if it fails.
    fn send_confirmation(&self, user: &CurrentUser, order: &SubmittedOrder) {
        let accounts = Arc::clone(&self.inner.deps.accounts);
        let mailer = Arc::clone(&self.inner.deps.mailer);
        let latch = self.inner.latch.clone();
        let currency = self.inner.config.currency;
        let user = user.clone();
        let order = order.clone();

        spawn_detached("confirmation_email", async move {
            let name = accounts
                .details(user.id)
                .await
                .ok()
                .and_then(|d| d.full_name)
                .unwrap_or_else(|| fallback_name(user.email.as_str()));
            let confirmation =
                OrderConfirmation::for_order(&order, user.email.as_str(), &name, currency);
            let sent = mailer.send_order_confirmation(&confirmation).await;
            if sent.is_err() {
                latch.release(&order.order_number).await;
            }
            sent
        });
    }

    fn schedule_cleanup(&self, user: UserId, order: &SubmittedOrder) {
        let lines = self.inner.carts.lines_repository();
        let drafts = Arc::clone(self.inner.checkout.drafts());
        let grace = self.inner.config.cleanup_grace;
        let draft_id = order.draft_id;

        spawn_detached("order_cleanup", async move {
            tokio::time::sleep(grace).await;
            lines.clear(user).await?;
            drafts.delete(draft_id).await?;
            Ok::<(), RepositoryError>(())
        });
    }

    /// Record the card kept by the provider for `order` and show it on the order.
    ///
    /// The card must already be attached to the user's customer, which the
    /// provider does when an intent created with `setup_future_usage` is paid.
    async fn save_card(
        &self,
        user: &CurrentUser,
        order: &mut SubmittedOrder,
        payment_method: &str,
    ) -> Result<SavedCard, ServiceError> {
        let deps = &self.inner.deps;
        let customer = self.ensure_customer(user).await?;

        let method = deps.provider.retrieve_payment_method(payment_method).await?;
        if method.customer.as_deref() != Some(customer.as_str()) {
            return Err(PaymentError::Provider {
                status: 402,
                message: "The card could not be saved".to_string(),
                code: None,
            }
            .into());
        }
        let details = method
            .card
            .ok_or_else(|| PaymentError::Parse("payment method is not a card".to_string()))?;

        let card = deps
            .cards
            .insert(
                user.id,
                &NewSavedCard {
                    card_token: method.id,
                    brand: details.brand,
                    last4: details.last4,
                    exp_month: details.exp_month,
                    exp_year: details.exp_year,
                    holder_name: method.billing_details.name,
                },
            )
            .await?;

        let label = card.label();
        deps.orders.set_payment_summary(order.id, &label).await?;
        order.payment_summary = label;
        info!(card_id = %card.id, "Saved card");
        Ok(card)
    }
}

fn not_completed() -> ServiceError {
    PaymentError::Provider {
        status: 402,
        message: "Payment was not completed".to_string(),
        code: None,
    }
    .into()
}

/// Human-readable order number, e.g. `SH-20260102-004217`.
fn order_number(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::rng().random_range(0..1_000_000);
    format!("SH-{}-{suffix:06}", now.format("%Y%m%d"))
}

fn fallback_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_owned()
}
