//! Order draft bound to the visitor's session.
//!
//! The draft id is minted on the server the first time checkout is opened and
//! kept in the session under `temp_order_id`, so a reload resumes the same
//! draft. Every selection is written to the database immediately together
//! with a summary recomputed from the latest cart.

use std::sync::Arc;

use chrono::Utc;
use tower_sessions::Session;
use tracing::{debug, info, instrument, warn};

use storehouse_core::{AddressId, DraftId, PaymentMethod, Price};

use super::ServiceError;
use crate::config::CheckoutConfig;
use crate::db::{
    AddressRemoval, AddressRepository, CardRepository, DraftField, DraftRepository,
    RepositoryError,
};
use crate::models::{
    AddressSnapshot, CardSelection, CartLine, CurrentUser, OrderDraft, OrderSummary, PaymentMode,
    session_keys as keys,
};
use crate::payments::PaymentError;

/// Opens checkout sessions.
#[derive(Clone)]
pub struct CheckoutService {
    drafts: Arc<dyn DraftRepository>,
    addresses: Arc<dyn AddressRepository>,
    cards: Arc<dyn CardRepository>,
    config: CheckoutConfig,
}

impl CheckoutService {
    #[must_use]
    pub fn new(
        drafts: Arc<dyn DraftRepository>,
        addresses: Arc<dyn AddressRepository>,
        cards: Arc<dyn CardRepository>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            drafts,
            addresses,
            cards,
            config,
        }
    }

    /// Checkout for the signed-in `user` of `session`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::AuthRequired` for anonymous visitors.
    pub fn open(
        &self,
        session: &Session,
        user: Option<&CurrentUser>,
    ) -> Result<CheckoutSession, ServiceError> {
        let user = user.ok_or(ServiceError::AuthRequired)?;
        Ok(CheckoutSession {
            service: self.clone(),
            session: session.clone(),
            user: user.clone(),
        })
    }

    pub(crate) fn drafts(&self) -> &Arc<dyn DraftRepository> {
        &self.drafts
    }

    fn summarize(&self, cart: &[CartLine]) -> OrderSummary {
        OrderSummary::compute(cart, self.config.delivery_cost)
    }
}

/// Everything needed to charge and record a complete draft.
#[derive(Debug, Clone)]
pub struct OrderPlan {
    pub draft: OrderDraft,
    pub mode: PaymentMode,
    pub summary: OrderSummary,
    pub delivery: AddressSnapshot,
    pub billing: AddressSnapshot,
    /// `summary.total` in minor units of the store currency.
    pub amount_minor: i64,
}

#[derive(Clone, Copy)]
enum AddressSlot {
    Delivery,
    Billing,
}

impl AddressSlot {
    const fn session_key(self) -> &'static str {
        match self {
            Self::Delivery => keys::SELECTED_DELIVERY_ADDRESS_ID,
            Self::Billing => keys::SELECTED_BILLING_ADDRESS_ID,
        }
    }

    const fn field(self, id: Option<AddressId>) -> DraftField {
        match self {
            Self::Delivery => DraftField::DeliveryAddress(id),
            Self::Billing => DraftField::BillingAddress(id),
        }
    }

    fn slot(self, draft: &mut OrderDraft) -> &mut Option<AddressId> {
        match self {
            Self::Delivery => &mut draft.delivery_address_id,
            Self::Billing => &mut draft.billing_address_id,
        }
    }
}

/// Checkout state of one signed-in visitor.
pub struct CheckoutSession {
    service: CheckoutService,
    session: Session,
    user: CurrentUser,
}

impl CheckoutSession {
    #[must_use]
    pub const fn user(&self) -> &CurrentUser {
        &self.user
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    async fn draft_id(&self) -> Result<Option<DraftId>, ServiceError> {
        Ok(self.session.get::<DraftId>(keys::TEMP_ORDER_ID).await?)
    }

    async fn mint_draft_id(&self) -> Result<DraftId, ServiceError> {
        let id = DraftId::generate();
        self.session.insert(keys::TEMP_ORDER_ID, id).await?;
        Ok(id)
    }

    /// The draft referenced by the session, if it exists and is ours.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::DataAccess` if the session or store fails.
    pub async fn current(&self) -> Result<Option<OrderDraft>, ServiceError> {
        let Some(id) = self.draft_id().await? else {
            return Ok(None);
        };
        Ok(self
            .service
            .drafts
            .find(id)
            .await?
            .filter(|d| d.user_id == self.user.id))
    }

    /// Resume the session's draft or start a new one for `cart`.
    ///
    /// Address slots follow the visitor's explicit selection if it still
    /// exists, then the default address, then whatever the draft held.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` when the cart is empty.
    #[instrument(skip(self, cart), fields(user_id = %self.user.id))]
    pub async fn begin(&self, cart: &[CartLine]) -> Result<OrderDraft, ServiceError> {
        if cart.is_empty() {
            return Err(ServiceError::invalid("cart"));
        }

        let id = match self.draft_id().await? {
            Some(id) => id,
            None => self.mint_draft_id().await?,
        };

        let mut draft = match self.service.drafts.find(id).await? {
            Some(draft) if draft.user_id == self.user.id => {
                debug!(draft_id = %id, "Resuming draft");
                draft
            }
            Some(_) => {
                warn!(draft_id = %id, "Session draft belongs to another user; starting over");
                OrderDraft::new(self.mint_draft_id().await?, self.user.id)
            }
            None => OrderDraft::new(id, self.user.id),
        };

        let default = self
            .service
            .addresses
            .default_address(self.user.id)
            .await?
            .map(|a| a.id);
        for slot in [AddressSlot::Delivery, AddressSlot::Billing] {
            let bound = *slot.slot(&mut draft);
            let resolved = self.resolve_address(slot, default, bound).await?;
            *slot.slot(&mut draft) = resolved;
        }

        draft.summary = Some(self.service.summarize(cart));
        draft.updated_at = Utc::now();

        if !self.service.drafts.upsert(&draft).await? {
            return Err(RepositoryError::Conflict("draft id is taken".to_string()).into());
        }
        info!(draft_id = %draft.id, "Draft ready");
        Ok(draft)
    }

    async fn resolve_address(
        &self,
        slot: AddressSlot,
        default: Option<AddressId>,
        bound: Option<AddressId>,
    ) -> Result<Option<AddressId>, ServiceError> {
        if let Some(selected) = self
            .session
            .get::<AddressId>(slot.session_key())
            .await?
        {
            if self
                .service
                .addresses
                .get(self.user.id, selected)
                .await?
                .is_some()
            {
                return Ok(Some(selected));
            }
            self.session
                .remove::<AddressId>(slot.session_key())
                .await?;
        }
        Ok(default.or(bound))
    }

    async fn current_or_begin(&self, cart: &[CartLine]) -> Result<OrderDraft, ServiceError> {
        match self.current().await? {
            Some(draft) => Ok(draft),
            None => self.begin(cart).await,
        }
    }

    async fn write_field(
        &self,
        mut draft: OrderDraft,
        field: DraftField,
        cart: &[CartLine],
    ) -> Result<OrderDraft, ServiceError> {
        let summary = self.service.summarize(cart);
        if !self
            .service
            .drafts
            .update_field(draft.id, self.user.id, &field, &summary)
            .await?
        {
            return Err(ServiceError::NotFound);
        }

        match field {
            DraftField::DeliveryAddress(id) => draft.delivery_address_id = id,
            DraftField::BillingAddress(id) => draft.billing_address_id = id,
            DraftField::PaymentMethod { method, card } => {
                draft.payment_method = Some(method);
                draft.card_selection = card;
            }
            DraftField::CardSelection(card) => draft.card_selection = card,
        }
        draft.summary = Some(summary);
        draft.updated_at = Utc::now();
        Ok(draft)
    }

    async fn select_address(
        &self,
        slot: AddressSlot,
        id: AddressId,
        cart: &[CartLine],
    ) -> Result<OrderDraft, ServiceError> {
        self.service
            .addresses
            .get(self.user.id, id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        let draft = self.current_or_begin(cart).await?;
        let draft = self.write_field(draft, slot.field(Some(id)), cart).await?;
        self.session.insert(slot.session_key(), id).await?;
        Ok(draft)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the address is not the user's.
    #[instrument(skip(self, cart), fields(user_id = %self.user.id))]
    pub async fn select_delivery_address(
        &self,
        id: AddressId,
        cart: &[CartLine],
    ) -> Result<OrderDraft, ServiceError> {
        self.select_address(AddressSlot::Delivery, id, cart).await
    }

    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the address is not the user's.
    #[instrument(skip(self, cart), fields(user_id = %self.user.id))]
    pub async fn select_billing_address(
        &self,
        id: AddressId,
        cart: &[CartLine],
    ) -> Result<OrderDraft, ServiceError> {
        self.select_address(AddressSlot::Billing, id, cart).await
    }

    /// Choose how to pay. Cash on delivery drops any card choice.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::InvalidSavedCard` when a saved card token is
    /// not one of the user's cards.
    #[instrument(skip(self, card, cart), fields(user_id = %self.user.id))]
    pub async fn select_payment_method(
        &self,
        method: PaymentMethod,
        card: Option<CardSelection>,
        cart: &[CartLine],
    ) -> Result<OrderDraft, ServiceError> {
        let card = match method {
            PaymentMethod::CashOnDelivery => None,
            PaymentMethod::Card => card,
        };
        if let Some(CardSelection::Saved { token }) = &card {
            self.verify_saved_card(token).await?;
        }

        let draft = self.current_or_begin(cart).await?;
        self.write_field(draft, DraftField::PaymentMethod { method, card }, cart)
            .await
    }

    /// Pay by card, using `selection`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::InvalidSavedCard` for an unknown saved card.
    pub async fn select_card(
        &self,
        selection: CardSelection,
        cart: &[CartLine],
    ) -> Result<OrderDraft, ServiceError> {
        self.select_payment_method(PaymentMethod::Card, Some(selection), cart)
            .await
    }

    async fn verify_saved_card(&self, token: &str) -> Result<(), ServiceError> {
        self.service
            .cards
            .find_by_token(self.user.id, token)
            .await?
            .map(|_| ())
            .ok_or(ServiceError::InvalidSavedCard)
    }

    /// Keep the draft in step with the cart. An empty cart abandons it.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::DataAccess` if the store fails.
    #[instrument(skip(self, cart), fields(user_id = %self.user.id))]
    pub async fn refresh_after_cart_change(
        &self,
        cart: &[CartLine],
    ) -> Result<Option<OrderDraft>, ServiceError> {
        let Some(mut draft) = self.current().await? else {
            return Ok(None);
        };

        if cart.is_empty() {
            self.abandon().await?;
            return Ok(None);
        }

        let summary = self.service.summarize(cart);
        self.service.drafts.save_summary(draft.id, &summary).await?;
        draft.summary = Some(summary);
        Ok(Some(draft))
    }

    /// The persisted summary, or a fresh one when none can be trusted.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::DataAccess` if the store fails.
    pub async fn current_summary(&self, cart: &[CartLine]) -> Result<OrderSummary, ServiceError> {
        match self.current().await? {
            Some(OrderDraft {
                summary: Some(summary),
                ..
            }) if summary.is_consistent() => Ok(summary),
            Some(draft) => {
                warn!(draft_id = %draft.id, "Stored summary unusable; recomputing");
                Ok(self.service.summarize(cart))
            }
            None => Ok(self.service.summarize(cart)),
        }
    }

    /// Repoint draft slots and session selections after an address was
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::DataAccess` if the store fails.
    #[instrument(skip(self), fields(user_id = %self.user.id))]
    pub async fn release_address(&self, removal: &AddressRemoval) -> Result<(), ServiceError> {
        let replacement = if removal.was_default {
            removal.promoted
        } else {
            self.service
                .addresses
                .default_address(self.user.id)
                .await?
                .map(|a| a.id)
        };

        let touched = self
            .service
            .drafts
            .reassign_address(self.user.id, removal.removed, replacement)
            .await?;
        if touched > 0 {
            info!(touched, removed = %removal.removed, "Reassigned draft addresses");
        }

        for slot in [AddressSlot::Delivery, AddressSlot::Billing] {
            let key = slot.session_key();
            if self.session.get::<AddressId>(key).await? == Some(removal.removed) {
                self.session.remove::<AddressId>(key).await?;
            }
        }
        Ok(())
    }

    /// Drop the draft and its session keys.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::DataAccess` if the store fails.
    pub async fn abandon(&self) -> Result<(), ServiceError> {
        if let Some(draft) = self.current().await? {
            self.service.drafts.delete(draft.id).await?;
            info!(draft_id = %draft.id, "Draft abandoned");
        }
        self.clear_draft_keys().await
    }

    /// Resolve everything needed to submit the draft against `cart`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::IncompleteOrder` naming missing selections,
    /// or `ServiceError::Validation` for an empty cart.
    pub async fn plan(&self, cart: &[CartLine]) -> Result<OrderPlan, ServiceError> {
        if cart.is_empty() {
            return Err(ServiceError::invalid("cart"));
        }

        let draft = self
            .current()
            .await?
            .ok_or_else(|| ServiceError::IncompleteOrder {
                missing: vec!["delivery_address", "billing_address", "payment_method"],
            })?;
        let mode = draft
            .payment_mode()
            .map_err(|missing| ServiceError::IncompleteOrder { missing })?;

        let delivery = self
            .address_snapshot(draft.delivery_address_id, "delivery_address")
            .await?;
        let billing = self
            .address_snapshot(draft.billing_address_id, "billing_address")
            .await?;

        let summary = self.service.summarize(cart);
        let amount_minor = Price::new(summary.total, self.service.config.currency)
            .to_minor_units()
            .map_err(PaymentError::from)?;

        Ok(OrderPlan {
            draft,
            mode,
            summary,
            delivery,
            billing,
            amount_minor,
        })
    }

    async fn address_snapshot(
        &self,
        id: Option<AddressId>,
        field: &'static str,
    ) -> Result<AddressSnapshot, ServiceError> {
        let incomplete = || ServiceError::IncompleteOrder {
            missing: vec![field],
        };
        let id = id.ok_or_else(incomplete)?;
        self.service
            .addresses
            .get(self.user.id, id)
            .await?
            .map(|a| a.snapshot())
            .ok_or_else(incomplete)
    }

    /// Clear the session side of an accepted order: the local cart and the
    /// draft keys.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::DataAccess` if the session cannot be written.
    pub async fn finish(&self) -> Result<(), ServiceError> {
        self.session
            .remove::<serde_json::Value>(keys::CART_ITEMS)
            .await?;
        self.session
            .remove::<serde_json::Value>(keys::CART_MERGE_TOKEN)
            .await?;
        self.clear_draft_keys().await
    }

    async fn clear_draft_keys(&self) -> Result<(), ServiceError> {
        for key in [
            keys::TEMP_ORDER_ID,
            keys::SELECTED_DELIVERY_ADDRESS_ID,
            keys::SELECTED_BILLING_ADDRESS_ID,
        ] {
            self.session.remove::<serde_json::Value>(key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use storehouse_core::{Quantity, UserId};

    use super::*;
    use crate::models::NewSavedCard;
    use crate::testing::{
        MemoryAddresses, MemoryCards, MemoryDrafts, address_fields, memory_session, product,
        shopper,
    };

    struct Fixture {
        checkout: CheckoutService,
        drafts: Arc<MemoryDrafts>,
        addresses: Arc<MemoryAddresses>,
        cards: Arc<MemoryCards>,
        session: Session,
        user: CurrentUser,
    }

    impl Fixture {
        fn new() -> Self {
            let drafts = Arc::new(MemoryDrafts::default());
            let addresses = Arc::new(MemoryAddresses::default());
            let cards = Arc::new(MemoryCards::default());
            let checkout = CheckoutService::new(
                drafts.clone(),
                addresses.clone(),
                cards.clone(),
                CheckoutConfig::default(),
            );
            Self {
                checkout,
                drafts,
                addresses,
                cards,
                session: memory_session(),
                user: shopper(1),
            }
        }

        fn open(&self) -> CheckoutSession {
            self.checkout
                .open(&self.session, Some(&self.user))
                .expect("open")
        }

        async fn address(&self, name: &str) -> AddressId {
            self.addresses
                .insert(self.user.id, &address_fields(name))
                .await
                .expect("insert")
                .id
        }
    }

    fn cart() -> Vec<CartLine> {
        vec![CartLine::new(
            &product("a", 50),
            Quantity::new(2).expect("quantity"),
        )]
    }

    #[test]
    fn test_open_requires_user() {
        let fixture = Fixture::new();
        let err = fixture
            .checkout
            .open(&fixture.session, None)
            .err()
            .expect("anonymous");
        assert!(matches!(err, ServiceError::AuthRequired));
    }

    #[tokio::test]
    async fn test_begin_prices_cart_and_picks_default_address() {
        let fixture = Fixture::new();
        let home = fixture.address("Home").await;
        fixture.address("Work").await;

        let draft = fixture.open().begin(&cart()).await.expect("begin");

        assert_eq!(draft.delivery_address_id, Some(home));
        assert_eq!(draft.billing_address_id, Some(home));
        let summary = draft.summary.expect("summary");
        assert_eq!(summary.total, Decimal::new(125, 0));
        assert_eq!(fixture.drafts.get(draft.id).expect("stored").id, draft.id);
    }

    #[tokio::test]
    async fn test_begin_reuses_session_draft() {
        let fixture = Fixture::new();
        let first = fixture.open().begin(&cart()).await.expect("begin");
        let second = fixture.open().begin(&cart()).await.expect("begin");
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_begin_with_empty_cart_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture.open().begin(&[]).await.expect_err("empty");
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_explicit_selection_survives_reload() {
        let fixture = Fixture::new();
        fixture.address("Home").await;
        let work = fixture.address("Work").await;

        let checkout = fixture.open();
        checkout.begin(&cart()).await.expect("begin");
        checkout
            .select_delivery_address(work, &cart())
            .await
            .expect("select");

        let resumed = fixture.open().begin(&cart()).await.expect("begin");
        assert_eq!(resumed.delivery_address_id, Some(work));
    }

    #[tokio::test]
    async fn test_selecting_foreign_address_is_not_found() {
        let fixture = Fixture::new();
        let stranger = fixture
            .addresses
            .insert(UserId::new(99), &address_fields("Elsewhere"))
            .await
            .expect("insert")
            .id;

        let err = fixture
            .open()
            .select_billing_address(stranger, &cart())
            .await
            .expect_err("foreign");
        assert!(matches!(err, ServiceError::NotFound));
    }

    #[tokio::test]
    async fn test_unknown_saved_card_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture
            .open()
            .select_card(
                CardSelection::Saved {
                    token: "pm_nope".to_string(),
                },
                &cart(),
            )
            .await
            .expect_err("unknown card");
        assert!(matches!(err, ServiceError::InvalidSavedCard));
    }

    #[tokio::test]
    async fn test_saved_card_selection_resolves_mode() {
        let fixture = Fixture::new();
        fixture.address("Home").await;
        fixture
            .cards
            .insert(
                fixture.user.id,
                &NewSavedCard {
                    card_token: "pm_1".to_string(),
                    brand: "visa".to_string(),
                    last4: "4242".to_string(),
                    exp_month: 12,
                    exp_year: 2030,
                    holder_name: None,
                },
            )
            .await
            .expect("card");

        let checkout = fixture.open();
        checkout.begin(&cart()).await.expect("begin");
        let draft = checkout
            .select_card(
                CardSelection::Saved {
                    token: "pm_1".to_string(),
                },
                &cart(),
            )
            .await
            .expect("select");

        assert_eq!(
            draft.payment_mode(),
            Ok(PaymentMode::SavedCard {
                token: "pm_1".to_string()
            })
        );
        let plan = checkout.plan(&cart()).await.expect("plan");
        assert_eq!(plan.amount_minor, 12500);
    }

    #[tokio::test]
    async fn test_cash_on_delivery_drops_card_choice() {
        let fixture = Fixture::new();
        let checkout = fixture.open();
        checkout
            .select_card(CardSelection::New, &cart())
            .await
            .expect("card");
        let draft = checkout
            .select_payment_method(PaymentMethod::CashOnDelivery, Some(CardSelection::New), &cart())
            .await
            .expect("cash");

        assert_eq!(draft.card_selection, None);
        let stored = fixture.drafts.get(draft.id).expect("stored");
        assert_eq!(stored.payment_method, Some(PaymentMethod::CashOnDelivery));
        assert_eq!(stored.card_selection, None);
    }

    #[tokio::test]
    async fn test_plan_names_missing_selections() {
        let fixture = Fixture::new();
        let checkout = fixture.open();
        checkout.begin(&cart()).await.expect("begin");

        match checkout.plan(&cart()).await.expect_err("incomplete") {
            ServiceError::IncompleteOrder { missing } => assert_eq!(
                missing,
                ["delivery_address", "billing_address", "payment_method"]
            ),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_summary_follows_cart_changes() {
        let fixture = Fixture::new();
        let checkout = fixture.open();
        let draft = checkout.begin(&cart()).await.expect("begin");

        let mut bigger = cart();
        bigger.push(CartLine::new(&product("b", 10), Quantity::ONE));
        checkout
            .refresh_after_cart_change(&bigger)
            .await
            .expect("refresh");

        let stored = fixture.drafts.get(draft.id).expect("stored");
        assert_eq!(stored.summary.expect("summary").total, Decimal::new(135, 0));
    }

    #[tokio::test]
    async fn test_emptying_cart_abandons_draft() {
        let fixture = Fixture::new();
        let checkout = fixture.open();
        let draft = checkout.begin(&cart()).await.expect("begin");

        assert!(
            checkout
                .refresh_after_cart_change(&[])
                .await
                .expect("refresh")
                .is_none()
        );
        assert!(fixture.drafts.get(draft.id).is_none());
        assert!(checkout.current().await.expect("current").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_summary_is_recomputed() {
        let fixture = Fixture::new();
        let checkout = fixture.open();
        let draft = checkout.begin(&cart()).await.expect("begin");
        fixture.drafts.corrupt_summary(draft.id);

        let summary = checkout.current_summary(&cart()).await.expect("summary");
        assert_eq!(summary.total, Decimal::new(125, 0));
    }

    #[tokio::test]
    async fn test_deleting_selected_default_reassigns_slots() {
        let fixture = Fixture::new();
        let home = fixture.address("Home").await;
        let work = fixture.address("Work").await;

        let checkout = fixture.open();
        checkout.begin(&cart()).await.expect("begin");
        checkout
            .select_delivery_address(home, &cart())
            .await
            .expect("select");

        let removal = fixture
            .addresses
            .delete(fixture.user.id, home)
            .await
            .expect("delete")
            .expect("removed");
        checkout.release_address(&removal).await.expect("release");

        let draft = checkout.current().await.expect("current").expect("draft");
        assert_eq!(draft.delivery_address_id, Some(work));
        assert_eq!(draft.billing_address_id, Some(work));
        assert_eq!(
            fixture
                .session
                .get::<AddressId>(keys::SELECTED_DELIVERY_ADDRESS_ID)
                .await
                .expect("session"),
            None
        );
    }

    #[tokio::test]
    async fn test_deleting_last_address_nulls_slots() {
        let fixture = Fixture::new();
        let home = fixture.address("Home").await;

        let checkout = fixture.open();
        checkout.begin(&cart()).await.expect("begin");
        let removal = fixture
            .addresses
            .delete(fixture.user.id, home)
            .await
            .expect("delete")
            .expect("removed");
        checkout.release_address(&removal).await.expect("release");

        let draft = checkout.current().await.expect("current").expect("draft");
        assert_eq!(draft.delivery_address_id, None);
        assert_eq!(draft.billing_address_id, None);
    }
}
