//! In-memory backends and fixtures shared by the unit tests.
//!
//! Every repository trait has a memory implementation here that follows the
//! same contract as its `Pg*` counterpart, so services and handlers can be
//! exercised without a database.

#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;
use tower_sessions::{MemoryStore, Session};

use storehouse_core::{
    AddressId, DraftId, Email, MergeToken, OrderId, OrderStatus, ProductId, Quantity,
    SavedCardId, UserId,
};

use crate::config::{CheckoutConfig, EmailConfig, StorefrontConfig, StripeConfig};
use crate::db::{
    AccountRepository, AddressRemoval, AddressRepository, CardRepository, DraftField,
    DraftRepository, ItemRepository, OrderRepository, ProductRepository, RepositoryError,
};
use crate::middleware::session::session_layer;
use crate::models::{
    Address, AddressFields, AddressSnapshot, CartLine, CurrentUser, FavoriteEntry, Item,
    NewSavedCard, NewSubmittedOrder, OrderDraft, OrderSummary, OrderedProduct, Product, SavedCard,
    SubmittedOrder, User, UserDetails,
};
use crate::payments::{
    BillingDetails, CardDetails, Customer, NewPaymentIntent, PaymentError, PaymentIntent,
    PaymentMethodDetails, PaymentProvider, SetupIntent,
};
use crate::routes;
use crate::services::{ConfirmationMailer, MailError, OrderConfirmation};
use crate::state::{AppState, Backends};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Fixtures
// =============================================================================

/// A session backed by a fresh in-memory store.
pub fn memory_session() -> Session {
    Session::new(None, Arc::new(MemoryStore::default()), None)
}

/// A product without images.
pub fn product(id: &str, price: i64) -> Product {
    Product {
        id: ProductId::new(id),
        title: format!("Product {id}"),
        description: String::new(),
        price: Decimal::new(price, 0),
        images: Vec::new(),
    }
}

/// A signed-in user.
pub fn shopper(id: i32) -> CurrentUser {
    CurrentUser {
        id: UserId::new(id),
        email: Email::parse(&format!("shopper{id}@example.com")).expect("email"),
    }
}

/// A complete, non-default address.
pub fn address_fields(name: &str) -> AddressFields {
    AddressFields {
        name: name.to_owned(),
        phone_number: "0700000000".to_owned(),
        street: "1 Main St".to_owned(),
        city: "Cluj-Napoca".to_owned(),
        county: "Cluj".to_owned(),
        is_default: false,
    }
}

/// An order of one unit of each product in `products`, priced at 10.
pub fn new_order(user: UserId, products: &[&str]) -> NewSubmittedOrder {
    let draft_id = DraftId::generate();
    let snapshot = AddressSnapshot {
        name: "Ana Pop".to_owned(),
        phone_number: "0700000000".to_owned(),
        street: "1 Main St".to_owned(),
        city: "Cluj-Napoca".to_owned(),
        county: "Cluj".to_owned(),
    };
    let lines: Vec<OrderedProduct> = products
        .iter()
        .map(|id| OrderedProduct {
            product_id: ProductId::new(*id),
            title: format!("Product {id}"),
            quantity: Quantity::ONE,
            unit_price: Decimal::new(10, 0),
            line_total: Decimal::new(10, 0),
            image: None,
        })
        .collect();
    let subtotal = lines.iter().map(|l| l.line_total).sum::<Decimal>();

    NewSubmittedOrder {
        draft_id,
        user_id: user,
        order_number: format!("SH-TEST-{draft_id}"),
        status: OrderStatus::Paid,
        delivery_address: snapshot.clone(),
        billing_address: snapshot,
        payment_summary: "Card".to_owned(),
        products_ordered: lines,
        delivery_cost: Decimal::new(25, 0),
        order_total: subtotal + Decimal::new(25, 0),
    }
}

/// Let detached background tasks run to completion.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// =============================================================================
// Accounts
// =============================================================================

#[derive(Default)]
pub struct MemoryAccounts {
    state: Mutex<AccountsState>,
}

#[derive(Default)]
struct AccountsState {
    users: Vec<(User, String)>,
    details: HashMap<UserId, UserDetails>,
}

#[async_trait]
impl AccountRepository for MemoryAccounts {
    async fn create_with_password(
        &self,
        email: &Email,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<User, RepositoryError> {
        let mut state = lock(&self.state);
        if state.users.iter().any(|(u, _)| &u.email == email) {
            return Err(RepositoryError::Conflict("email already exists".to_owned()));
        }
        let id = i32::try_from(state.users.len()).expect("user count") + 1;
        let user = User {
            id: UserId::new(id),
            email: email.clone(),
            created_at: Utc::now(),
        };
        state.users.push((user.clone(), password_hash.to_owned()));
        state.details.insert(
            user.id,
            UserDetails {
                full_name: full_name.map(str::to_owned),
                payment_customer_id: None,
            },
        );
        Ok(user)
    }

    async fn get_password_hash(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        Ok(lock(&self.state)
            .users
            .iter()
            .find(|(u, _)| &u.email == email)
            .cloned())
    }

    async fn details(&self, user: UserId) -> Result<UserDetails, RepositoryError> {
        Ok(lock(&self.state)
            .details
            .get(&user)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_payment_customer(
        &self,
        user: UserId,
        customer_id: &str,
    ) -> Result<(), RepositoryError> {
        lock(&self.state)
            .details
            .entry(user)
            .or_default()
            .payment_customer_id = Some(customer_id.to_owned());
        Ok(())
    }
}

// =============================================================================
// Cart and favorites
// =============================================================================

pub struct MemoryItems<T> {
    items: Mutex<HashMap<UserId, Vec<T>>>,
    applied: Mutex<HashSet<MergeToken>>,
}

impl<T> Default for MemoryItems<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            applied: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl<T: Item> ItemRepository<T> for MemoryItems<T> {
    async fn load(&self, user: UserId) -> Result<Vec<T>, RepositoryError> {
        Ok(lock(&self.items).get(&user).cloned().unwrap_or_default())
    }

    async fn put(&self, user: UserId, item: &T) -> Result<(), RepositoryError> {
        let mut items = lock(&self.items);
        let list = items.entry(user).or_default();
        match list
            .iter_mut()
            .find(|i| i.product_id() == item.product_id())
        {
            Some(existing) => *existing = item.clone(),
            None => list.push(item.clone()),
        }
        Ok(())
    }

    async fn delete(&self, user: UserId, product: &ProductId) -> Result<bool, RepositoryError> {
        let mut items = lock(&self.items);
        let Some(list) = items.get_mut(&user) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|i| i.product_id() != product);
        Ok(list.len() != before)
    }

    async fn clear(&self, user: UserId) -> Result<(), RepositoryError> {
        lock(&self.items).remove(&user);
        Ok(())
    }

    async fn merge(
        &self,
        user: UserId,
        token: MergeToken,
        incoming: &[T],
    ) -> Result<bool, RepositoryError> {
        if !lock(&self.applied).insert(token) {
            return Ok(false);
        }
        let mut items = lock(&self.items);
        let existing = items.remove(&user).unwrap_or_default();
        items.insert(user, T::merge(existing, incoming));
        Ok(true)
    }
}

// =============================================================================
// Addresses
// =============================================================================

#[derive(Default)]
pub struct MemoryAddresses {
    state: Mutex<AddressesState>,
}

#[derive(Default)]
struct AddressesState {
    next_id: i32,
    rows: Vec<(UserId, Address)>,
}

impl AddressesState {
    fn owned(&mut self, user: UserId) -> impl Iterator<Item = &mut Address> {
        self.rows
            .iter_mut()
            .filter(move |(owner, _)| *owner == user)
            .map(|(_, a)| a)
    }

    fn make_default(&mut self, user: UserId, id: AddressId) {
        for address in self.owned(user) {
            address.is_default = address.id == id;
        }
    }
}

#[async_trait]
impl AddressRepository for MemoryAddresses {
    async fn list(&self, user: UserId) -> Result<Vec<Address>, RepositoryError> {
        let mut state = lock(&self.state);
        let mut list: Vec<Address> = state.owned(user).map(|a| a.clone()).collect();
        list.sort_by_key(|a| (!a.is_default, a.created_at, a.id.get()));
        Ok(list)
    }

    async fn get(&self, user: UserId, id: AddressId) -> Result<Option<Address>, RepositoryError> {
        Ok(lock(&self.state)
            .owned(user)
            .find(|a| a.id == id)
            .map(|a| a.clone()))
    }

    async fn default_address(&self, user: UserId) -> Result<Option<Address>, RepositoryError> {
        Ok(lock(&self.state)
            .owned(user)
            .find(|a| a.is_default)
            .map(|a| a.clone()))
    }

    async fn insert(
        &self,
        user: UserId,
        fields: &AddressFields,
    ) -> Result<Address, RepositoryError> {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let first = state.owned(user).next().is_none();
        let address = Address {
            id: AddressId::new(state.next_id),
            name: fields.name.clone(),
            phone_number: fields.phone_number.clone(),
            street: fields.street.clone(),
            city: fields.city.clone(),
            county: fields.county.clone(),
            is_default: false,
            created_at: Utc::now(),
        };
        state.rows.push((user, address.clone()));
        if first || fields.is_default {
            state.make_default(user, address.id);
        }
        Ok(Address {
            is_default: first || fields.is_default,
            ..address
        })
    }

    async fn update(
        &self,
        user: UserId,
        id: AddressId,
        fields: &AddressFields,
    ) -> Result<Option<Address>, RepositoryError> {
        let mut state = lock(&self.state);
        let Some(address) = state.owned(user).find(|a| a.id == id) else {
            return Ok(None);
        };
        address.name.clone_from(&fields.name);
        address.phone_number.clone_from(&fields.phone_number);
        address.street.clone_from(&fields.street);
        address.city.clone_from(&fields.city);
        address.county.clone_from(&fields.county);
        if fields.is_default {
            state.make_default(user, id);
        }
        Ok(state.owned(user).find(|a| a.id == id).map(|a| a.clone()))
    }

    async fn set_default(&self, user: UserId, id: AddressId) -> Result<bool, RepositoryError> {
        let mut state = lock(&self.state);
        if state.owned(user).all(|a| a.id != id) {
            return Ok(false);
        }
        state.make_default(user, id);
        Ok(true)
    }

    async fn delete(
        &self,
        user: UserId,
        id: AddressId,
    ) -> Result<Option<AddressRemoval>, RepositoryError> {
        let mut state = lock(&self.state);
        let Some(position) = state
            .rows
            .iter()
            .position(|(owner, a)| *owner == user && a.id == id)
        else {
            return Ok(None);
        };
        let (_, removed) = state.rows.remove(position);

        let promoted = if removed.is_default {
            let oldest = state
                .owned(user)
                .min_by_key(|a| (a.created_at, a.id.get()))
                .map(|a| a.id);
            if let Some(next) = oldest {
                state.make_default(user, next);
            }
            oldest
        } else {
            None
        };

        Ok(Some(AddressRemoval {
            user_id: user,
            removed: id,
            was_default: removed.is_default,
            promoted,
        }))
    }
}

// =============================================================================
// Drafts
// =============================================================================

#[derive(Default)]
pub struct MemoryDrafts {
    drafts: Mutex<HashMap<DraftId, OrderDraft>>,
}

impl MemoryDrafts {
    /// The stored draft, bypassing ownership checks.
    pub fn get(&self, id: DraftId) -> Option<OrderDraft> {
        lock(&self.drafts).get(&id).cloned()
    }

    /// Simulate an unreadable stored summary.
    pub fn corrupt_summary(&self, id: DraftId) {
        if let Some(draft) = lock(&self.drafts).get_mut(&id) {
            draft.summary = None;
        }
    }
}

#[async_trait]
impl DraftRepository for MemoryDrafts {
    async fn find(&self, id: DraftId) -> Result<Option<OrderDraft>, RepositoryError> {
        Ok(self.get(id))
    }

    async fn upsert(&self, draft: &OrderDraft) -> Result<bool, RepositoryError> {
        let mut drafts = lock(&self.drafts);
        if drafts
            .get(&draft.id)
            .is_some_and(|d| d.user_id != draft.user_id)
        {
            return Ok(false);
        }
        drafts.insert(draft.id, draft.clone());
        Ok(true)
    }

    async fn update_field(
        &self,
        id: DraftId,
        user: UserId,
        field: &DraftField,
        summary: &OrderSummary,
    ) -> Result<bool, RepositoryError> {
        let mut drafts = lock(&self.drafts);
        let Some(draft) = drafts.get_mut(&id).filter(|d| d.user_id == user) else {
            return Ok(false);
        };
        match field {
            DraftField::DeliveryAddress(address) => draft.delivery_address_id = *address,
            DraftField::BillingAddress(address) => draft.billing_address_id = *address,
            DraftField::PaymentMethod { method, card } => {
                draft.payment_method = Some(*method);
                draft.card_selection.clone_from(card);
            }
            DraftField::CardSelection(card) => draft.card_selection.clone_from(card),
        }
        draft.summary = Some(summary.clone());
        draft.updated_at = Utc::now();
        Ok(true)
    }

    async fn save_summary(
        &self,
        id: DraftId,
        summary: &OrderSummary,
    ) -> Result<(), RepositoryError> {
        if let Some(draft) = lock(&self.drafts).get_mut(&id) {
            draft.summary = Some(summary.clone());
            draft.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, id: DraftId) -> Result<bool, RepositoryError> {
        Ok(lock(&self.drafts).remove(&id).is_some())
    }

    async fn reassign_address(
        &self,
        user: UserId,
        removed: AddressId,
        replacement: Option<AddressId>,
    ) -> Result<u64, RepositoryError> {
        let mut touched = 0;
        for draft in lock(&self.drafts)
            .values_mut()
            .filter(|d| d.user_id == user && d.references(removed))
        {
            if draft.delivery_address_id == Some(removed) {
                draft.delivery_address_id = replacement;
            }
            if draft.billing_address_id == Some(removed) {
                draft.billing_address_id = replacement;
            }
            touched += 1;
        }
        Ok(touched)
    }
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Default)]
pub struct MemoryOrders {
    orders: Mutex<Vec<SubmittedOrder>>,
}

impl MemoryOrders {
    pub fn count(&self) -> usize {
        lock(&self.orders).len()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrders {
    async fn insert_once(
        &self,
        order: &NewSubmittedOrder,
    ) -> Result<(SubmittedOrder, bool), RepositoryError> {
        let mut orders = lock(&self.orders);
        if let Some(existing) = orders.iter().find(|o| o.draft_id == order.draft_id) {
            return Ok((existing.clone(), false));
        }
        if orders.iter().any(|o| o.order_number == order.order_number) {
            return Err(RepositoryError::Conflict(
                "order number already exists".to_owned(),
            ));
        }

        let id = i32::try_from(orders.len()).expect("order count") + 1;
        let stored = SubmittedOrder {
            id: OrderId::new(id),
            draft_id: order.draft_id,
            user_id: order.user_id,
            order_number: order.order_number.clone(),
            created_at: Utc::now(),
            status: order.status,
            delivery_address: order.delivery_address.clone(),
            billing_address: order.billing_address.clone(),
            payment_summary: order.payment_summary.clone(),
            products_ordered: order.products_ordered.clone(),
            delivery_cost: order.delivery_cost,
            order_total: order.order_total,
        };
        orders.push(stored.clone());
        Ok((stored, true))
    }

    async fn find_by_draft(
        &self,
        draft: DraftId,
    ) -> Result<Option<SubmittedOrder>, RepositoryError> {
        Ok(lock(&self.orders)
            .iter()
            .find(|o| o.draft_id == draft)
            .cloned())
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<SubmittedOrder>, RepositoryError> {
        let mut list: Vec<SubmittedOrder> = lock(&self.orders)
            .iter()
            .filter(|o| o.user_id == user)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.get().cmp(&a.id.get()))
        });
        Ok(list)
    }

    async fn set_payment_summary(
        &self,
        id: OrderId,
        summary: &str,
    ) -> Result<(), RepositoryError> {
        if let Some(order) = lock(&self.orders).iter_mut().find(|o| o.id == id) {
            summary.clone_into(&mut order.payment_summary);
        }
        Ok(())
    }
}

// =============================================================================
// Saved cards
// =============================================================================

#[derive(Default)]
pub struct MemoryCards {
    cards: Mutex<Vec<SavedCard>>,
}

#[async_trait]
impl CardRepository for MemoryCards {
    async fn list(&self, user: UserId) -> Result<Vec<SavedCard>, RepositoryError> {
        Ok(lock(&self.cards)
            .iter()
            .filter(|c| c.user_id == user)
            .cloned()
            .collect())
    }

    async fn find_by_token(
        &self,
        user: UserId,
        token: &str,
    ) -> Result<Option<SavedCard>, RepositoryError> {
        Ok(lock(&self.cards)
            .iter()
            .find(|c| c.user_id == user && c.card_token == token)
            .cloned())
    }

    async fn insert(
        &self,
        user: UserId,
        card: &NewSavedCard,
    ) -> Result<SavedCard, RepositoryError> {
        let mut cards = lock(&self.cards);
        let id = match cards
            .iter()
            .position(|c| c.user_id == user && c.card_token == card.card_token)
        {
            Some(position) => cards.remove(position).id,
            None => SavedCardId::new(i32::try_from(cards.len()).expect("card count") + 1),
        };
        let saved = SavedCard {
            id,
            user_id: user,
            card_token: card.card_token.clone(),
            brand: card.brand.clone(),
            last4: card.last4.clone(),
            exp_month: card.exp_month,
            exp_year: card.exp_year,
            holder_name: card.holder_name.clone(),
            created_at: Utc::now(),
        };
        cards.push(saved.clone());
        Ok(saved)
    }

    async fn delete(&self, user: UserId, id: SavedCardId) -> Result<bool, RepositoryError> {
        let mut cards = lock(&self.cards);
        let before = cards.len();
        cards.retain(|c| !(c.user_id == user && c.id == id));
        Ok(cards.len() != before)
    }
}

// =============================================================================
// Catalogue
// =============================================================================

#[derive(Default)]
pub struct MemoryProducts {
    products: Mutex<HashMap<ProductId, Product>>,
    failing: bool,
}

impl MemoryProducts {
    /// A catalogue whose every lookup fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn add(&self, product: Product) {
        lock(&self.products).insert(product.id.clone(), product);
    }
}

#[async_trait]
impl ProductRepository for MemoryProducts {
    async fn find(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        if self.failing {
            return Err(RepositoryError::DataCorruption(
                "catalogue unavailable".to_owned(),
            ));
        }
        Ok(lock(&self.products).get(id).cloned())
    }
}

// =============================================================================
// Payments provider
// =============================================================================

/// Scripted payments provider.
///
/// Intents created with a payment method succeed at once unless the method
/// is [`StubProvider::DECLINED_CARD`]; without one they wait for
/// confirmation. Idempotency keys replay the first response, declines
/// included, and refuse different parameters. A card paid for without
/// `setup_future_usage` is spent and cannot be set up for reuse.
#[derive(Default)]
pub struct StubProvider {
    state: Mutex<ProviderState>,
}

enum Replay {
    Intent(String),
    Declined,
}

#[derive(Default)]
struct ProviderState {
    next: u32,
    intents: HashMap<String, PaymentIntent>,
    by_key: HashMap<String, (NewPaymentIntent, Replay)>,
    created: Vec<NewPaymentIntent>,
    setups: HashMap<String, Option<String>>,
    attached: HashMap<String, String>,
    spent: HashSet<String>,
}

impl ProviderState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next += 1;
        format!("{prefix}_{}", self.next)
    }

    /// A card just paid: kept for `customer` when asked, spent otherwise.
    fn settle_card(&mut self, payment_method: &str, customer: Option<&str>, keep: bool) {
        match customer.filter(|_| keep) {
            Some(customer) => {
                self.attached
                    .insert(payment_method.to_owned(), customer.to_owned());
            }
            None if !self.attached.contains_key(payment_method) => {
                self.spent.insert(payment_method.to_owned());
            }
            None => {}
        }
    }
}

impl StubProvider {
    pub const DECLINED_CARD: &'static str = "pm_card_declined";

    /// Parameters of every intent actually created, oldest first.
    pub fn intents(&self) -> Vec<NewPaymentIntent> {
        lock(&self.state).created.clone()
    }

    /// Customer `payment_method` is attached to.
    pub fn owner(&self, payment_method: &str) -> Option<String> {
        lock(&self.state).attached.get(payment_method).cloned()
    }

    fn declined() -> PaymentError {
        PaymentError::Provider {
            status: 402,
            message: "Your card was declined.".to_owned(),
            code: Some("card_declined".to_owned()),
        }
    }

    fn missing(id: &str) -> PaymentError {
        PaymentError::Provider {
            status: 404,
            message: format!("No such intent: '{id}'"),
            code: Some("resource_missing".to_owned()),
        }
    }

    fn key_reused(key: &str) -> PaymentError {
        PaymentError::Provider {
            status: 400,
            message: format!("Idempotency key '{key}' was first used with other parameters"),
            code: Some("idempotency_error".to_owned()),
        }
    }

    fn unusable(payment_method: &str) -> PaymentError {
        PaymentError::Provider {
            status: 400,
            message: format!("PaymentMethod {payment_method} cannot be reused"),
            code: Some("payment_method_unexpected_state".to_owned()),
        }
    }
}

#[async_trait]
impl PaymentProvider for StubProvider {
    async fn create_customer(&self, email: &str) -> Result<Customer, PaymentError> {
        let id = lock(&self.state).next_id("cus");
        Ok(Customer {
            id,
            email: Some(email.to_owned()),
        })
    }

    async fn create_payment_intent(
        &self,
        params: &NewPaymentIntent,
    ) -> Result<PaymentIntent, PaymentError> {
        let mut state = lock(&self.state);
        if let Some(key) = &params.idempotency_key
            && let Some((first, replay)) = state.by_key.get(key)
        {
            if first != params {
                return Err(Self::key_reused(key));
            }
            return match replay {
                Replay::Declined => Err(Self::declined()),
                Replay::Intent(id) => state
                    .intents
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Self::missing(id)),
            };
        }
        if params.payment_method.as_deref() == Some(Self::DECLINED_CARD) {
            if let Some(key) = &params.idempotency_key {
                state
                    .by_key
                    .insert(key.clone(), (params.clone(), Replay::Declined));
            }
            return Err(Self::declined());
        }

        let id = state.next_id("pi");
        let intent = PaymentIntent {
            client_secret: Some(format!("{id}_secret")),
            status: if params.payment_method.is_some() {
                "succeeded".to_owned()
            } else {
                "requires_payment_method".to_owned()
            },
            amount: params.amount,
            currency: params.currency.as_lower().to_owned(),
            customer: params.customer.clone(),
            payment_method: params.payment_method.clone(),
            setup_future_usage: params.setup_future_usage.then(|| "off_session".to_owned()),
            metadata: HashMap::from([("order_id".to_owned(), params.order_id.clone())]),
            id: id.clone(),
        };
        if let Some(payment_method) = &params.payment_method
            && !params.off_session
        {
            state.settle_card(
                payment_method,
                params.customer.as_deref(),
                params.setup_future_usage,
            );
        }
        if let Some(key) = &params.idempotency_key {
            state
                .by_key
                .insert(key.clone(), (params.clone(), Replay::Intent(id.clone())));
        }
        state.intents.insert(id, intent.clone());
        state.created.push(params.clone());
        Ok(intent)
    }

    async fn confirm_payment_intent(
        &self,
        intent_id: &str,
        payment_method: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        if payment_method == Self::DECLINED_CARD {
            return Err(Self::declined());
        }
        let mut state = lock(&self.state);
        let intent = state
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| Self::missing(intent_id))?;
        "succeeded".clone_into(&mut intent.status);
        intent.payment_method = Some(payment_method.to_owned());
        let confirmed = intent.clone();
        state.settle_card(
            payment_method,
            confirmed.customer.as_deref(),
            confirmed.setup_future_usage.is_some(),
        );
        Ok(confirmed)
    }

    async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        lock(&self.state)
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| Self::missing(intent_id))
    }

    async fn create_setup_intent(
        &self,
        customer: Option<&str>,
    ) -> Result<SetupIntent, PaymentError> {
        let mut state = lock(&self.state);
        let id = state.next_id("seti");
        state.setups.insert(id.clone(), customer.map(str::to_owned));
        Ok(SetupIntent {
            client_secret: Some(format!("{id}_secret")),
            id,
            status: "requires_payment_method".to_owned(),
            customer: customer.map(str::to_owned),
            payment_method: None,
        })
    }

    async fn confirm_setup_intent(
        &self,
        intent_id: &str,
        payment_method: &str,
    ) -> Result<SetupIntent, PaymentError> {
        if payment_method == Self::DECLINED_CARD {
            return Err(Self::declined());
        }
        let mut state = lock(&self.state);
        let customer = state
            .setups
            .get(intent_id)
            .cloned()
            .ok_or_else(|| Self::missing(intent_id))?;
        let foreign = state
            .attached
            .get(payment_method)
            .is_some_and(|owner| Some(owner) != customer.as_ref());
        if foreign || state.spent.contains(payment_method) {
            return Err(Self::unusable(payment_method));
        }
        if let Some(customer) = &customer {
            state
                .attached
                .insert(payment_method.to_owned(), customer.clone());
        }
        Ok(SetupIntent {
            id: intent_id.to_owned(),
            client_secret: None,
            status: "succeeded".to_owned(),
            customer,
            payment_method: Some(payment_method.to_owned()),
        })
    }

    async fn retrieve_payment_method(
        &self,
        payment_method: &str,
    ) -> Result<PaymentMethodDetails, PaymentError> {
        Ok(PaymentMethodDetails {
            id: payment_method.to_owned(),
            customer: self.owner(payment_method),
            card: Some(CardDetails {
                brand: "visa".to_owned(),
                last4: "4242".to_owned(),
                exp_month: 12,
                exp_year: 2030,
            }),
            billing_details: BillingDetails {
                name: Some("Ana Pop".to_owned()),
                email: None,
            },
        })
    }

    async fn attach_payment_method(
        &self,
        payment_method: &str,
        customer: &str,
    ) -> Result<PaymentMethodDetails, PaymentError> {
        lock(&self.state)
            .attached
            .insert(payment_method.to_owned(), customer.to_owned());
        self.retrieve_payment_method(payment_method).await
    }
}

// =============================================================================
// Mail
// =============================================================================

/// Records confirmations instead of sending them.
#[derive(Default)]
pub struct StubMailer {
    sent: Mutex<Vec<OrderConfirmation>>,
    failures: Mutex<usize>,
}

impl StubMailer {
    pub fn sent(&self) -> Vec<OrderConfirmation> {
        lock(&self.sent).clone()
    }

    /// Make the next `count` sends fail.
    pub fn fail_next(&self, count: usize) {
        *lock(&self.failures) = count;
    }
}

#[async_trait]
impl ConfirmationMailer for StubMailer {
    async fn send_order_confirmation(&self, order: &OrderConfirmation) -> Result<(), MailError> {
        {
            let mut failures = lock(&self.failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(MailError::InvalidAddress("mailbox unavailable".to_owned()));
            }
        }
        lock(&self.sent).push(order.clone());
        Ok(())
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Configuration pointing nowhere, with cleanup running immediately.
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://localhost/storehouse_test".to_owned()),
        host: IpAddr::from([127, 0, 0, 1]),
        port: 3000,
        base_url: "http://localhost:3000".to_owned(),
        checkout: CheckoutConfig {
            cleanup_grace: Duration::ZERO,
            ..CheckoutConfig::default()
        },
        stripe: StripeConfig {
            secret_key: SecretString::from("sk_test_unused".to_owned()),
            api_base: "http://127.0.0.1:9".to_owned(),
        },
        email: EmailConfig {
            smtp_host: "localhost".to_owned(),
            smtp_port: 2525,
            smtp_username: "storehouse".to_owned(),
            smtp_password: SecretString::from("unused".to_owned()),
            from_address: "orders@example.com".to_owned(),
        },
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// The storefront router over memory backends, remembering its session
/// cookie between requests like a browser would.
pub struct TestApp {
    router: Router,
    cookie: Option<String>,
    pub products: Arc<MemoryProducts>,
    pub orders: Arc<MemoryOrders>,
    pub provider: Arc<StubProvider>,
    pub mailer: Arc<StubMailer>,
}

impl TestApp {
    pub const PASSWORD: &'static str = "correct horse battery";

    pub fn new() -> Self {
        let products = Arc::new(MemoryProducts::default());
        let orders = Arc::new(MemoryOrders::default());
        let provider = Arc::new(StubProvider::default());
        let mailer = Arc::new(StubMailer::default());

        let config = test_config();
        let pool = PgPoolOptions::new()
            .connect_lazy(config.database_url.expose_secret())
            .expect("lazy pool");
        let backends = Backends {
            accounts: Arc::new(MemoryAccounts::default()),
            addresses: Arc::new(MemoryAddresses::default()),
            cards: Arc::new(MemoryCards::default()),
            cart: Arc::new(MemoryItems::<CartLine>::default()),
            favorites: Arc::new(MemoryItems::<FavoriteEntry>::default()),
            drafts: Arc::new(MemoryDrafts::default()),
            orders: orders.clone(),
            products: products.clone(),
            provider: provider.clone(),
            mailer: mailer.clone(),
        };
        let state = AppState::from_backends(config, pool, backends);

        let router = routes::routes()
            .layer(session_layer(MemoryStore::default(), false))
            .with_state(state);

        Self {
            router,
            cookie: None,
            products,
            orders,
            provider,
            mailer,
        }
    }

    /// Put a product in the catalogue.
    pub fn stock(&self, id: &str, price: i64) {
        self.products.add(product(id, price));
    }

    /// Send a request and return the raw response.
    pub async fn raw(&mut self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "127.0.0.1");
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");

        if let Some(set_cookie) = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
        {
            let pair = set_cookie.split(';').next().unwrap_or_default();
            self.cookie = pair
                .split_once('=')
                .filter(|(_, value)| !value.is_empty())
                .map(|_| pair.to_owned());
        }
        response
    }

    /// Read a response body as JSON; an empty body is `null`, plain text a string.
    pub async fn json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        if bytes.is_empty() {
            return Value::Null;
        }
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub async fn send(
        &mut self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.raw(method, uri, body).await;
        let status = response.status();
        (status, Self::json(response).await)
    }

    pub async fn post(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    /// Register `email` and stay signed in.
    pub async fn register(&mut self, email: &str) {
        let (status, body) = self
            .post(
                "/auth/register",
                json!({ "email": email, "password": Self::PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    }

    pub async fn login(&mut self, email: &str) {
        let (status, body) = self
            .post(
                "/auth/login",
                json!({ "email": email, "password": Self::PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
    }
}
