//! Checkout route handlers.
//!
//! Every selection is persisted on the draft as soon as it is made, so a
//! reload resumes where the visitor left off.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use storehouse_core::{AddressId, DraftId, PaymentMethod};

use crate::error::{AppError, Result};
use crate::middleware::RequireUser;
use crate::models::{
    Address, CardSelection, CartLine, ConfirmationSnapshot, CurrentUser, OrderDraft,
    OrderSummary, SavedCard, session_keys,
};
use crate::services::{CardIntent, CheckoutSession, SubmitOutcome, SubmitRequest};
use crate::state::AppState;

/// Draft as returned to the client.
#[derive(Debug, Serialize)]
pub struct DraftView {
    pub id: DraftId,
    pub delivery_address_id: Option<AddressId>,
    pub billing_address_id: Option<AddressId>,
    pub payment_method: Option<PaymentMethod>,
    pub card_selection: Option<CardSelection>,
    /// Selections still needed before the order can be submitted.
    pub missing: Vec<&'static str>,
}

impl From<&OrderDraft> for DraftView {
    fn from(draft: &OrderDraft) -> Self {
        Self {
            id: draft.id,
            delivery_address_id: draft.delivery_address_id,
            billing_address_id: draft.billing_address_id,
            payment_method: draft.payment_method,
            card_selection: draft.card_selection.clone(),
            missing: draft.missing_fields(),
        }
    }
}

/// Checkout page data.
#[derive(Debug, Serialize)]
pub struct CheckoutView {
    pub draft: Option<DraftView>,
    pub summary: OrderSummary,
    pub addresses: Vec<Address>,
    pub cards: Vec<SavedCard>,
}

/// A draft together with its priced summary.
#[derive(Debug, Serialize)]
pub struct DraftResponse {
    pub draft: DraftView,
    pub summary: OrderSummary,
}

/// Address selection request.
#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    pub address_id: AddressId,
}

/// Payment method selection request.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    #[serde(default)]
    pub card: Option<CardSelection>,
}

/// New-card intent request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CardIntentRequest {
    /// Keep the card on the account once it is paid with.
    pub save_card: bool,
}

/// Open checkout and load the user's cart.
async fn open(
    state: &AppState,
    session: &Session,
    user: &CurrentUser,
) -> Result<(CheckoutSession, Vec<CartLine>)> {
    let checkout = state.checkout().open(session, Some(user))?;
    let cart = state.carts().cart(session, Some(user)).load().await?;
    Ok((checkout, cart))
}

async fn respond(
    checkout: &CheckoutSession,
    draft: &OrderDraft,
    cart: &[CartLine],
) -> Result<Json<DraftResponse>> {
    let summary = match &draft.summary {
        Some(summary) if summary.is_consistent() => summary.clone(),
        _ => checkout.current_summary(cart).await?,
    };
    Ok(Json(DraftResponse {
        draft: draft.into(),
        summary,
    }))
}

/// Current draft, summary and the choices available to the user.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    RequireUser(user): RequireUser,
) -> Result<Json<CheckoutView>> {
    let (checkout, cart) = open(&state, &session, &user).await?;
    let draft = checkout.current().await?;
    let summary = checkout.current_summary(&cart).await?;

    Ok(Json(CheckoutView {
        draft: draft.as_ref().map(DraftView::from),
        summary,
        addresses: state.addresses().list(user.id).await?,
        cards: state.cards().list(user.id).await?,
    }))
}

/// Start checkout, or resume the draft already bound to the session.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn begin(
    State(state): State<AppState>,
    session: Session,
    RequireUser(user): RequireUser,
) -> Result<Json<DraftResponse>> {
    let (checkout, cart) = open(&state, &session, &user).await?;
    let draft = checkout.begin(&cart).await?;
    respond(&checkout, &draft, &cart).await
}

/// Select the delivery address.
#[instrument(skip_all, fields(user_id = %user.id, address_id = %request.address_id))]
pub async fn delivery_address(
    State(state): State<AppState>,
    session: Session,
    RequireUser(user): RequireUser,
    Json(request): Json<AddressRequest>,
) -> Result<Json<DraftResponse>> {
    let (checkout, cart) = open(&state, &session, &user).await?;
    let draft = checkout
        .select_delivery_address(request.address_id, &cart)
        .await?;
    respond(&checkout, &draft, &cart).await
}

/// Select the billing address.
#[instrument(skip_all, fields(user_id = %user.id, address_id = %request.address_id))]
pub async fn billing_address(
    State(state): State<AppState>,
    session: Session,
    RequireUser(user): RequireUser,
    Json(request): Json<AddressRequest>,
) -> Result<Json<DraftResponse>> {
    let (checkout, cart) = open(&state, &session, &user).await?;
    let draft = checkout
        .select_billing_address(request.address_id, &cart)
        .await?;
    respond(&checkout, &draft, &cart).await
}

/// Select the payment method, and for cards which card to use.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn payment(
    State(state): State<AppState>,
    session: Session,
    RequireUser(user): RequireUser,
    Json(request): Json<PaymentRequest>,
) -> Result<Json<DraftResponse>> {
    let (checkout, cart) = open(&state, &session, &user).await?;
    let draft = checkout
        .select_payment_method(request.method, request.card, &cart)
        .await?;
    respond(&checkout, &draft, &cart).await
}

/// Create the provider intent the client confirms a new card against.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn card_intent(
    State(state): State<AppState>,
    session: Session,
    RequireUser(user): RequireUser,
    request: Option<Json<CardIntentRequest>>,
) -> Result<Json<CardIntent>> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let (checkout, cart) = open(&state, &session, &user).await?;
    let intent = state
        .payments()
        .start_new_card(&checkout, &cart, request.save_card)
        .await?;
    Ok(Json(intent))
}

/// Submit the order.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn submit(
    State(state): State<AppState>,
    session: Session,
    RequireUser(user): RequireUser,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitOutcome>> {
    let (checkout, cart) = open(&state, &session, &user).await?;
    Ok(Json(state.payments().submit(&checkout, &cart, request).await?))
}

/// The order accepted last in this session.
#[instrument(skip_all)]
pub async fn confirmation(
    session: Session,
    RequireUser(_user): RequireUser,
) -> Result<Json<ConfirmationSnapshot>> {
    session
        .get::<ConfirmationSnapshot>(session_keys::LAST_ORDER)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No recent order".to_string()))
}
