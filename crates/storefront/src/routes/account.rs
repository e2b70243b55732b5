//! Account route handlers: address book, order history and saved cards.
//!
//! All routes here require a signed-in user.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tower_sessions::Session;
use tracing::{info, instrument};

use storehouse_core::{AddressId, SavedCardId};

use crate::error::{AppError, Result};
use crate::middleware::RequireUser;
use crate::models::{Address, AddressFields, SavedCard, SubmittedOrder};
use crate::state::AppState;

/// List the user's addresses, default first.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn addresses(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<Json<Vec<Address>>> {
    Ok(Json(state.addresses().list(user.id).await?))
}

/// Create an address.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn create_address(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(fields): Json<AddressFields>,
) -> Result<(StatusCode, Json<Address>)> {
    let address = state.addresses().save(user.id, None, fields).await?;
    Ok((StatusCode::CREATED, Json(address)))
}

/// Update an address.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_address(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<AddressId>,
    Json(fields): Json<AddressFields>,
) -> Result<Json<Address>> {
    let address = state.addresses().save(user.id, Some(id), fields).await?;
    Ok(Json(address))
}

/// Make an address the default.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn set_default_address(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<AddressId>,
) -> Result<StatusCode> {
    state.addresses().set_default(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete an address.
///
/// Checkout selections pointing at it move to the new default, or are
/// cleared when no address is left.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn delete_address(
    State(state): State<AppState>,
    session: Session,
    RequireUser(user): RequireUser,
    Path(id): Path<AddressId>,
) -> Result<StatusCode> {
    let removal = state.addresses().delete(user.id, id).await?;
    state
        .checkout()
        .open(&session, Some(&user))?
        .release_address(&removal)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Submitted orders, newest first.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn orders(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<Json<Vec<SubmittedOrder>>> {
    Ok(Json(state.history().list_orders(user.id).await?))
}

/// Cards saved for later purchases.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn cards(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<Json<Vec<SavedCard>>> {
    Ok(Json(state.cards().list(user.id).await?))
}

/// Forget a saved card.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn delete_card(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<SavedCardId>,
) -> Result<StatusCode> {
    if !state.cards().delete(user.id, id).await? {
        return Err(AppError::NotFound("Saved card not found".to_string()));
    }
    info!(card_id = %id, "Saved card deleted");
    Ok(StatusCode::NO_CONTENT)
}
