//! Authentication route handlers.
//!
//! Handles registration, login and logout with local password accounts.
//! Signing in merges the visitor's session cart and favorites into the
//! account.

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{info, instrument, warn};

use crate::error::{Result, clear_sentry_user, set_sentry_user};
use crate::middleware::{clear_current_user, set_current_user};
use crate::models::{CurrentUser, User};
use crate::state::AppState;

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Registration request body.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Put `user` into the session and bring the session cart along.
async fn sign_in(state: &AppState, session: &Session, user: &User) -> Result<CurrentUser> {
    // New session id on privilege change
    session.cycle_id().await?;

    let current = CurrentUser {
        id: user.id,
        email: user.email.clone(),
    };
    set_current_user(session, &current).await?;
    set_sentry_user(&current.id, Some(current.email.as_str()));

    // The account stays usable without the merge; the session items are kept
    // for the next sign-in.
    if let Err(e) = state.carts().reconcile_on_sign_in(session, &current).await {
        warn!(error = %e, user_id = %current.id, "Cart reconciliation failed");
    }

    Ok(current)
}

/// Handle registration. The new user is signed in straight away.
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<CurrentUser>)> {
    let user = state
        .accounts()
        .register(
            &request.email,
            &request.password,
            request.full_name.as_deref(),
        )
        .await?;
    info!(user_id = %user.id, "User registered");

    let current = sign_in(&state, &session, &user).await?;
    Ok((StatusCode::CREATED, Json(current)))
}

/// Handle login.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<LoginRequest>,
) -> Result<Json<CurrentUser>> {
    let user = state
        .accounts()
        .login(&request.email, &request.password)
        .await?;
    info!(user_id = %user.id, "User logged in");

    Ok(Json(sign_in(&state, &session, &user).await?))
}

/// Handle logout.
#[instrument(skip_all)]
pub async fn logout(session: Session) -> StatusCode {
    if let Err(e) = clear_current_user(&session).await {
        warn!(error = %e, "Failed to clear current user from session");
    }
    if let Err(e) = session.flush().await {
        tracing::error!("Failed to flush session: {e}");
    }
    clear_sentry_user();

    StatusCode::NO_CONTENT
}
