//! Session middleware configuration.
//!
//! Sessions are stored in `PostgreSQL` via tower-sessions. Besides the
//! signed-in user they carry the anonymous cart, favorites and the checkout
//! draft id, so the expiry is generous.

use sqlx::PgPool;
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};
use tower_sessions_sqlx_store::PostgresStore;

use crate::config::StorefrontConfig;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "storehouse_session";

/// Session expiry time in seconds (30 days).
const SESSION_EXPIRY_SECONDS: i64 = 30 * 24 * 60 * 60;

/// The session store rejected the schema or table name.
#[derive(Debug, thiserror::Error)]
#[error("invalid session table: {0}")]
pub struct SessionStoreError(String);

/// Create the session layer backed by `storefront.session`.
///
/// # Errors
///
/// Returns `SessionStoreError` if the schema or table name is rejected.
pub fn create_session_layer(
    pool: &PgPool,
    config: &StorefrontConfig,
) -> Result<SessionManagerLayer<PostgresStore>, SessionStoreError> {
    let store = PostgresStore::new(pool.clone())
        .with_schema_name("storefront")
        .and_then(|store| store.with_table_name("session"))
        .map_err(SessionStoreError)?;

    Ok(session_layer(
        store,
        config.base_url.starts_with("https://"),
    ))
}

/// Apply the storefront cookie settings to `store`.
#[must_use]
pub fn session_layer<S: SessionStore + Clone>(store: S, secure: bool) -> SessionManagerLayer<S> {
    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS),
        ))
        .with_secure(secure)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}
