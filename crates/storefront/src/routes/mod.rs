//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                         - Liveness check
//! GET  /health/ready                   - Readiness check (database)
//!
//! # Auth
//! POST /auth/register                  - Create an account and sign in
//! POST /auth/login                     - Sign in, merging the session cart
//! POST /auth/logout                    - Sign out
//!
//! # Cart and favorites (anonymous or signed in)
//! GET  /cart                           - Cart lines and subtotal
//! POST /cart/add                       - Add a product
//! POST /cart/update                    - Set a line quantity
//! POST /cart/remove                    - Remove a line
//! GET  /favorites                      - Favorite products
//! POST /favorites/add                  - Favorite a product
//! POST /favorites/remove               - Unfavorite a product
//!
//! # Account (requires auth)
//! GET    /account/addresses            - Address book
//! POST   /account/addresses            - Create an address
//! POST   /account/addresses/{id}       - Update an address
//! DELETE /account/addresses/{id}       - Delete an address
//! POST   /account/addresses/{id}/default - Make an address the default
//! GET    /account/orders               - Order history
//! GET    /account/cards                - Saved cards
//! DELETE /account/cards/{id}           - Forget a saved card
//!
//! # Checkout (requires auth)
//! GET  /checkout                       - Current draft and summary
//! POST /checkout                       - Start or resume the draft
//! POST /checkout/delivery-address      - Select the delivery address
//! POST /checkout/billing-address       - Select the billing address
//! POST /checkout/payment               - Select the payment method
//! POST /checkout/card-intent           - Create the intent for a new card
//! POST /checkout/submit                - Submit the order
//! GET  /checkout/confirmation          - Last accepted order
//!
//! # Payment proxy (POST only)
//! POST /api/create-customer
//! POST /api/create-payment-intent
//! POST /api/create-payment-intent-saved
//! POST /api/create-setup-intent
//! POST /api/retrieve-payment-method
//! POST /api/send-confirmation-email
//! ```

pub mod account;
pub mod auth;
pub mod cart;
pub mod checkout;
pub mod health;
pub mod payments;

use axum::{
    Router,
    routing::{get, post},
};

use crate::middleware::{auth_rate_limiter, payments_rate_limiter};
use crate::state::AppState;

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .layer(auth_rate_limiter())
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/remove", post(cart::remove))
}

/// Create the favorites routes router.
pub fn favorite_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::favorites))
        .route("/add", post(cart::add_favorite))
        .route("/remove", post(cart::remove_favorite))
}

/// Create the account routes router.
pub fn account_routes() -> Router<AppState> {
    use axum::routing::delete;

    Router::new()
        .route(
            "/addresses",
            get(account::addresses).post(account::create_address),
        )
        .route(
            "/addresses/{id}",
            post(account::update_address).delete(account::delete_address),
        )
        .route("/addresses/{id}/default", post(account::set_default_address))
        .route("/orders", get(account::orders))
        .route("/cards", get(account::cards))
        .route("/cards/{id}", delete(account::delete_card))
}

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(checkout::show).post(checkout::begin))
        .route("/delivery-address", post(checkout::delivery_address))
        .route("/billing-address", post(checkout::billing_address))
        .route("/payment", post(checkout::payment))
        .route("/card-intent", post(checkout::card_intent))
        .route(
            "/submit",
            post(checkout::submit).layer(payments_rate_limiter()),
        )
        .route("/confirmation", get(checkout::confirmation))
}

/// Create the payment proxy router.
///
/// Every endpoint accepts POST only; other methods get a JSON 405.
pub fn payment_api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/create-customer",
            post(payments::create_customer).fallback(payments::method_not_allowed),
        )
        .route(
            "/create-payment-intent",
            post(payments::create_payment_intent).fallback(payments::method_not_allowed),
        )
        .route(
            "/create-payment-intent-saved",
            post(payments::create_payment_intent_saved).fallback(payments::method_not_allowed),
        )
        .route(
            "/create-setup-intent",
            post(payments::create_setup_intent).fallback(payments::method_not_allowed),
        )
        .route(
            "/retrieve-payment-method",
            post(payments::retrieve_payment_method).fallback(payments::method_not_allowed),
        )
        .route(
            "/send-confirmation-email",
            post(payments::send_confirmation_email).fallback(payments::method_not_allowed),
        )
        .layer(payments_rate_limiter())
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        // Health checks
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        // Auth routes
        .nest("/auth", auth_routes())
        // Cart and favorites
        .nest("/cart", cart_routes())
        .nest("/favorites", favorite_routes())
        // Account routes
        .nest("/account", account_routes())
        // Checkout
        .nest("/checkout", checkout_routes())
        // Payment proxy
        .nest("/api", payment_api_routes())
}
