//! Cart and favorites route handlers.
//!
//! Anonymous visitors keep their cart in the session; signed-in users work
//! against their account. Any cart change also refreshes the open checkout
//! draft so its summary never goes stale.

use axum::{Json, extract::State};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use storehouse_core::{ProductId, Quantity};

use crate::error::Result;
use crate::middleware::OptionalUser;
use crate::models::{CartLine, CurrentUser, FavoriteEntry};
use crate::services::ServiceError;
use crate::state::AppState;

/// Cart as returned to the client.
#[derive(Debug, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub subtotal: Decimal,
    pub item_count: u32,
}

impl From<Vec<CartLine>> for CartView {
    fn from(lines: Vec<CartLine>) -> Self {
        Self {
            subtotal: lines.iter().map(|l| l.line_total).sum(),
            item_count: lines.iter().map(|l| u32::from(l.quantity.get())).sum(),
            lines,
        }
    }
}

/// Add to cart request.
#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: ProductId,
    #[serde(default)]
    pub quantity: Option<i64>,
}

/// Update quantity request.
#[derive(Debug, Deserialize)]
pub struct UpdateCartRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Request naming a single product.
#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    pub product_id: ProductId,
}

/// Keep the checkout draft of a signed-in user in step with `lines`.
pub(crate) async fn refresh_draft(
    state: &AppState,
    session: &Session,
    user: Option<&CurrentUser>,
    lines: &[CartLine],
) -> Result<()> {
    if let Some(user) = user {
        state
            .checkout()
            .open(session, Some(user))?
            .refresh_after_cart_change(lines)
            .await?;
    }
    Ok(())
}

/// Display the cart.
#[instrument(skip_all)]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
) -> Result<Json<CartView>> {
    let lines = state.carts().cart(&session, user.as_ref()).load().await?;
    Ok(Json(lines.into()))
}

/// Add a product to the cart. Quantity defaults to one.
#[instrument(skip_all, fields(product_id = %request.product_id))]
pub async fn add(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Json(request): Json<AddToCartRequest>,
) -> Result<Json<CartView>> {
    let quantity = match request.quantity {
        Some(q) => Quantity::new(q).map_err(|_| ServiceError::invalid("quantity"))?,
        None => Quantity::ONE,
    };
    let product = state.catalog().require(&request.product_id).await?;

    let lines = state
        .carts()
        .cart(&session, user.as_ref())
        .add(&product, quantity)
        .await?;
    refresh_draft(&state, &session, user.as_ref(), &lines).await?;

    Ok(Json(lines.into()))
}

/// Set the quantity of a cart line.
#[instrument(skip_all, fields(product_id = %request.product_id))]
pub async fn update(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Json(request): Json<UpdateCartRequest>,
) -> Result<Json<CartView>> {
    let lines = state
        .carts()
        .cart(&session, user.as_ref())
        .update_quantity(&request.product_id, request.quantity)
        .await?;
    refresh_draft(&state, &session, user.as_ref(), &lines).await?;

    Ok(Json(lines.into()))
}

/// Remove a line from the cart.
#[instrument(skip_all, fields(product_id = %request.product_id))]
pub async fn remove(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Json(request): Json<ProductRequest>,
) -> Result<Json<CartView>> {
    let lines = state
        .carts()
        .cart(&session, user.as_ref())
        .remove(&request.product_id)
        .await?;
    refresh_draft(&state, &session, user.as_ref(), &lines).await?;

    Ok(Json(lines.into()))
}

/// List favorites.
#[instrument(skip_all)]
pub async fn favorites(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
) -> Result<Json<Vec<FavoriteEntry>>> {
    let entries = state
        .carts()
        .favorites(&session, user.as_ref())
        .load()
        .await?;
    Ok(Json(entries))
}

/// Favorite a product. Favoriting twice keeps one entry.
#[instrument(skip_all, fields(product_id = %request.product_id))]
pub async fn add_favorite(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Json(request): Json<ProductRequest>,
) -> Result<Json<Vec<FavoriteEntry>>> {
    let product = state.catalog().require(&request.product_id).await?;
    let entries = state
        .carts()
        .favorites(&session, user.as_ref())
        .add(&product)
        .await?;
    Ok(Json(entries))
}

/// Unfavorite a product.
#[instrument(skip_all, fields(product_id = %request.product_id))]
pub async fn remove_favorite(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Json(request): Json<ProductRequest>,
) -> Result<Json<Vec<FavoriteEntry>>> {
    let entries = state
        .carts()
        .favorites(&session, user.as_ref())
        .remove(&request.product_id)
        .await?;
    Ok(Json(entries))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn test_anonymous_cart_adds_up_quantities() {
        let mut app = TestApp::new();
        app.stock("a", 50);

        app.post("/cart/add", json!({ "product_id": "a", "quantity": 2 }))
            .await;
        let (status, cart) = app
            .post("/cart/add", json!({ "product_id": "a", "quantity": 3 }))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(cart["lines"].as_array().map(Vec::len), Some(1));
        assert_eq!(cart["lines"][0]["quantity"], json!(5));
        assert_eq!(cart["item_count"], json!(5));
        assert_eq!(cart["subtotal"], json!("250"));
    }

    #[tokio::test]
    async fn test_cart_survives_between_requests() {
        let mut app = TestApp::new();
        app.stock("a", 10);

        app.post("/cart/add", json!({ "product_id": "a" })).await;
        let (status, cart) = app.send(Method::GET, "/cart", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(cart["lines"][0]["quantity"], json!(1));
    }

    #[tokio::test]
    async fn test_remove_then_add_starts_from_one() {
        let mut app = TestApp::new();
        app.stock("a", 10);

        app.post("/cart/add", json!({ "product_id": "a", "quantity": 4 }))
            .await;
        app.post("/cart/remove", json!({ "product_id": "a" })).await;
        let (_, cart) = app.post("/cart/add", json!({ "product_id": "a" })).await;

        assert_eq!(cart["lines"][0]["quantity"], json!(1));
    }

    #[tokio::test]
    async fn test_unknown_product_is_not_found() {
        let mut app = TestApp::new();
        let (status, _) = app
            .post("/cart/add", json!({ "product_id": "missing" }))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_out_of_range_quantity_is_rejected() {
        let mut app = TestApp::new();
        app.stock("a", 10);
        app.post("/cart/add", json!({ "product_id": "a" })).await;

        let (status, body) = app
            .post("/cart/update", json!({ "product_id": "a", "quantity": 0 }))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["missing"], json!(["quantity"]));
    }

    #[tokio::test]
    async fn test_favorites_keep_one_entry_per_product() {
        let mut app = TestApp::new();
        app.stock("a", 10);

        app.post("/favorites/add", json!({ "product_id": "a" })).await;
        let (status, favorites) = app.post("/favorites/add", json!({ "product_id": "a" })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(favorites.as_array().map(Vec::len), Some(1));

        let (_, favorites) = app
            .post("/favorites/remove", json!({ "product_id": "a" }))
            .await;
        assert_eq!(favorites, json!([]));
    }

    #[tokio::test]
    async fn test_sign_in_merges_session_cart() {
        let mut app = TestApp::new();
        app.stock("a", 10);
        app.register("ana@example.com").await;
        app.post("/cart/add", json!({ "product_id": "a", "quantity": 3 }))
            .await;
        app.post("/auth/logout", json!({})).await;

        app.post("/cart/add", json!({ "product_id": "a" })).await;
        app.login("ana@example.com").await;

        let (_, cart) = app.send(Method::GET, "/cart", None).await;
        assert_eq!(cart["lines"].as_array().map(Vec::len), Some(1));
        assert_eq!(cart["lines"][0]["quantity"], json!(4));
    }
}
