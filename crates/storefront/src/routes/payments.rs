//! Payment proxy endpoints.
//!
//! Thin JSON wrappers around the payments provider for clients that drive the
//! card flow themselves. Field names follow the client's camelCase, except
//! for the confirmation email which mirrors the stored order.
//!
//! Bodies are read field by field: a missing body counts as `{}`, and a field
//! of an unexpected type only affects itself. Anything that is not a JSON
//! object is a 400.

use std::borrow::Cow;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::payments::{NewPaymentIntent, PaymentError, PaymentIntent, PaymentMethodDetails};
use crate::services::{ConfirmationLine, MailError, OrderConfirmation};
use crate::state::AppState;

/// Error answered by the proxy endpoints: `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(Cow<'static, str>),
    #[error("payment provider error: {0}")]
    Provider(#[from] PaymentError),
    #[error("confirmation email failed: {0}")]
    Mail(#[from] MailError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
            Self::Provider(e) => {
                let event_id = sentry::capture_error(&self);
                tracing::error!(error = %e, sentry_event_id = %event_id, "Payment proxy error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.customer_message().to_string())
            }
            Self::Mail(e) => {
                let event_id = sentry::capture_error(&self);
                tracing::error!(
                    error = %e,
                    sentry_event_id = %event_id,
                    "Confirmation email failed"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to send confirmation email".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ProxyResult<T> = Result<T, ProxyError>;

fn bad_request(message: impl Into<Cow<'static, str>>) -> ProxyError {
    ProxyError::BadRequest(message.into())
}

/// A JSON object request body.
#[derive(Debug, Default)]
struct Fields(Map<String, Value>);

impl Fields {
    fn parse(body: &Bytes) -> ProxyResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        match serde_json::from_slice(body) {
            Ok(Value::Object(fields)) => Ok(Self(fields)),
            Ok(_) => Err(bad_request("Request body must be a JSON object")),
            Err(e) => {
                warn!(error = %e, "Unreadable request body");
                Err(bad_request("Request body is not valid JSON"))
            }
        }
    }

    /// The field `name`, unless absent or `null`.
    fn value(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    /// Trimmed, non-empty text. Numbers are read in their decimal form.
    fn text(&self, name: &str) -> Option<String> {
        let text = match self.value(name)? {
            Value::String(s) => s.trim().to_owned(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Read a positive amount in minor units.
fn minor_amount(raw: Option<&Value>) -> ProxyResult<i64> {
    let raw = raw
        .filter(|v| !v.is_null())
        .ok_or_else(|| bad_request("Amount is required"))?;
    raw.as_i64()
        .filter(|a| *a > 0)
        .ok_or_else(|| bad_request("Amount must be a positive integer in minor units"))
}

/// Fallback for every non-POST method.
pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

// =============================================================================
// Customers and intents
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerCreated {
    pub customer_id: String,
}

/// `POST /api/create-customer`
#[instrument(skip_all)]
pub async fn create_customer(
    State(state): State<AppState>,
    body: Bytes,
) -> ProxyResult<Json<CustomerCreated>> {
    let fields = Fields::parse(&body)?;
    let email = fields
        .text("email")
        .ok_or_else(|| bad_request("Email is required"))?;

    let customer = state.provider().create_customer(&email).await?;
    info!(customer_id = %customer.id, "Customer created");
    Ok(Json(CustomerCreated {
        customer_id: customer.id,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSecret {
    pub client_secret: String,
}

/// `POST /api/create-payment-intent`
///
/// Repeating the call for the same order and amount returns the same intent.
#[instrument(skip_all)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    body: Bytes,
) -> ProxyResult<Json<ClientSecret>> {
    let fields = Fields::parse(&body)?;
    let amount = minor_amount(fields.value("amount"))?;
    let order_id = fields.text("orderId").unwrap_or_default();

    let intent = state
        .provider()
        .create_payment_intent(&NewPaymentIntent {
            amount,
            currency: state.config().checkout.currency,
            idempotency_key: (!order_id.is_empty()).then(|| format!("api-{order_id}-{amount}")),
            order_id,
            customer: fields.text("customerId"),
            ..NewPaymentIntent::default()
        })
        .await?;

    let client_secret = intent
        .client_secret
        .ok_or_else(|| PaymentError::Parse("payment intent has no client secret".to_string()))?;
    info!(intent_id = %intent.id, amount, "Payment intent created");
    Ok(Json(ClientSecret { client_secret }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedCardCharge {
    pub payment_intent: PaymentIntent,
}

/// `POST /api/create-payment-intent-saved`
///
/// Charges a saved card off-session. A card not yet attached to a customer is
/// attached to `customerId` first; a card owned by another customer is
/// refused.
#[instrument(skip_all)]
pub async fn create_payment_intent_saved(
    State(state): State<AppState>,
    body: Bytes,
) -> ProxyResult<Json<SavedCardCharge>> {
    let fields = Fields::parse(&body)?;

    let order_id = fields.text("orderId");
    let payment_method = fields.text("paymentMethodId");
    let customer = fields.text("customerId");
    let mut missing = Vec::new();
    if fields.value("amount").is_none() {
        missing.push("amount");
    }
    if order_id.is_none() {
        missing.push("orderId");
    }
    if payment_method.is_none() {
        missing.push("paymentMethodId");
    }
    if customer.is_none() {
        missing.push("customerId");
    }
    let (order_id, payment_method, customer) = match (order_id, payment_method, customer) {
        (Some(order_id), Some(payment_method), Some(customer)) if missing.is_empty() => {
            (order_id, payment_method, customer)
        }
        _ => {
            return Err(bad_request(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }
    };
    let amount = minor_amount(fields.value("amount"))?;

    let provider = state.provider();
    let method = provider.retrieve_payment_method(&payment_method).await?;
    match method.customer.as_deref() {
        Some(owner) if owner != customer => {
            warn!(%payment_method, "Payment method belongs to another customer");
            return Err(bad_request("Payment method belongs to another customer"));
        }
        Some(_) => {}
        None => {
            provider
                .attach_payment_method(&payment_method, &customer)
                .await?;
        }
    }

    let intent = provider
        .create_payment_intent(&NewPaymentIntent {
            amount,
            currency: state.config().checkout.currency,
            idempotency_key: Some(format!(
                "api-{order_id}-saved-{payment_method}-{customer}-{amount}"
            )),
            order_id,
            customer: Some(customer),
            payment_method: Some(payment_method),
            off_session: true,
            ..NewPaymentIntent::default()
        })
        .await?;

    info!(intent_id = %intent.id, status = %intent.status, "Saved card charged");
    Ok(Json(SavedCardCharge {
        payment_intent: intent,
    }))
}

/// `POST /api/create-setup-intent`
#[instrument(skip_all)]
pub async fn create_setup_intent(
    State(state): State<AppState>,
    body: Bytes,
) -> ProxyResult<Json<ClientSecret>> {
    let fields = Fields::parse(&body)?;
    let intent = state
        .provider()
        .create_setup_intent(fields.text("customerId").as_deref())
        .await?;

    let client_secret = intent
        .client_secret
        .ok_or_else(|| PaymentError::Parse("setup intent has no client secret".to_string()))?;
    Ok(Json(ClientSecret { client_secret }))
}

/// `POST /api/retrieve-payment-method`
#[instrument(skip_all)]
pub async fn retrieve_payment_method(
    State(state): State<AppState>,
    body: Bytes,
) -> ProxyResult<Json<PaymentMethodDetails>> {
    let fields = Fields::parse(&body)?;
    let id = fields
        .text("paymentMethodId")
        .ok_or_else(|| bad_request("Payment method ID is required"))?;

    Ok(Json(state.provider().retrieve_payment_method(&id).await?))
}

// =============================================================================
// Confirmation email
// =============================================================================

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

/// `POST /api/send-confirmation-email`
///
/// Each order number is emailed at most once, whichever path sends first. A
/// failed send leaves the order number free for a retry.
#[instrument(skip_all)]
pub async fn send_confirmation_email(
    State(state): State<AppState>,
    body: Bytes,
) -> ProxyResult<Json<Message>> {
    let fields = Fields::parse(&body)?;
    let to = fields
        .text("email")
        .ok_or_else(|| bad_request("Email is required"))?;
    let lines: Vec<ConfirmationLine> = match fields.value("products_ordered") {
        Some(lines) => serde_json::from_value(lines.clone())
            .map_err(|_| bad_request("products_ordered must be a list of order lines"))?,
        None => Vec::new(),
    };
    let order_number = fields.text("order_number").unwrap_or_default();

    if !order_number.is_empty() && !state.latch().claim(&order_number).await {
        info!(order_number, "Confirmation already sent");
        return Ok(Json(Message {
            message: "Confirmation email already sent",
        }));
    }

    let confirmation = OrderConfirmation {
        to,
        name: fields.text("name").unwrap_or_default(),
        order_number,
        order_total: fields.text("order_total").unwrap_or_default(),
        created_at: fields.text("created_at").unwrap_or_default(),
        lines,
    };
    if let Err(e) = state.mailer().send_order_confirmation(&confirmation).await {
        if !confirmation.order_number.is_empty() {
            state.latch().release(&confirmation.order_number).await;
        }
        return Err(e.into());
    }

    info!(order_number = %confirmation.order_number, "Confirmation email sent");
    Ok(Json(Message {
        message: "Confirmation email sent",
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode, header};
    use serde_json::json;

    use crate::testing::{StubProvider, TestApp};

    #[tokio::test]
    async fn test_create_payment_intent_returns_client_secret() {
        let mut app = TestApp::new();
        let (status, body) = app
            .post(
                "/api/create-payment-intent",
                json!({ "amount": 12500, "orderId": "X" }),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["clientSecret"].as_str().is_some_and(|s| !s.is_empty()));
        let intents = app.provider.intents();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].amount, 12500);
        assert_eq!(intents[0].order_id, "X");
    }

    #[tokio::test]
    async fn test_create_payment_intent_requires_amount() {
        let mut app = TestApp::new();
        let (status, body) = app.post("/api/create-payment-intent", json!({})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Amount is required" }));
        assert!(app.provider.intents().is_empty());
    }

    #[tokio::test]
    async fn test_numeric_order_id_is_read_as_text() {
        let mut app = TestApp::new();
        let (status, body) = app
            .post(
                "/api/create-payment-intent",
                json!({ "amount": 500, "orderId": 42 }),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["clientSecret"].as_str().is_some());
        let intents = app.provider.intents();
        assert_eq!(intents[0].order_id, "42");
        assert_eq!(intents[0].idempotency_key.as_deref(), Some("api-42-500"));
    }

    #[tokio::test]
    async fn test_body_must_be_a_json_object() {
        let mut app = TestApp::new();
        let (status, body) = app
            .post("/api/create-payment-intent", json!([{ "amount": 500 }]))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Request body must be a JSON object" }));

        let (status, body) = app
            .send(Method::POST, "/api/create-payment-intent", None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Amount is required" }));
        assert!(app.provider.intents().is_empty());
    }

    #[tokio::test]
    async fn test_fractional_amount_is_rejected() {
        let mut app = TestApp::new();
        let (status, _) = app
            .post(
                "/api/create-payment-intent",
                json!({ "amount": 125.5, "orderId": "X" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_repeated_intent_for_same_order_is_reused() {
        let mut app = TestApp::new();
        let body = json!({ "amount": 500, "orderId": "X" });
        let (_, first) = app.post("/api/create-payment-intent", body.clone()).await;
        let (_, second) = app.post("/api/create-payment-intent", body).await;

        assert_eq!(first, second);
        assert_eq!(app.provider.intents().len(), 1);
    }

    #[tokio::test]
    async fn test_non_post_is_method_not_allowed() {
        let mut app = TestApp::new();
        let response = app
            .raw(Method::GET, "/api/create-payment-intent", None)
            .await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get(header::ALLOW).and_then(|v| v.to_str().ok()),
            Some("POST")
        );
        let body = TestApp::json(response).await;
        assert_eq!(body, json!({ "error": "Method not allowed" }));
    }

    #[tokio::test]
    async fn test_create_customer_requires_email() {
        let mut app = TestApp::new();
        let (status, body) = app.post("/api/create-customer", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Email is required" }));

        let (status, body) = app
            .post("/api/create-customer", json!({ "email": "ana@example.com" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["customerId"].as_str().is_some_and(|id| id.starts_with("cus_")));
    }

    #[tokio::test]
    async fn test_saved_intent_lists_missing_fields() {
        let mut app = TestApp::new();
        let (status, body) = app
            .post(
                "/api/create-payment-intent-saved",
                json!({ "amount": 500, "orderId": "X" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({ "error": "Missing required fields: paymentMethodId, customerId" })
        );
    }

    #[tokio::test]
    async fn test_saved_intent_charges_off_session() {
        let mut app = TestApp::new();
        let (status, body) = app
            .post(
                "/api/create-payment-intent-saved",
                json!({
                    "amount": 500,
                    "orderId": "X",
                    "paymentMethodId": "pm_card_visa",
                    "customerId": "cus_1",
                }),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paymentIntent"]["status"], json!("succeeded"));
        let intents = app.provider.intents();
        assert!(intents[0].off_session);
        assert_eq!(intents[0].customer.as_deref(), Some("cus_1"));
    }

    #[tokio::test]
    async fn test_declined_saved_card_does_not_block_another_card() {
        let mut app = TestApp::new();
        let charge = |payment_method: &str| {
            json!({
                "amount": 500,
                "orderId": "X",
                "paymentMethodId": payment_method,
                "customerId": "cus_1",
            })
        };

        for _ in 0..2 {
            let (status, body) = app
                .post(
                    "/api/create-payment-intent-saved",
                    charge(StubProvider::DECLINED_CARD),
                )
                .await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body, json!({ "error": "Your card was declined." }));
        }

        let (status, body) = app
            .post("/api/create-payment-intent-saved", charge("pm_card_visa"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paymentIntent"]["status"], json!("succeeded"));

        let intents = app.provider.intents();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].payment_method.as_deref(), Some("pm_card_visa"));
    }

    #[tokio::test]
    async fn test_saved_card_of_another_customer_is_refused() {
        let mut app = TestApp::new();
        let charge = |customer: &str| {
            json!({
                "amount": 500,
                "orderId": "X",
                "paymentMethodId": "pm_card_visa",
                "customerId": customer,
            })
        };

        let (status, _) = app
            .post("/api/create-payment-intent-saved", charge("cus_1"))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .post("/api/create-payment-intent-saved", charge("cus_2"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({ "error": "Payment method belongs to another customer" })
        );
        assert_eq!(app.provider.intents().len(), 1);
    }

    #[tokio::test]
    async fn test_setup_intent_and_payment_method() {
        let mut app = TestApp::new();
        let (status, body) = app.post("/api/create-setup-intent", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["clientSecret"].as_str().is_some());

        let (status, _) = app.post("/api/retrieve-payment-method", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .post(
                "/api/retrieve-payment-method",
                json!({ "paymentMethodId": "pm_card_visa" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["card"]["last4"], json!("4242"));
    }

    #[tokio::test]
    async fn test_confirmation_email_is_sent_once_per_order() {
        let mut app = TestApp::new();
        let body = json!({
            "email": "ana@example.com",
            "name": "Ana",
            "order_number": "SH-1",
            "order_total": "$125.00",
            "created_at": "2026-10-18",
            "products_ordered": [
                { "title": "Product a", "quantity": 2, "line_total": "$100.00" }
            ],
        });

        let (status, first) = app.post("/api/send-confirmation-email", body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, json!({ "message": "Confirmation email sent" }));

        let (status, second) = app.post("/api/send-confirmation-email", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second, json!({ "message": "Confirmation email already sent" }));

        let sent = app.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].lines.len(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_email_reads_numeric_total() {
        let mut app = TestApp::new();
        let (status, body) = app
            .post(
                "/api/send-confirmation-email",
                json!({
                    "email": "ana@example.com",
                    "order_number": "SH-2",
                    "order_total": 125,
                }),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Confirmation email sent" }));
        let sent = app.mailer.sent();
        assert_eq!(sent[0].to, "ana@example.com");
        assert_eq!(sent[0].order_total, "125");
        assert!(sent[0].lines.is_empty());
    }

    #[tokio::test]
    async fn test_failed_confirmation_email_can_be_retried() {
        let mut app = TestApp::new();
        app.mailer.fail_next(1);
        let body = json!({ "email": "ana@example.com", "order_number": "SH-3" });

        let (status, first) = app.post("/api/send-confirmation-email", body.clone()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(first, json!({ "error": "Failed to send confirmation email" }));
        assert!(app.mailer.sent().is_empty());

        let (status, second) = app.post("/api/send-confirmation-email", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second, json!({ "message": "Confirmation email sent" }));
        assert_eq!(app.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_email_requires_address() {
        let mut app = TestApp::new();
        let (status, body) = app
            .post("/api/send-confirmation-email", json!({ "name": "Ana" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Email is required" }));
        assert!(app.mailer.sent().is_empty());
    }
}
