//! Stripe REST client.
//!
//! Requests are form-encoded with nested keys (`metadata[order_id]`) and
//! authenticated with the secret key as a bearer token. Creating intents
//! accepts an `Idempotency-Key` so a retried request cannot charge twice.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::{
    Customer, NewPaymentIntent, PaymentError, PaymentIntent, PaymentMethodDetails,
    PaymentProvider, SetupIntent,
};
use crate::config::StripeConfig;

const HEADER_IDEMPOTENCY: &str = "Idempotency-Key";

type Form = Vec<(String, String)>;

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Stripe API client.
#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Errors
    ///
    /// Returns error if the secret key is not a valid header value or the
    /// HTTP client fails to build.
    pub fn new(config: &StripeConfig) -> Result<Self, PaymentError> {
        let mut headers = HeaderMap::new();

        let mut auth_value =
            HeaderValue::from_str(&format!("Bearer {}", config.secret_key.expose_secret()))
                .map_err(|e| PaymentError::Parse(format!("Invalid API key format: {e}")))?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &Form,
        idempotency_key: Option<&str>,
    ) -> Result<T, PaymentError> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.api_base))
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header(HEADER_IDEMPOTENCY, key);
        }
        read_response(request.send().await?).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PaymentError> {
        let response = self
            .client
            .get(format!("{}{path}", self.api_base))
            .send()
            .await?;
        read_response(response).await
    }
}

async fn read_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, PaymentError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(parse_error(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| PaymentError::Parse(e.to_string()))
}

/// Turn an error response body into [`PaymentError::Provider`].
fn parse_error(status: u16, body: &str) -> PaymentError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => PaymentError::Provider {
            status,
            message: envelope
                .error
                .message
                .unwrap_or_else(|| "The payment could not be processed".to_string()),
            code: envelope.error.code,
        },
        Err(_) => PaymentError::Provider {
            status,
            message: "The payment could not be processed".to_string(),
            code: None,
        },
    }
}

/// Form fields for creating a payment intent.
fn intent_form(params: &NewPaymentIntent) -> Form {
    let mut form = vec![
        ("amount".to_string(), params.amount.to_string()),
        ("currency".to_string(), params.currency.as_lower().to_string()),
        ("metadata[order_id]".to_string(), params.order_id.clone()),
    ];
    if let Some(customer) = &params.customer {
        form.push(("customer".to_string(), customer.clone()));
    }
    if params.setup_future_usage {
        form.push(("setup_future_usage".to_string(), "off_session".to_string()));
    }
    match &params.payment_method {
        Some(payment_method) => {
            form.push(("payment_method".to_string(), payment_method.clone()));
            form.push(("confirm".to_string(), "true".to_string()));
            if params.off_session {
                form.push(("off_session".to_string(), "true".to_string()));
            }
        }
        None => {
            form.push((
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ));
        }
    }
    form
}

fn path_segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

#[async_trait]
impl PaymentProvider for StripeClient {
    #[instrument(skip(self, email))]
    async fn create_customer(&self, email: &str) -> Result<Customer, PaymentError> {
        let form = vec![("email".to_string(), email.to_string())];
        self.post("/customers", &form, None).await
    }

    #[instrument(skip(self, params), fields(amount = params.amount, order_id = %params.order_id))]
    async fn create_payment_intent(
        &self,
        params: &NewPaymentIntent,
    ) -> Result<PaymentIntent, PaymentError> {
        let form = intent_form(params);
        let intent: PaymentIntent = self
            .post("/payment_intents", &form, params.idempotency_key.as_deref())
            .await?;
        debug!(intent_id = %intent.id, status = %intent.status, "Created payment intent");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn confirm_payment_intent(
        &self,
        intent_id: &str,
        payment_method: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let form = vec![("payment_method".to_string(), payment_method.to_string())];
        self.post(
            &format!("/payment_intents/{}/confirm", path_segment(intent_id)),
            &form,
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        self.get(&format!("/payment_intents/{}", path_segment(intent_id)))
            .await
    }

    #[instrument(skip(self))]
    async fn create_setup_intent(
        &self,
        customer: Option<&str>,
    ) -> Result<SetupIntent, PaymentError> {
        let mut form = vec![("usage".to_string(), "off_session".to_string())];
        if let Some(customer) = customer {
            form.push(("customer".to_string(), customer.to_string()));
        }
        self.post("/setup_intents", &form, None).await
    }

    #[instrument(skip(self))]
    async fn confirm_setup_intent(
        &self,
        intent_id: &str,
        payment_method: &str,
    ) -> Result<SetupIntent, PaymentError> {
        let form = vec![("payment_method".to_string(), payment_method.to_string())];
        self.post(
            &format!("/setup_intents/{}/confirm", path_segment(intent_id)),
            &form,
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn retrieve_payment_method(
        &self,
        payment_method: &str,
    ) -> Result<PaymentMethodDetails, PaymentError> {
        self.get(&format!("/payment_methods/{}", path_segment(payment_method)))
            .await
    }

    #[instrument(skip(self))]
    async fn attach_payment_method(
        &self,
        payment_method: &str,
        customer: &str,
    ) -> Result<PaymentMethodDetails, PaymentError> {
        let form = vec![("customer".to_string(), customer.to_string())];
        self.post(
            &format!("/payment_methods/{}/attach", path_segment(payment_method)),
            &form,
            None,
        )
        .await
    }
}
