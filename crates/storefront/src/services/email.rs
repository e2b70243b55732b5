//! Order confirmation emails.
//!
//! Uses SMTP via lettre for delivery with Askama HTML and plain text templates.

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use storehouse_core::{CurrencyCode, Price};

use crate::config::EmailConfig;
use crate::models::SubmittedOrder;

/// HTML template for the order confirmation email.
#[derive(Template)]
#[template(path = "email/order_confirmation.html")]
struct OrderConfirmationHtml<'a> {
    order: &'a OrderConfirmation,
}

/// Plain text template for the order confirmation email.
#[derive(Template)]
#[template(path = "email/order_confirmation.txt")]
struct OrderConfirmationText<'a> {
    order: &'a OrderConfirmation,
}

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum MailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// One product line as printed in the email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationLine {
    pub title: String,
    pub quantity: u32,
    /// Preformatted, e.g. `$100.00`.
    pub line_total: String,
}

/// Everything the confirmation email shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderConfirmation {
    pub to: String,
    pub name: String,
    pub order_number: String,
    /// Preformatted total.
    pub order_total: String,
    /// Preformatted placement date.
    pub created_at: String,
    pub lines: Vec<ConfirmationLine>,
}

impl OrderConfirmation {
    /// Confirmation for an accepted order.
    #[must_use]
    pub fn for_order(order: &SubmittedOrder, to: &str, name: &str, currency: CurrencyCode) -> Self {
        Self {
            to: to.to_owned(),
            name: name.to_owned(),
            order_number: order.order_number.clone(),
            order_total: Price::new(order.order_total, currency).to_string(),
            created_at: order.created_at.format("%B %-d, %Y").to_string(),
            lines: order
                .products_ordered
                .iter()
                .map(|p| ConfirmationLine {
                    title: p.title.clone(),
                    quantity: u32::from(p.quantity.get()),
                    line_total: Price::new(p.line_total, currency).to_string(),
                })
                .collect(),
        }
    }

    fn subject(&self) -> String {
        format!("Order confirmation {}", self.order_number)
    }
}

/// Sends order confirmation emails.
#[async_trait]
pub trait ConfirmationMailer: Send + Sync {
    async fn send_order_confirmation(&self, order: &OrderConfirmation) -> Result<(), MailError>;
}

/// SMTP delivery.
#[derive(Clone)]
pub struct SmtpMailer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    /// Create a new mailer from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }

    /// Send a multipart email with both plain text and HTML versions.
    async fn send_multipart_email(
        &self,
        to: &str,
        subject: &str,
        text_body: String,
        html_body: String,
    ) -> Result<(), MailError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| MailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| MailError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        self.mailer.send(email).await?;

        tracing::info!(to = %to, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

#[async_trait]
impl ConfirmationMailer for SmtpMailer {
    async fn send_order_confirmation(&self, order: &OrderConfirmation) -> Result<(), MailError> {
        let html = OrderConfirmationHtml { order }.render()?;
        let text = OrderConfirmationText { order }.render()?;

        self.send_multipart_email(&order.to, &order.subject(), text, html)
            .await
    }
}
