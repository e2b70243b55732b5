//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//! Responses are JSON: `{"error": "..."}`, plus `"missing": [...]` when the
//! client has fields to fill in.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::payments::PaymentError;
use crate::services::{AuthError, ServiceError};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// A checkout service failed.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Reading or writing the session failed.
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        Self::Service(ServiceError::DataAccess(err))
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        Self::Service(ServiceError::Provider(err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing: Option<Vec<&'static str>>,
}

fn payment_status(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::Provider { status: 409, .. } => StatusCode::CONFLICT,
        PaymentError::Provider { status, .. } if *status >= 500 => StatusCode::BAD_GATEWAY,
        PaymentError::Provider { .. } => StatusCode::PAYMENT_REQUIRED,
        PaymentError::Amount(_) => StatusCode::BAD_REQUEST,
        PaymentError::Http(_) | PaymentError::Parse(_) => StatusCode::BAD_GATEWAY,
    }
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Service(err) => match err {
                ServiceError::Validation { .. } | ServiceError::InvalidSavedCard => {
                    StatusCode::BAD_REQUEST
                }
                ServiceError::AuthRequired => StatusCode::UNAUTHORIZED,
                ServiceError::Provider(e) => payment_status(e),
                ServiceError::DataAccess(RepositoryError::NotFound) | ServiceError::NotFound => {
                    StatusCode::NOT_FOUND
                }
                ServiceError::DataAccess(RepositoryError::Conflict(_))
                | ServiceError::IncompleteOrder { .. } => StatusCode::CONFLICT,
                ServiceError::DataAccess(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::UserAlreadyExists => StatusCode::CONFLICT,
                AuthError::WeakPassword(_) | AuthError::InvalidEmail(_) => StatusCode::BAD_REQUEST,
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Session(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Don't expose internal error details to clients
    fn body(&self) -> ErrorBody {
        let (error, missing) = match self {
            Self::Service(err) => match err {
                ServiceError::Validation { missing } => {
                    ("Invalid input".to_string(), Some(missing.clone()))
                }
                ServiceError::IncompleteOrder { missing } => {
                    ("Order is incomplete".to_string(), Some(missing.clone()))
                }
                ServiceError::AuthRequired => ("Sign-in required".to_string(), None),
                ServiceError::Provider(e) => (e.customer_message().to_string(), None),
                ServiceError::InvalidSavedCard => {
                    ("Saved card is not available".to_string(), None)
                }
                ServiceError::NotFound | ServiceError::DataAccess(RepositoryError::NotFound) => {
                    ("Not found".to_string(), None)
                }
                ServiceError::DataAccess(RepositoryError::Conflict(_)) => {
                    ("Conflicting update, please retry".to_string(), None)
                }
                ServiceError::DataAccess(_) => ("Internal server error".to_string(), None),
            },
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials => ("Invalid credentials".to_string(), None),
                AuthError::UserAlreadyExists => (
                    "An account with this email already exists".to_string(),
                    None,
                ),
                AuthError::WeakPassword(msg) => (msg.clone(), None),
                AuthError::InvalidEmail(_) => ("Invalid email address".to_string(), None),
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    ("Internal server error".to_string(), None)
                }
            },
            Self::Session(_) | Self::Internal(_) => ("Internal server error".to_string(), None),
            Self::NotFound(msg) | Self::Unauthorized(msg) | Self::BadRequest(msg) => {
                (msg.clone(), None)
            }
        };
        ErrorBody { error, missing }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (status, Json(self.body())).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}
