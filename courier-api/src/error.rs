//! API error types

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use courier_dispatch::DispatchError;
use serde::Serialize;
use thiserror::Error;

/// Errors starting or running the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind API server to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    #[error("API server error: {0}")]
    ServeError(String),
}

/// A failed request, rendered as `{ success: false, error, details }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("SMTP connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to send email: {0}")]
    SendFailed(String),

    #[error("Failed to send bulk email: {0}")]
    BulkSendFailed(String),

    #[error("{message}")]
    RateLimited {
        message: &'static str,
        retry_after: Duration,
    },

    #[error("Endpoint not found")]
    NotFound,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::ConnectionFailed(_) => StatusCode::BAD_REQUEST,
            Self::SendFailed(_) | Self::BulkSendFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    const fn summary(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation error",
            Self::ConnectionFailed(_) => "SMTP connection failed",
            Self::SendFailed(_) => "Failed to send email",
            Self::BulkSendFailed(_) => "Failed to send bulk email",
            Self::RateLimited { message, .. } => *message,
            Self::NotFound => "Endpoint not found",
        }
    }

    fn details(&self) -> Option<&str> {
        match self {
            Self::Validation(details)
            | Self::ConnectionFailed(details)
            | Self::SendFailed(details)
            | Self::BulkSendFailed(details) => Some(details.as_str()),
            Self::RateLimited { .. } | Self::NotFound => None,
        }
    }

    /// Maps a dispatch failure, using `relay` for relay errors.
    pub(crate) fn from_dispatch(err: DispatchError, relay: fn(String) -> Self) -> Self {
        match err {
            DispatchError::Validation(err) => Self::Validation(err.to_string()),
            DispatchError::Relay(err) => relay(err.to_string()),
            DispatchError::InvariantViolation(_) => Self::BulkSendFailed(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = Json(ErrorBody {
            success: false,
            error: self.summary(),
            details: self.details(),
        });

        let mut response = (status, body).into_response();
        if let Self::RateLimited { retry_after, .. } = self {
            let seconds = retry_after
                .as_secs()
                .saturating_add(u64::from(retry_after.subsec_nanos() > 0));
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}
