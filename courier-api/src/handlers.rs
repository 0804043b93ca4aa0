//! Route handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use chrono::{SecondsFormat, Utc};
use courier_common::RelayConfig;
use courier_dispatch::{CancellationToken, Dispatcher, RelayTransport};

use crate::{
    error::ApiError,
    wire::{BulkEmailRequest, BulkEmailResponse, HealthResponse, MessageResponse, SendEmailRequest},
};

/// Shared by every handler.
pub struct ApiState {
    pub dispatcher: Dispatcher<Arc<dyn RelayTransport>>,
    /// Cancelled when the server shuts down; in-progress bulk sends stop
    /// between attempts.
    pub shutdown: CancellationToken,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: "API is running",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn test_smtp(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<RelayConfig>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let relay = body(payload)?;

    state
        .dispatcher
        .verify(&relay)
        .await
        .map_err(|err| ApiError::from_dispatch(err, ApiError::ConnectionFailed))?;

    Ok(Json(MessageResponse {
        success: true,
        message: "SMTP connection successful",
        message_id: None,
    }))
}

pub async fn send_email(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<SendEmailRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let (relay, request) = body(payload)?
        .into_parts()
        .map_err(|err| ApiError::Validation(err.to_string()))?;

    let receipt = state
        .dispatcher
        .send_single(&relay, request)
        .await
        .map_err(|err| ApiError::from_dispatch(err, ApiError::SendFailed))?;

    Ok(Json(MessageResponse {
        success: true,
        message: "Email sent successfully",
        message_id: Some(receipt.message_id),
    }))
}

pub async fn send_bulk_email(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<BulkEmailRequest>, JsonRejection>,
) -> Result<Json<BulkEmailResponse>, ApiError> {
    let (relay, request) = body(payload)?
        .into_parts()
        .map_err(|err| ApiError::Validation(err.to_string()))?;

    let summary = state
        .dispatcher
        .dispatch_with_cancel(&relay, request, state.shutdown.child_token())
        .await
        .map_err(|err| ApiError::from_dispatch(err, ApiError::BulkSendFailed))?;

    Ok(Json(summary.into()))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
