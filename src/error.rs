// SPDX-License-Identifier: MIT

//! Application error types with consistent API responses.
//!
//! The OAuth/ingestion pipeline surfaces every failure as a descriptive
//! variant; nothing is retried automatically. Browser-facing handlers
//! (the OAuth callback) render these as plain text, API handlers as JSON.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No authorization attempt is pending for this session")]
    ExpiredOrMissingAttempt,

    #[error("State token does not match the pending authorization attempt")]
    StateMismatch,

    #[error("Token exchange with Fitbit failed: {0}")]
    UpstreamExchangeFailure(String),

    #[error("Fitbit response is missing required fields: {0}")]
    MalformedUpstreamResponse(String),

    #[error("This Fitbit account is already linked to another pilot")]
    AccountAlreadyLinked,

    #[error("Pilot has no linked Fitbit account")]
    NoLinkedAccount,

    #[error("Pilot already participates in this experiment")]
    DuplicateParticipation,

    #[error("Access token refresh failed: {0}")]
    RefreshFailure(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status for this error, shared by the JSON and plain-text paths.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ExpiredOrMissingAttempt => StatusCode::GONE,
            AppError::StateMismatch => StatusCode::FORBIDDEN,
            AppError::UpstreamExchangeFailure(_)
            | AppError::MalformedUpstreamResponse(_)
            | AppError::RefreshFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::AccountAlreadyLinked
            | AppError::NoLinkedAccount
            | AppError::DuplicateParticipation => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable snake_case code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::ExpiredOrMissingAttempt => "expired_or_missing_attempt",
            AppError::StateMismatch => "state_mismatch",
            AppError::UpstreamExchangeFailure(_) => "upstream_exchange_failure",
            AppError::MalformedUpstreamResponse(_) => "malformed_upstream_response",
            AppError::AccountAlreadyLinked => "account_already_linked",
            AppError::NoLinkedAccount => "no_linked_account",
            AppError::DuplicateParticipation => "duplicate_participation",
            AppError::RefreshFailure(_) => "refresh_failure",
            AppError::NotFound(_) => "not_found",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let details = match &self {
            AppError::InvalidRequest(msg)
            | AppError::UpstreamExchangeFailure(msg)
            | AppError::MalformedUpstreamResponse(msg)
            | AppError::RefreshFailure(msg)
            | AppError::NotFound(msg) => Some(msg.clone()),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                None
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                None
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: self.code().to_string(),
            details,
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
