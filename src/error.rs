//! Application error type and its JSON rendering.
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::repo::StoreError;

/// Why a protected request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    NoToken,
    TokenExpired,
    InvalidToken,
    UserNotFound,
}

impl AuthFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::NoToken => "NO_TOKEN",
            AuthFailure::TokenExpired => "TOKEN_EXPIRED",
            AuthFailure::InvalidToken => "INVALID_TOKEN",
            AuthFailure::UserNotFound => "USER_NOT_FOUND",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            AuthFailure::NoToken => "Not authorized, no token provided",
            AuthFailure::TokenExpired => "Token expired, please log in again",
            AuthFailure::InvalidToken => "Invalid token",
            AuthFailure::UserNotFound => "User not found",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Federated sign-in failed")]
    FederatedLoginFailed,

    #[error("{}", .0.message())]
    Unauthorized(AuthFailure),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidCredentials
            | AppError::FederatedLoginFailed
            | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(field) => AppError::Conflict(format!("{field} already exists")),
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AppError::Unauthorized(failure) => json!({
                "error": self.to_string(),
                "code": failure.code(),
            }),
            AppError::Internal(e) => {
                error!(error = %e, "internal error");
                json!({ "error": self.to_string() })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
