use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{error, warn};

use super::{jwt::TokenError, repo_types::User};
use crate::{
    error::{AppError, AuthFailure},
    state::AppState,
};

/// Verifies the bearer token and resolves it to an existing user.
pub struct AuthUser(pub User);

/// Pulls `<token>` out of `Authorization: Bearer <token>`.
fn bearer_token(parts: &Parts) -> Option<&str> {
    let auth = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AppError::Unauthorized(AuthFailure::NoToken))?;

        let user_id = state.tokens.verify(token).map_err(|kind| {
            warn!(?kind, "token rejected");
            AppError::Unauthorized(match kind {
                TokenError::Expired => AuthFailure::TokenExpired,
                TokenError::Malformed | TokenError::BadSignature => AuthFailure::InvalidToken,
            })
        })?;

        match state.users.find_by_id(user_id).await {
            Ok(Some(user)) => Ok(AuthUser(user)),
            Ok(None) => {
                warn!(user_id = %user_id, "token for unknown user");
                Err(AppError::Unauthorized(AuthFailure::UserNotFound))
            }
            Err(e) => {
                error!(error = %e, user_id = %user_id, "user lookup failed");
                Err(e.into())
            }
        }
    }
}
