use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        extractors::AuthUser,
        repo_types::ProfileUpdate,
        services::{
            change_password, parse_dob, prepare_password_change, store_password_change, today,
            validate_username,
        },
    },
    error::{AppError, AuthFailure},
    state::AppState,
    users::dto::{ChangePasswordRequest, MessageResponse, UpdateProfileRequest, UserProfile},
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me).put(update_me))
        .route("/users/change-password", post(change_my_password))
}

#[instrument(skip_all)]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<UserProfile> {
    Json(user.into())
}

/// Applies profile edits and an optional password change.
///
/// Every check runs before the first write, and the profile is written
/// before the password so a username conflict leaves the account untouched.
#[instrument(skip_all)]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<UserProfile>, AppError> {
    let Json(payload) = payload?;
    let user_id = user.id;

    if payload.password.is_some() {
        return Err(AppError::Validation(
            "Use newPassword and confirmPassword, or /users/change-password, to update the password"
                .into(),
        ));
    }

    let username = payload.username.map(|u| u.trim().to_string());
    if let Some(username) = username.as_deref() {
        validate_username(username)?;
    }
    let dob = payload
        .dob
        .as_deref()
        .map(|d| parse_dob(d, today()))
        .transpose()?;

    let wants_password_change = payload.current_password.is_some()
        || payload.new_password.is_some()
        || payload.confirm_password.is_some();
    let new_account = if wants_password_change {
        let new_password = payload.new_password.as_deref().unwrap_or_default();
        if payload.confirm_password.as_deref() != Some(new_password) {
            return Err(AppError::Validation("Passwords do not match".into()));
        }
        Some(
            prepare_password_change(&user, payload.current_password.as_deref(), new_password)
                .await?,
        )
    } else {
        None
    };

    if let Some(username) = username.as_deref() {
        let taken = state
            .users
            .find_by_username(username)
            .await?
            .is_some_and(|other| other.id != user_id);
        if taken {
            return Err(AppError::Conflict("username already exists".into()));
        }
    }

    let mut user = user;
    if username.is_some() || dob.is_some() {
        user = state
            .users
            .update_profile(user_id, ProfileUpdate { username, dob })
            .await?
            .ok_or(AppError::Unauthorized(AuthFailure::UserNotFound))?;
        info!(user_id = %user_id, "profile updated");
    }

    if let Some(account) = new_account {
        user = store_password_change(state.users.as_ref(), user_id, &account).await?;
    }

    Ok(Json(user.into()))
}

#[instrument(skip_all)]
pub async fn change_my_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(payload) = payload?;
    change_password(
        state.users.as_ref(),
        user,
        payload.current_password.as_deref(),
        &payload.new_password,
    )
    .await?;
    Ok(Json(MessageResponse {
        message: "Password updated successfully".into(),
    }))
}
