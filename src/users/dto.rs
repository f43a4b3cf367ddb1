use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::auth::repo_types::{AccountType, User};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Profile of the current user. Never carries credential material.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: Option<String>,
    pub email: String,
    #[serde(with = "iso_date::option")]
    pub dob: Option<Date>,
    pub account_type: AccountType,
    pub is_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            dob: user.dob,
            account_type: user.account.kind(),
            is_verified: user.is_verified,
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

/// Body of `PUT /users/me`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub dob: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
    /// Only present to reject clients that try to set it directly.
    pub password: Option<String>,
}

/// Body of `POST /users/change-password`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
