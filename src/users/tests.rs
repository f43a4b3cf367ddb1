use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::{Method, StatusCode},
    Router,
};
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    app::build_app,
    auth::{
        federated::{FederatedIdentity, IdentityProvider},
        memory::MemoryUserStore,
        repo::{StoreError, UserStore},
        repo_types::{Account, NewUser, ProfileUpdate, User},
    },
    state::AppState,
    testing::{get_request, json_request, login, send, signup_token},
};

fn app() -> (Router, AppState) {
    let state = AppState::fake();
    (build_app(state.clone()), state)
}

async fn me(app: &Router, token: Option<&str>) -> (StatusCode, Value) {
    send(app, get_request("/users/me", token)).await
}

async fn put_me(app: &Router, token: &str, body: Value) -> (StatusCode, Value) {
    send(app, json_request(Method::PUT, "/users/me", body, Some(token))).await
}

async fn change_password(app: &Router, token: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        json_request(Method::POST, "/users/change-password", body, Some(token)),
    )
    .await
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let (app, _) = app();
    let (status, body) = me(&app, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "NO_TOKEN");
}

#[tokio::test]
async fn expired_token_is_reported_as_expired() {
    let (app, state) = app();
    let token = signup_token(&app, "alice01", "a@x.com", "secret1").await;
    let id = state.tokens.verify(&token).unwrap();

    let expired = state.tokens.issue_with_ttl(id, Duration::seconds(-1)).unwrap();
    let (status, body) = me(&app, Some(&expired)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "TOKEN_EXPIRED");
}

#[tokio::test]
async fn garbage_token_is_invalid() {
    let (app, _) = app();
    let (status, body) = me(&app, Some("not.a.jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn token_for_missing_user_is_rejected() {
    let (app, state) = app();
    let token = state.tokens.issue(Uuid::new_v4()).unwrap();
    let (status, body) = me(&app, Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "USER_NOT_FOUND");
}

#[tokio::test]
async fn profile_omits_credentials() {
    let (app, _) = app();
    let token = signup_token(&app, "alice01", "a@x.com", "secret1").await;

    let (status, body) = me(&app, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice01");
    assert_eq!(body["email"], "a@x.com");
    assert_eq!(body["dob"], "2000-01-01");
    assert_eq!(body["accountType"], "local");
    assert!(body.get("password").is_none());
    assert!(body.get("passwordHash").is_none());
}

#[tokio::test]
async fn update_username_and_dob() {
    let (app, _) = app();
    let token = signup_token(&app, "alice01", "a@x.com", "secret1").await;

    let (status, body) = put_me(
        &app,
        &token,
        json!({ "username": "alice_new", "dob": "1999-12-31" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice_new");
    assert_eq!(body["dob"], "1999-12-31");

    let (_, body) = me(&app, Some(&token)).await;
    assert_eq!(body["username"], "alice_new");
}

#[tokio::test]
async fn update_to_taken_username_conflicts() {
    let (app, _) = app();
    signup_token(&app, "alice01", "a@x.com", "secret1").await;
    let token = signup_token(&app, "bob01", "b@x.com", "secret1").await;

    let (status, body) = put_me(&app, &token, json!({ "username": "alice01" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "username already exists");

    let (status, _) = put_me(&app, &token, json!({ "username": "bob01" })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn bare_password_field_is_refused() {
    let (app, _) = app();
    let token = signup_token(&app, "alice01", "a@x.com", "secret1").await;

    let (status, _) = put_me(&app, &token, json!({ "password": "hijack1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = login(&app, "a@x.com", "secret1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn profile_password_change_requires_matching_confirmation() {
    let (app, _) = app();
    let token = signup_token(&app, "alice01", "a@x.com", "secret1").await;

    let (status, body) = put_me(
        &app,
        &token,
        json!({
            "currentPassword": "secret1",
            "newPassword": "secret2",
            "confirmPassword": "secret3",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Passwords do not match");

    let (status, _) = put_me(
        &app,
        &token,
        json!({
            "currentPassword": "secret1",
            "newPassword": "secret2",
            "confirmPassword": "secret2",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(login(&app, "a@x.com", "secret1").await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(login(&app, "a@x.com", "secret2").await.0, StatusCode::OK);
}

#[tokio::test]
async fn change_password_checks_current_password() {
    let (app, _) = app();
    let token = signup_token(&app, "alice01", "a@x.com", "secret1").await;

    let (status, body) = change_password(
        &app,
        &token,
        json!({ "currentPassword": "wrong-one", "newPassword": "secret2" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Current password is incorrect");

    let (status, body) = change_password(&app, &token, json!({ "newPassword": "secret2" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Current password is required");

    let (status, body) = change_password(
        &app,
        &token,
        json!({ "currentPassword": "secret1", "newPassword": "secret2" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Password updated successfully");

    assert_eq!(login(&app, "a@x.com", "secret2").await.0, StatusCode::OK);
}

struct FixedProvider;

#[async_trait]
impl IdentityProvider for FixedProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://provider.test/authorize?state={state}")
    }

    async fn exchange(&self, _code: &str) -> anyhow::Result<FederatedIdentity> {
        Ok(FederatedIdentity {
            subject: "g-42".into(),
            email: "fed@x.com".into(),
            email_verified: false,
        })
    }
}

#[tokio::test]
async fn federated_account_sets_first_password_without_current() {
    let state = AppState::fake().with_identity(Arc::new(FixedProvider));
    let app = build_app(state.clone());

    let user = crate::auth::services::find_or_create_federated(
        state.users.as_ref(),
        FixedProvider.exchange("code").await.unwrap(),
    )
    .await
    .unwrap();
    let token = state.tokens.issue(user.id).unwrap();

    let (_, body) = me(&app, Some(&token)).await;
    assert_eq!(body["accountType"], "federated");
    assert_eq!(body["username"], Value::Null);

    let (status, _) = change_password(&app, &token, json!({ "newPassword": "secret1" })).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = me(&app, Some(&token)).await;
    assert_eq!(body["accountType"], "hybrid");
    assert_eq!(login(&app, "fed@x.com", "secret1").await.0, StatusCode::OK);
}

/// Store whose username lookup always misses, as when another request
/// claims the name between the check and the write.
#[derive(Default)]
struct RacingStore(MemoryUserStore);

#[async_trait]
impl UserStore for RacingStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.0.find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.0.find_by_email(email).await
    }

    async fn find_by_username(&self, _username: &str) -> Result<Option<User>, StoreError> {
        Ok(None)
    }

    async fn find_by_federated_id(&self, federated_id: &str) -> Result<Option<User>, StoreError> {
        self.0.find_by_federated_id(federated_id).await
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        self.0.insert(user).await
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<Option<User>, StoreError> {
        self.0.record_login(id, at).await
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        self.0.update_profile(id, update).await
    }

    async fn update_account(&self, id: Uuid, account: &Account) -> Result<Option<User>, StoreError> {
        self.0.update_account(id, account).await
    }
}

#[tokio::test]
async fn username_conflict_at_write_keeps_old_password() {
    let state = AppState::fake().with_users(Arc::new(RacingStore::default()));
    let app = build_app(state);
    signup_token(&app, "alice01", "a@x.com", "secret1").await;
    let token = signup_token(&app, "bob01", "b@x.com", "secret1").await;

    let (status, _) = put_me(
        &app,
        &token,
        json!({
            "username": "alice01",
            "currentPassword": "secret1",
            "newPassword": "secret2",
            "confirmPassword": "secret2",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    assert_eq!(login(&app, "b@x.com", "secret1").await.0, StatusCode::OK);
    assert_eq!(login(&app, "b@x.com", "secret2").await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_current_password_leaves_profile_untouched() {
    let (app, _) = app();
    let token = signup_token(&app, "alice01", "a@x.com", "secret1").await;

    let (status, body) = put_me(
        &app,
        &token,
        json!({
            "username": "alice_new",
            "currentPassword": "nope-nope",
            "newPassword": "secret2",
            "confirmPassword": "secret2",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Current password is incorrect");

    let (_, body) = me(&app, Some(&token)).await;
    assert_eq!(body["username"], "alice01");
}
