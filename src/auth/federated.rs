use anyhow::Context;
use async_trait::async_trait;
use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use crate::config::GoogleConfig;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const STATE_COOKIE_NAME: &str = "sessiond_oauth_state";
const STATE_COOKIE_MAX_AGE: u32 = 600;

/// Identity asserted by an external provider after a successful sign-in.
#[derive(Debug, Clone)]
pub struct FederatedIdentity {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start a sign-in. `state` must come back
    /// unchanged on the callback.
    fn authorize_url(&self, state: &str) -> String;

    /// Redeems the callback `code` and returns the asserted identity.
    async fn exchange(&self, code: &str) -> anyhow::Result<FederatedIdentity>;
}

/// Google OAuth 2.0 authorization-code flow.
pub struct GoogleProvider {
    http: reqwest::Client,
    config: GoogleConfig,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorize_url(&self, state: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.callback_url)
            .append_pair("response_type", "code")
            .append_pair("scope", "openid email profile")
            .append_pair("state", state)
            .finish();
        format!("{GOOGLE_AUTH_URL}?{query}")
    }

    async fn exchange(&self, code: &str) -> anyhow::Result<FederatedIdentity> {
        let token: TokenResponse = self
            .http
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("google token request")?
            .error_for_status()
            .context("google token response")?
            .json()
            .await
            .context("decode google token response")?;

        let info: UserInfo = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("google userinfo request")?
            .error_for_status()
            .context("google userinfo response")?
            .json()
            .await
            .context("decode google userinfo")?;

        let email = info.email.context("google profile has no email")?;
        debug!(subject = %info.sub, "google identity resolved");
        Ok(FederatedIdentity {
            subject: info.sub,
            email,
            email_verified: info.email_verified,
        })
    }
}

/// Fresh value for the sign-in `state` parameter.
pub fn new_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Binds `state` to the browser that started the sign-in.
pub fn state_cookie(state: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{STATE_COOKIE_NAME}={state}; Path=/auth/federated; HttpOnly; SameSite=Lax; Max-Age={STATE_COOKIE_MAX_AGE}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_state_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static(
            "sessiond_oauth_state=; Path=/auth/federated; HttpOnly; SameSite=Lax; Max-Age=0; Secure",
        )
    } else {
        HeaderValue::from_static(
            "sessiond_oauth_state=; Path=/auth/federated; HttpOnly; SameSite=Lax; Max-Age=0",
        )
    }
}

/// The `state` stored by [`state_cookie`], if the browser sent it back.
pub fn state_from_cookies(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == STATE_COOKIE_NAME && !val.trim().is_empty()).then(|| val.trim().to_string())
    })
}
