use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{
        header::{LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};
use url::Url;

use crate::{
    auth::{
        dto::{
            AuthResponse, FederatedCallback, LoginRequest, LoginUser, SignupRequest, SignupUser,
        },
        federated::{
            clear_state_cookie, new_state, state_cookie, state_from_cookies, IdentityProvider,
        },
        services::{
            authenticate, find_or_create_federated, normalize_email, parse_dob, register,
            today, validate_email, validate_password, validate_username, SignupInput,
        },
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/federated", get(federated_start))
        .route("/auth/federated/callback", get(federated_callback))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse<SignupUser>>), AppError> {
    let Json(payload) = payload?;
    let username = payload.username.trim().to_string();
    let email = normalize_email(&payload.email);

    validate_username(&username)?;
    validate_email(&email)?;
    validate_password(&payload.password)?;
    let dob = payload
        .dob
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(|d| parse_dob(d, today()))
        .transpose()?;

    let user = register(
        state.users.as_ref(),
        SignupInput {
            username,
            email,
            password: payload.password,
            dob,
        },
    )
    .await?;

    let token = state.tokens.issue(user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: SignupUser {
                id: user.id,
                username: user.username,
                email: user.email,
                created_at: user.created_at,
            },
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse<LoginUser>>, AppError> {
    let Json(payload) = payload?;
    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation(
            "Email and password are required".into(),
        ));
    }

    let user = authenticate(state.users.as_ref(), &email, &payload.password).await?;

    let token = state.tokens.issue(user.id)?;
    Ok(Json(AuthResponse {
        token,
        user: LoginUser {
            id: user.id,
            username: user.username,
            email: user.email,
            last_login_at: user.last_login_at,
        },
    }))
}

fn provider(state: &AppState) -> Result<&dyn IdentityProvider, AppError> {
    state
        .identity
        .as_deref()
        .ok_or_else(|| AppError::NotFound("Federated sign-in is not configured".into()))
}

fn found(location: &str, cookie: HeaderValue) -> Response {
    (
        StatusCode::FOUND,
        [(LOCATION, location.to_string())],
        [(SET_COOKIE, cookie)],
    )
        .into_response()
}

fn secure_cookies(state: &AppState) -> bool {
    state.config.frontend_url.starts_with("https://")
}

#[instrument(skip(state))]
pub async fn federated_start(State(state): State<AppState>) -> Result<Response, AppError> {
    let provider = provider(&state)?;
    let nonce = new_state();
    let cookie = state_cookie(&nonce, secure_cookies(&state)).map_err(anyhow::Error::from)?;
    Ok(found(&provider.authorize_url(&nonce), cookie))
}

#[instrument(skip(state, headers, params))]
pub async fn federated_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FederatedCallback>,
) -> Result<Response, AppError> {
    let provider = provider(&state)?;

    let expected = state_from_cookies(&headers);
    if expected.is_none() || params.state != expected {
        warn!("federated callback state missing or mismatched");
        return Err(AppError::FederatedLoginFailed);
    }

    if let Some(err) = params.error.as_deref() {
        warn!(error = %err, "provider reported sign-in error");
        return Err(AppError::FederatedLoginFailed);
    }
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(AppError::FederatedLoginFailed)?;

    let identity = provider.exchange(&code).await.map_err(|e| {
        warn!(error = %e, "provider assertion rejected");
        AppError::FederatedLoginFailed
    })?;

    let user = find_or_create_federated(state.users.as_ref(), identity).await?;
    let token = state.tokens.issue(user.id)?;

    let mut target = Url::parse(&state.config.frontend_url)
        .map_err(anyhow::Error::from)?
        .join("/auth/callback")
        .map_err(anyhow::Error::from)?;
    target.query_pairs_mut().append_pair("token", &token);
    Ok(found(target.as_str(), clear_state_cookie(secure_cookies(&state))))
}
