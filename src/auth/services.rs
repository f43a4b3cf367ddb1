use lazy_static::lazy_static;
use regex::Regex;
use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        federated::FederatedIdentity,
        password::{hash_password, verify_against_dummy, verify_password},
        repo::{StoreError, UserStore},
        repo_types::{Account, NewUser, User},
    },
    error::{AppError, AuthFailure},
};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_AGE_YEARS: i32 = 14;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
    }
    (3..=30).contains(&username.chars().count()) && USERNAME_RE.is_match(username)
}

/// Lower-cases and trims so emails compare case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".into()));
    }
    if !is_valid_email(email) {
        return Err(AppError::Validation("Please provide a valid email".into()));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), AppError> {
    if username.is_empty() {
        return Err(AppError::Validation("Username is required".into()));
    }
    let len = username.chars().count();
    if len < 3 {
        return Err(AppError::Validation(
            "Username must be at least 3 characters".into(),
        ));
    }
    if len > 30 {
        return Err(AppError::Validation(
            "Username cannot exceed 30 characters".into(),
        ));
    }
    if !is_valid_username(username) {
        return Err(AppError::Validation(
            "Username can only contain letters, numbers and underscores".into(),
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.is_empty() {
        return Err(AppError::Validation("Password is required".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Whole years between `dob` and `today`.
pub fn age_on(dob: Date, today: Date) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month() as u8, today.day()) < (dob.month() as u8, dob.day()) {
        age -= 1;
    }
    age
}

/// Parses `YYYY-MM-DD` (or an RFC 3339 timestamp) and enforces the minimum age.
pub fn parse_dob(raw: &str, today: Date) -> Result<Date, AppError> {
    let raw = raw.trim();
    let dob = Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .or_else(|_| OffsetDateTime::parse(raw, &Rfc3339).map(|dt| dt.date()))
        .map_err(|_| AppError::Validation("Date of birth must be a valid date".into()))?;
    if age_on(dob, today) < MIN_AGE_YEARS {
        return Err(AppError::Validation(format!(
            "You must be at least {MIN_AGE_YEARS} years old"
        )));
    }
    Ok(dob)
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

pub async fn hash_password_blocking(plain: String) -> Result<String, AppError> {
    let hash = tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .map_err(anyhow::Error::from)??;
    Ok(hash)
}

/// Checks `candidate` against the account's local password.
///
/// Federated-only accounts have nothing to check and always fail, after the
/// same amount of hashing work as a real check.
pub async fn verify_credential(candidate: &str, account: &Account) -> Result<bool, AppError> {
    let candidate = candidate.to_owned();
    let stored = account.password_hash().map(str::to_owned);
    let ok = tokio::task::spawn_blocking(move || match stored {
        Some(hash) => verify_password(&candidate, &hash),
        None => Ok(verify_against_dummy(&candidate)),
    })
    .await
    .map_err(anyhow::Error::from)??;
    Ok(ok)
}

/// Input for a local signup, already normalized.
pub struct SignupInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub dob: Option<Date>,
}

/// Creates a local account. Both the pre-check and a store-level uniqueness
/// violation report the same conflict.
pub async fn register(store: &dyn UserStore, input: SignupInput) -> Result<User, AppError> {
    const TAKEN: &str = "User already exists";

    if store.find_by_email(&input.email).await?.is_some()
        || store.find_by_username(&input.username).await?.is_some()
    {
        warn!(email = %input.email, username = %input.username, "signup for existing user");
        return Err(AppError::Conflict(TAKEN.into()));
    }

    let password_hash = hash_password_blocking(input.password).await?;
    let new = NewUser {
        username: Some(input.username),
        email: input.email,
        account: Account::Local { password_hash },
        dob: input.dob,
        is_verified: false,
    };
    match store.insert(new).await {
        Ok(user) => {
            info!(user_id = %user.id, email = %user.email, "user registered");
            Ok(user)
        }
        Err(StoreError::Conflict(field)) => {
            warn!(%field, "signup lost uniqueness race");
            Err(AppError::Conflict(TAKEN.into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolves email + password to a user. Every failure is the same
/// [`AppError::InvalidCredentials`].
pub async fn authenticate(
    store: &dyn UserStore,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let Some(user) = store.find_by_email(email).await? else {
        let candidate = password.to_owned();
        tokio::task::spawn_blocking(move || verify_against_dummy(&candidate))
            .await
            .map_err(anyhow::Error::from)?;
        warn!(email = %email, "login unknown email");
        return Err(AppError::InvalidCredentials);
    };

    if !verify_credential(password, &user.account).await? {
        warn!(user_id = %user.id, account = ?user.account.kind(), "login rejected");
        return Err(AppError::InvalidCredentials);
    }

    let user = store
        .record_login(user.id, OffsetDateTime::now_utc())
        .await?
        .ok_or(AppError::InvalidCredentials)?;
    info!(user_id = %user.id, "user logged in");
    Ok(user)
}

/// Finds the account for a provider identity, linking or creating one as needed.
pub async fn find_or_create_federated(
    store: &dyn UserStore,
    identity: FederatedIdentity,
) -> Result<User, AppError> {
    let user = match store.find_by_federated_id(&identity.subject).await? {
        Some(user) => user,
        None => {
            let email = normalize_email(&identity.email);
            match store.find_by_email(&email).await? {
                Some(existing) => link_provider(store, existing, identity).await?,
                None => create_federated(store, email, identity).await?,
            }
        }
    };

    store
        .record_login(user.id, OffsetDateTime::now_utc())
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("federated user vanished")))
}

/// Attaches the provider subject to a local account with the same email.
/// Only a provider-verified email may claim an existing account.
async fn link_provider(
    store: &dyn UserStore,
    existing: User,
    identity: FederatedIdentity,
) -> Result<User, AppError> {
    let account = match existing.account {
        Account::Local { .. } if identity.email_verified => {
            existing.account.with_provider(identity.subject)
        }
        Account::Local { .. } => {
            warn!(user_id = %existing.id, "unverified provider email matches local account");
            return Err(AppError::Conflict(
                "Email is linked to a different account".into(),
            ));
        }
        Account::Federated { .. } | Account::Hybrid { .. } => {
            warn!(user_id = %existing.id, "email bound to another federated identity");
            return Err(AppError::Conflict(
                "Email is linked to a different account".into(),
            ));
        }
    };
    let user = store
        .update_account(existing.id, &account)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("linked user vanished")))?;
    info!(user_id = %user.id, "federated identity linked");
    Ok(user)
}

async fn create_federated(
    store: &dyn UserStore,
    email: String,
    identity: FederatedIdentity,
) -> Result<User, AppError> {
    let new = NewUser {
        username: None,
        email,
        account: Account::Federated {
            provider_id: identity.subject.clone(),
        },
        dob: None,
        is_verified: identity.email_verified,
    };
    match store.insert(new).await {
        Ok(user) => {
            info!(user_id = %user.id, "federated user created");
            Ok(user)
        }
        // a concurrent callback for the same subject won the insert
        Err(StoreError::Conflict(_)) => store
            .find_by_federated_id(&identity.subject)
            .await?
            .ok_or_else(|| AppError::Conflict("User already exists".into())),
        Err(e) => Err(e.into()),
    }
}

/// Checks a password change against `user` and returns the account to store.
///
/// Accounts that already have a password must re-prove it with `current`;
/// federated-only accounts may set one directly and become hybrid. Nothing
/// is written.
pub async fn prepare_password_change(
    user: &User,
    current: Option<&str>,
    new_password: &str,
) -> Result<Account, AppError> {
    validate_password(new_password)?;

    match &user.account {
        Account::Local { .. } | Account::Hybrid { .. } => {
            let current = current
                .filter(|c| !c.is_empty())
                .ok_or_else(|| AppError::Validation("Current password is required".into()))?;
            if !verify_credential(current, &user.account).await? {
                warn!(user_id = %user.id, "change password with wrong current password");
                return Err(AppError::Validation(
                    "Current password is incorrect".into(),
                ));
            }
        }
        Account::Federated { .. } => {}
    }

    let password_hash = hash_password_blocking(new_password.to_owned()).await?;
    Ok(user.account.clone().with_password(password_hash))
}

/// Stores an account produced by [`prepare_password_change`].
pub async fn store_password_change(
    store: &dyn UserStore,
    user_id: Uuid,
    account: &Account,
) -> Result<User, AppError> {
    let updated = store
        .update_account(user_id, account)
        .await?
        .ok_or(AppError::Unauthorized(AuthFailure::UserNotFound))?;
    info!(user_id = %updated.id, account = ?updated.account.kind(), "password changed");
    Ok(updated)
}

/// Sets a new local password. See [`prepare_password_change`] for the rules.
pub async fn change_password(
    store: &dyn UserStore,
    user: User,
    current: Option<&str>,
    new_password: &str,
) -> Result<User, AppError> {
    let account = prepare_password_change(&user, current, new_password).await?;
    store_password_change(store, user.id, &account).await
}
