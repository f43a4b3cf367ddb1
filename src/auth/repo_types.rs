use serde::Serialize;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::repo::StoreError;

/// How an account proves who it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Account {
    Local { password_hash: String },
    Federated { provider_id: String },
    Hybrid { password_hash: String, provider_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Local,
    Federated,
    Hybrid,
}

impl Account {
    pub fn kind(&self) -> AccountType {
        match self {
            Account::Local { .. } => AccountType::Local,
            Account::Federated { .. } => AccountType::Federated,
            Account::Hybrid { .. } => AccountType::Hybrid,
        }
    }

    pub fn password_hash(&self) -> Option<&str> {
        match self {
            Account::Local { password_hash } | Account::Hybrid { password_hash, .. } => {
                Some(password_hash.as_str())
            }
            Account::Federated { .. } => None,
        }
    }

    pub fn provider_id(&self) -> Option<&str> {
        match self {
            Account::Federated { provider_id } | Account::Hybrid { provider_id, .. } => {
                Some(provider_id.as_str())
            }
            Account::Local { .. } => None,
        }
    }

    /// The account after its local password is set to `password_hash`.
    pub fn with_password(self, password_hash: String) -> Account {
        match self {
            Account::Local { .. } => Account::Local { password_hash },
            Account::Federated { provider_id } | Account::Hybrid { provider_id, .. } => {
                Account::Hybrid {
                    password_hash,
                    provider_id,
                }
            }
        }
    }

    /// The account after it is linked to the provider subject `provider_id`.
    pub fn with_provider(self, provider_id: String) -> Account {
        match self {
            Account::Local { password_hash } | Account::Hybrid { password_hash, .. } => {
                Account::Hybrid {
                    password_hash,
                    provider_id,
                }
            }
            Account::Federated { .. } => Account::Federated { provider_id },
        }
    }

    fn from_columns(
        password_hash: Option<String>,
        federated_id: Option<String>,
    ) -> Option<Account> {
        match (password_hash, federated_id) {
            (Some(password_hash), None) => Some(Account::Local { password_hash }),
            (None, Some(provider_id)) => Some(Account::Federated { provider_id }),
            (Some(password_hash), Some(provider_id)) => Some(Account::Hybrid {
                password_hash,
                provider_id,
            }),
            (None, None) => None,
        }
    }
}

/// User row as stored in the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: Option<String>,
    pub email: String,
    pub password_hash: Option<String>,
    pub federated_id: Option<String>,
    pub dob: Option<Date>,
    pub is_verified: bool,
    pub created_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
}

/// A user account. Credential material lives only in `account`.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: Option<String>,
    pub email: String,
    pub account: Account,
    pub dob: Option<Date>,
    pub is_verified: bool,
    pub created_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let account = Account::from_columns(row.password_hash, row.federated_id)
            .ok_or_else(|| StoreError::Corrupt(format!("user {} has no credential", row.id)))?;
        Ok(Self {
            id: row.id,
            username: row.username,
            email: row.email,
            account,
            dob: row.dob,
            is_verified: row.is_verified,
            created_at: row.created_at,
            last_login_at: row.last_login_at,
        })
    }
}

/// Fields supplied when creating an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: Option<String>,
    pub email: String,
    pub account: Account,
    pub dob: Option<Date>,
    pub is_verified: bool,
}

/// Partial profile update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub dob: Option<Date>,
}
