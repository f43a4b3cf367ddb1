use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{Account, NewUser, ProfileUpdate, User, UserRow};

const USER_COLUMNS: &str = "id, username, email, password_hash, federated_id, dob, \
                            is_verified, created_at, last_login_at";

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique column (`email`, `username`, `federated_id`) already holds the value.
    #[error("{0} already exists")]
    Conflict(String),

    #[error("corrupt user record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence for user accounts.
///
/// Uniqueness of email, username and federated id is enforced by the store
/// itself; inserts and updates that would break it fail with
/// [`StoreError::Conflict`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_federated_id(&self, federated_id: &str)
        -> Result<Option<User>, StoreError>;
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;
    async fn record_login(&self, id: Uuid, at: OffsetDateTime)
        -> Result<Option<User>, StoreError>;
    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<User>, StoreError>;
    async fn update_account(&self, id: Uuid, account: &Account)
        -> Result<Option<User>, StoreError>;
}

/// Postgres-backed [`UserStore`].
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        row.map(User::try_from).transpose()
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_one("email", email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_one("username", username).await
    }

    async fn find_by_federated_id(
        &self,
        federated_id: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find_one("federated_id", federated_id).await
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (username, email, password_hash, federated_id, dob, is_verified)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(user.account.password_hash())
            .bind(user.account.provider_id())
            .bind(user.dob)
            .bind(user.is_verified)
            .fetch_one(&self.db)
            .await
            .map_err(map_unique_violation)?;
        User::try_from(row)
    }

    async fn record_login(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "UPDATE users SET last_login_at = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.db)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET username = COALESCE($2, username),
                   dob = COALESCE($3, dob)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(update.username)
            .bind(update.dob)
            .fetch_optional(&self.db)
            .await
            .map_err(map_unique_violation)?;
        row.map(User::try_from).transpose()
    }

    async fn update_account(
        &self,
        id: Uuid,
        account: &Account,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET password_hash = $2,
                   federated_id = $3
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(account.password_hash())
            .bind(account.provider_id())
            .fetch_optional(&self.db)
            .await
            .map_err(map_unique_violation)?;
        row.map(User::try_from).transpose()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Turns a Postgres unique violation into [`StoreError::Conflict`] naming the column.
fn map_unique_violation(err: sqlx::Error) -> StoreError {
    if !is_unique_violation(&err) {
        return StoreError::Database(err);
    }
    let constraint = match &err {
        sqlx::Error::Database(db) => db.constraint().unwrap_or_default().to_string(),
        _ => String::new(),
    };
    let field = ["email", "username", "federated_id"]
        .into_iter()
        .find(|f| constraint.contains(f))
        .unwrap_or("user");
    StoreError::Conflict(field.to_string())
}
