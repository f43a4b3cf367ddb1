//! In-process [`UserStore`] used by the handler tests.
use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{
    repo::{StoreError, UserStore},
    repo_types::{Account, NewUser, ProfileUpdate, User},
};

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn len(&self) -> usize {
        self.users.lock().map(|u| u.len()).unwrap_or_default()
    }

    fn find(&self, pred: impl Fn(&User) -> bool) -> Result<Option<User>, StoreError> {
        let users = self.lock()?;
        Ok(users.values().find(|u| pred(u)).cloned())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, User>>, StoreError> {
        self.users
            .lock()
            .map_err(|_| StoreError::Corrupt("memory store poisoned".into()))
    }
}

/// Same uniqueness rules as the `users` table constraints.
fn check_unique(
    users: &HashMap<Uuid, User>,
    skip: Option<Uuid>,
    email: Option<&str>,
    username: Option<&str>,
    provider_id: Option<&str>,
) -> Result<(), StoreError> {
    for other in users.values().filter(|u| Some(u.id) != skip) {
        if email.is_some() && email == Some(other.email.as_str()) {
            return Err(StoreError::Conflict("email".into()));
        }
        if username.is_some() && username == other.username.as_deref() {
            return Err(StoreError::Conflict("username".into()));
        }
        if provider_id.is_some() && provider_id == other.account.provider_id() {
            return Err(StoreError::Conflict("federated_id".into()));
        }
    }
    Ok(())
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find(|u| u.email == email)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find(|u| u.username.as_deref() == Some(username))
    }

    async fn find_by_federated_id(
        &self,
        federated_id: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find(|u| u.account.provider_id() == Some(federated_id))
    }

    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.lock()?;
        check_unique(
            &users,
            None,
            Some(&new.email),
            new.username.as_deref(),
            new.account.provider_id(),
        )?;
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            account: new.account,
            dob: new.dob,
            is_verified: new.is_verified,
            created_at: OffsetDateTime::now_utc(),
            last_login_at: None,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn record_login(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.lock()?;
        Ok(users.get_mut(&id).map(|u| {
            u.last_login_at = Some(at);
            u.clone()
        }))
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.lock()?;
        check_unique(&users, Some(id), None, update.username.as_deref(), None)?;
        Ok(users.get_mut(&id).map(|u| {
            if let Some(username) = update.username {
                u.username = Some(username);
            }
            if let Some(dob) = update.dob {
                u.dob = Some(dob);
            }
            u.clone()
        }))
    }

    async fn update_account(
        &self,
        id: Uuid,
        account: &Account,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.lock()?;
        check_unique(&users, Some(id), None, None, account.provider_id())?;
        Ok(users.get_mut(&id).map(|u| {
            u.account = account.clone();
            u.clone()
        }))
    }
}
