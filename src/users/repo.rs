use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::backend::{JsonFileBackend, UserBackend};
use super::password::{hash_password, is_legacy_hash, verify_password};
use super::repo_types::{NewUser, StoredUser, UserPatch, UserRecord};
use crate::config::StoreConfig;
use crate::error::AuthError;

const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_name(name: &str) -> Result<(), AuthError> {
    if name.trim().is_empty() {
        return Err(AuthError::Validation("Name is required".into()));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), AuthError> {
    if email.is_empty() {
        return Err(AuthError::Validation("Email is required".into()));
    }
    if !is_valid_email(email) {
        return Err(AuthError::Validation("Invalid email format".into()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.is_empty() {
        return Err(AuthError::Validation("Password is required".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// UUIDv7: millisecond timestamp prefix plus random tail.
fn new_user_id() -> String {
    format!("user_{}", Uuid::now_v7().simple())
}

/// One read-modify-write cycle over the whole collection.
///
/// Holds the store's write lock for its lifetime, so no other transaction in
/// this process can interleave. Dropping it without `commit` discards every
/// change made through `users_mut`.
pub struct Transaction<'a> {
    users: Vec<StoredUser>,
    backend: &'a dyn UserBackend,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> Transaction<'a> {
    pub fn users(&self) -> &[StoredUser] {
        &self.users
    }

    pub fn users_mut(&mut self) -> &mut Vec<StoredUser> {
        &mut self.users
    }

    pub fn find_by_email(&self, email: &str) -> Option<&StoredUser> {
        self.users.iter().find(|u| u.matches_email(email))
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.users.iter().position(|u| u.id == id)
    }

    pub async fn commit(self) -> Result<(), AuthError> {
        self.backend.persist(&self.users).await
    }
}

/// Durable user collection. Every accessor except `get_user_by_email`
/// strips the password hash.
pub struct UserStore {
    backend: Arc<dyn UserBackend>,
    write_lock: Mutex<()>,
}

impl UserStore {
    pub fn new(backend: Arc<dyn UserBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn open(config: &StoreConfig) -> Self {
        info!(path = %config.path.display(), "opening json user store");
        Self::new(Arc::new(JsonFileBackend::new(&config.path)))
    }

    pub async fn begin(&self) -> Result<Transaction<'_>, AuthError> {
        let guard = self.write_lock.lock().await;
        let users = self.backend.load().await?;
        Ok(Transaction {
            users,
            backend: self.backend.as_ref(),
            _guard: guard,
        })
    }

    #[instrument(skip(self, new), fields(email = %new.email.trim()))]
    pub async fn create_user(&self, new: NewUser) -> Result<UserRecord, AuthError> {
        let name = new.name.trim().to_string();
        let email = normalize_email(&new.email);
        validate_name(&name)?;
        validate_email(&email)?;
        validate_password(&new.password)?;

        let password_hash = hash_password(&new.password).await?;

        let mut tx = self.begin().await?;
        if tx.find_by_email(&email).is_some() {
            warn!("email already registered");
            return Err(AuthError::DuplicateEmail);
        }

        let now = OffsetDateTime::now_utc();
        let user = StoredUser {
            id: new_user_id(),
            name,
            email,
            password_hash,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        tx.users_mut().push(user.clone());
        tx.commit().await?;

        info!(user_id = %user.id, "user created");
        Ok(user.into())
    }

    /// Includes the password hash. Trusted callers only.
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<StoredUser>, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Ok(None);
        }
        let users = self.backend.load().await?;
        Ok(users.into_iter().find(|u| u.matches_email(&email)))
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>, AuthError> {
        if id.is_empty() {
            return Ok(None);
        }
        let users = self.backend.load().await?;
        Ok(users.into_iter().find(|u| u.id == id).map(UserRecord::from))
    }

    pub async fn get_users(&self) -> Result<Vec<UserRecord>, AuthError> {
        let users = self.backend.load().await?;
        Ok(users.into_iter().map(UserRecord::from).collect())
    }

    /// `None` for an unknown email and for a wrong password alike.
    #[instrument(skip(self, email, password))]
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Ok(None);
        }
        let Some(user) = self.get_user_by_email(email).await? else {
            debug!("credential check for unknown email");
            return Ok(None);
        };
        if !verify_password(password, &user.password_hash).await {
            debug!(user_id = %user.id, "credential check with wrong password");
            return Ok(None);
        }

        // legacy bcrypt hashes are rewritten as Argon2 once the password is known
        let upgraded = if is_legacy_hash(&user.password_hash) {
            match hash_password(password).await {
                Ok(hash) => Some(hash),
                Err(e) => {
                    warn!(error = %e, user_id = %user.id, "could not rehash legacy password");
                    None
                }
            }
        } else {
            None
        };

        let mut record = user.to_record();
        match self.record_login(&user.id, upgraded).await {
            Ok(Some(at)) => record.last_login_at = Some(at),
            Ok(None) => {}
            Err(e) => warn!(error = %e, user_id = %user.id, "could not update last login time"),
        }
        Ok(Some(record))
    }

    async fn record_login(
        &self,
        id: &str,
        upgraded_hash: Option<String>,
    ) -> Result<Option<OffsetDateTime>, AuthError> {
        let mut tx = self.begin().await?;
        let Some(idx) = tx.position(id) else {
            return Ok(None);
        };
        let now = OffsetDateTime::now_utc();
        let user = &mut tx.users_mut()[idx];
        user.last_login_at = Some(now);
        if let Some(hash) = upgraded_hash {
            info!(user_id = %id, "legacy password hash upgraded");
            user.password_hash = hash;
        }
        tx.commit().await?;
        Ok(Some(now))
    }

    #[instrument(skip(self, patch))]
    pub async fn update_user(&self, id: &str, patch: UserPatch) -> Result<UserRecord, AuthError> {
        let name = patch.name.as_deref().map(str::trim).map(str::to_string);
        let email = patch.email.as_deref().map(normalize_email);
        if let Some(name) = &name {
            validate_name(name)?;
        }
        if let Some(email) = &email {
            validate_email(email)?;
        }
        let password_hash = match &patch.password {
            Some(password) => {
                validate_password(password)?;
                Some(hash_password(password).await?)
            }
            None => None,
        };

        let mut tx = self.begin().await?;
        let idx = tx.position(id).ok_or(AuthError::NotFound)?;
        if let Some(email) = &email {
            let taken = tx
                .users()
                .iter()
                .any(|u| u.id != id && u.matches_email(email));
            if taken {
                warn!(user_id = %id, "email already used by another user");
                return Err(AuthError::DuplicateEmail);
            }
        }

        let user = &mut tx.users_mut()[idx];
        if let Some(name) = name {
            user.name = name;
        }
        if let Some(email) = email {
            user.email = email;
        }
        if let Some(hash) = password_hash {
            user.password_hash = hash;
        }
        user.updated_at = OffsetDateTime::now_utc();
        let updated = user.to_record();
        tx.commit().await?;

        info!(user_id = %id, "user updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: &str) -> Result<bool, AuthError> {
        let mut tx = self.begin().await?;
        let idx = tx.position(id).ok_or(AuthError::NotFound)?;
        tx.users_mut().remove(idx);
        tx.commit().await?;
        info!(user_id = %id, "user deleted");
        Ok(true)
    }

    /// Whether the backing store can currently be read.
    pub async fn health_check(&self) -> bool {
        match self.backend.load().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "user store health check failed");
                false
            }
        }
    }
}
