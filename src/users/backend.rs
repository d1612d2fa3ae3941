use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, error, info, warn};

use super::repo_types::StoredUser;
use crate::error::AuthError;

/// Whole-collection persistence. Implementations must never expose a
/// half-written collection to `load`.
#[async_trait]
pub trait UserBackend: Send + Sync {
    async fn load(&self) -> Result<Vec<StoredUser>, AuthError>;
    async fn persist(&self, users: &[StoredUser]) -> Result<(), AuthError>;
}

/// Single JSON array document, replaced via `<path>.temp` + rename.
///
/// `write_lock` guards the shared temp path: every rename, including the
/// reset after corruption, happens while holding it.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut p = self.path.clone().into_os_string();
        p.push(".temp");
        PathBuf::from(p)
    }

    fn backup_path(&self) -> PathBuf {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let mut p = self.path.clone().into_os_string();
        p.push(format!(".backup.{millis}"));
        PathBuf::from(p)
    }

    /// Creates the document if it is missing. Never truncates an existing
    /// one: creation is `create_new`, so a concurrent creator or writer wins.
    async fn ensure_exists(&self) -> Result<(), AuthError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(persistence(e)),
        }

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(persistence)?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(mut file) => {
                file.write_all(b"[]").await.map_err(persistence)?;
                file.flush().await.map_err(persistence)?;
                info!(path = %self.path.display(), "created empty user store");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(persistence(e)),
        }
    }

    async fn write_atomic(&self, bytes: &[u8]) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock().await;
        self.write_atomic_locked(bytes).await
    }

    async fn write_atomic_locked(&self, bytes: &[u8]) -> Result<(), AuthError> {
        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes).await.map_err(|e| {
            error!(error = %e, path = %temp.display(), "writing temp user store failed");
            persistence(e)
        })?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            error!(error = %e, path = %self.path.display(), "renaming temp user store failed");
            persistence(e)
        })
    }

    /// Copies the unreadable document aside and resets the store to `[]`.
    /// Skipped when a writer replaced the document since `raw` was read.
    async fn recover_corrupt(&self, raw: &[u8]) {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::read(&self.path).await {
            Ok(current) if current == raw => {}
            Ok(_) => {
                debug!(path = %self.path.display(), "user store replaced before reset");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to re-read corrupt user store");
                return;
            }
        }

        let backup = self.backup_path();
        match tokio::fs::write(&backup, raw).await {
            Ok(()) => warn!(backup = %backup.display(), "corrupt user store backed up"),
            Err(e) => {
                error!(error = %e, backup = %backup.display(), "failed to back up corrupt user store");
            }
        }
        match self.write_atomic_locked(b"[]").await {
            Ok(()) => warn!(path = %self.path.display(), "user store reset to empty collection"),
            Err(e) => error!(error = %e, "failed to reset corrupt user store"),
        }
    }
}

#[async_trait]
impl UserBackend for JsonFileBackend {
    async fn load(&self) -> Result<Vec<StoredUser>, AuthError> {
        self.ensure_exists().await?;
        let raw = tokio::fs::read(&self.path).await.map_err(persistence)?;
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        match serde_json::from_slice::<Vec<StoredUser>>(&raw) {
            Ok(users) => Ok(users),
            Err(e) => {
                error!(error = %e, path = %self.path.display(), "user store is corrupt");
                self.recover_corrupt(&raw).await;
                Ok(Vec::new())
            }
        }
    }

    async fn persist(&self, users: &[StoredUser]) -> Result<(), AuthError> {
        self.ensure_exists().await?;
        let bytes = serde_json::to_vec_pretty(users)
            .map_err(|e| AuthError::Persistence(e.to_string()))?;
        self.write_atomic(&bytes).await
    }
}

/// Non-durable backend with the same contract; handy for tests.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    users: Mutex<Vec<StoredUser>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserBackend for InMemoryBackend {
    async fn load(&self) -> Result<Vec<StoredUser>, AuthError> {
        Ok(self.users.lock().await.clone())
    }

    async fn persist(&self, users: &[StoredUser]) -> Result<(), AuthError> {
        *self.users.lock().await = users.to_vec();
        Ok(())
    }
}

fn persistence(e: std::io::Error) -> AuthError {
    AuthError::Persistence(e.to_string())
}
