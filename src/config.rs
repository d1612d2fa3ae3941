use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AuthError;

pub const SESSION_COOKIE: &str = "auth-token";

const MIN_SECRET_LEN: usize = 16;
const DAY_SECS: u64 = 24 * 60 * 60;
const MAX_TTL: Duration = Duration::from_secs(365 * DAY_SECS);

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub ttl: Duration,
    pub refresh_window: Duration,
    pub cookie_name: String,
}

impl SessionConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::from_secs(7 * DAY_SECS),
            refresh_window: Duration::from_secs(15 * 60),
            cookie_name: SESSION_COOKIE.to_string(),
        }
    }

    /// Rejects signing keys that would make every issued token forgeable.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.secret.trim().is_empty() {
            return Err(AuthError::Configuration("JWT_SECRET is empty".into()));
        }
        if self.secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::Configuration(format!(
                "JWT_SECRET must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if self.ttl.is_zero() || self.ttl > MAX_TTL {
            return Err(AuthError::Configuration(format!(
                "session ttl must be between 1 second and {} days",
                MAX_TTL.as_secs() / DAY_SECS
            )));
        }
        if self.refresh_window.is_zero() {
            return Err(AuthError::Configuration(
                "refresh window must be positive".into(),
            ));
        }
        if self.refresh_window >= self.ttl {
            return Err(AuthError::Configuration(
                "refresh window must be shorter than the session ttl".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::from_lookup(|key| std::env::var(key).ok())?)
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let secret = lookup("JWT_SECRET")
            .ok_or_else(|| AuthError::Configuration("JWT_SECRET is not set".into()))?;

        let mut session = SessionConfig::new(secret);
        if let Some(days) = parse_u64(&lookup, "SESSION_TTL_DAYS")? {
            session.ttl = scaled("SESSION_TTL_DAYS", days, DAY_SECS)?;
        }
        if let Some(minutes) = parse_u64(&lookup, "SESSION_REFRESH_WINDOW_MINUTES")? {
            session.refresh_window = scaled("SESSION_REFRESH_WINDOW_MINUTES", minutes, 60)?;
        }
        session.validate()?;

        let store = StoreConfig {
            path: lookup("USERS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data").join("users.json")),
        };

        Ok(Self { session, store })
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, AuthError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| AuthError::Configuration(format!("{key} must be a whole number, got {raw:?}"))),
    }
}

fn scaled(key: &str, value: u64, unit_secs: u64) -> Result<Duration, AuthError> {
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| AuthError::Configuration(format!("{key} is out of range")))
}
