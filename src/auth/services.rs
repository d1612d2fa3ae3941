use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, instrument, warn};

pub(crate) use crate::auth::claims::Claims;
use crate::config::SessionConfig;
use crate::error::AuthError;
use crate::users::UserRecord;

/// Raw credential sources of one request, lifted out of the framework's
/// request object so token extraction does not depend on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCredentials {
    pub cookie: Option<String>,
    pub authorization: Option<String>,
}

impl RequestCredentials {
    pub fn from_headers(headers: &HeaderMap, cookie_name: &str) -> Self {
        let cookie = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == cookie_name)
            .map(|(_, value)| value.trim().to_string());

        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            cookie,
            authorization,
        }
    }

    /// Cookie wins; the Authorization header is consulted only without one.
    pub fn token(&self) -> Option<String> {
        if let Some(cookie) = self.cookie.as_deref().map(str::trim) {
            if !cookie.is_empty() {
                return Some(cookie.to_string());
            }
        }
        let auth = self.authorization.as_deref()?.trim();
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))?
            .trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

/// Outcome of authenticating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    Unauthenticated,
    Valid(Claims),
    NeedsRefresh(Claims),
}

/// Issues and checks HS256 session tokens.
#[derive(Clone)]
pub struct SessionService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: TimeDuration,
    refresh_window: TimeDuration,
    cookie_name: String,
}

impl SessionService {
    pub fn new(config: &SessionConfig) -> Result<Self, AuthError> {
        config.validate()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;

        Ok(Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            ttl: to_time(config.ttl)?,
            refresh_window: to_time(config.refresh_window)?,
            cookie_name: config.cookie_name.clone(),
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.whole_seconds()
    }

    pub fn issue_token(&self, user: &UserRecord) -> Result<String, AuthError> {
        self.issue_token_at(user, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_token_at(
        &self,
        user: &UserRecord,
        now: OffsetDateTime,
    ) -> Result<String, AuthError> {
        let expires = now
            .checked_add(self.ttl)
            .ok_or_else(|| AuthError::Configuration("session expiry is out of range".into()))?;
        let claims = Claims {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            iat: now.unix_timestamp(),
            exp: expires.unix_timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Configuration(format!("jwt signing failed: {e}")))?;
        debug!(user_id = %user.id, exp = claims.exp, "session token signed");
        Ok(token)
    }

    /// Signature and expiry are checked together; every failure is the same
    /// `InvalidToken` to the caller.
    #[instrument(skip(self, token))]
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => {
                debug!(user_id = %data.claims.id, "session token verified");
                Ok(data.claims)
            }
            Err(e) => {
                warn!(reason = ?e.kind(), "session token rejected");
                Err(AuthError::InvalidToken)
            }
        }
    }

    pub fn extract_token(&self, credentials: &RequestCredentials) -> Option<String> {
        credentials.token()
    }

    pub fn needs_refresh(&self, claims: &Claims) -> bool {
        self.needs_refresh_at(claims, OffsetDateTime::now_utc())
    }

    pub fn needs_refresh_at(&self, claims: &Claims, now: OffsetDateTime) -> bool {
        now.unix_timestamp() >= claims.exp.saturating_sub(self.refresh_window.whole_seconds())
    }

    /// Always derived from the current stored record, never from old claims.
    pub fn refresh_token(&self, user: &UserRecord) -> Result<String, AuthError> {
        self.issue_token(user)
    }

    pub fn authenticate(&self, credentials: &RequestCredentials) -> AuthStatus {
        let Some(token) = self.extract_token(credentials) else {
            return AuthStatus::Unauthenticated;
        };
        match self.verify_token(&token) {
            Ok(claims) if self.needs_refresh(&claims) => AuthStatus::NeedsRefresh(claims),
            Ok(claims) => AuthStatus::Valid(claims),
            Err(_) => AuthStatus::Unauthenticated,
        }
    }

    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
            self.cookie_name,
            token,
            self.ttl_seconds()
        )
    }

    pub fn clear_cookie(&self) -> String {
        format!(
            "{}=; HttpOnly; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; SameSite=Lax",
            self.cookie_name
        )
    }
}

fn to_time(d: std::time::Duration) -> Result<TimeDuration, AuthError> {
    TimeDuration::try_from(d).map_err(|e| AuthError::Configuration(e.to_string()))
}
