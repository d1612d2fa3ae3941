use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts},
    http::request::Parts,
};
use tracing::debug;

use super::claims::Claims;
use super::services::{AuthStatus, RequestCredentials};
use crate::error::AuthError;
use crate::state::AppState;

/// JSON request body whose rejections use the `{success, message}` shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AuthError))]
pub struct JsonBody<T>(pub T);

/// Verified session of the caller, from the `auth-token` cookie or a
/// `Bearer` header.
pub struct AuthSession {
    pub claims: Claims,
    pub needs_refresh: bool,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credentials = RequestCredentials::from_headers(&parts.headers, state.sessions.cookie_name());

        match state.sessions.authenticate(&credentials) {
            AuthStatus::Valid(claims) => Ok(AuthSession {
                claims,
                needs_refresh: false,
            }),
            AuthStatus::NeedsRefresh(claims) => {
                debug!(user_id = %claims.id, "session close to expiry");
                Ok(AuthSession {
                    claims,
                    needs_refresh: true,
                })
            }
            AuthStatus::Unauthenticated => Err(AuthError::Unauthenticated),
        }
    }
}
