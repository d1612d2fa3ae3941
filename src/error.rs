use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("Email is already registered")]
    DuplicateEmail,

    #[error("User not found")]
    NotFound,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("user store persistence failed: {0}")]
    Persistence(String),

    #[error("invalid session token")]
    InvalidToken,

    #[error("not authenticated")]
    Unauthenticated,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                "Expected Content-Type: application/json"
            }
            JsonRejection::JsonSyntaxError(_) => "Request body is not valid JSON",
            JsonRejection::JsonDataError(_) => "Request body has fields of the wrong type",
            _ => "Invalid request body",
        };
        AuthError::Validation(message.into())
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) | AuthError::DuplicateEmail => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::Hashing(_) | AuthError::Persistence(_) | AuthError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AuthError::Validation(msg) => msg.clone(),
            AuthError::DuplicateEmail | AuthError::NotFound => self.to_string(),
            AuthError::InvalidCredentials => "Invalid email or password".to_string(),
            // token problems all look the same from the outside
            AuthError::InvalidToken | AuthError::Unauthenticated => "Not authenticated".to_string(),
            AuthError::Hashing(_) | AuthError::Persistence(_) | AuthError::Configuration(_) => {
                error!(error = %self, "internal auth failure");
                "Internal server error".to_string()
            }
        };

        let body = Json(json!({
            "success": false,
            "message": message,
        }));

        let mut response = (status, body).into_response();
        if matches!(self, AuthError::InvalidToken | AuthError::Unauthenticated) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Bearer realm="api""#),
            );
        }
        response
    }
}
