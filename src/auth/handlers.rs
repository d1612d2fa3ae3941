use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, HealthResponse, LoginRequest, MessageResponse, PublicUser, RegisterRequest},
        extractors::{AuthSession, JsonBody},
    },
    error::AuthError,
    state::AppState,
    users::NewUser,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

fn set_cookie(value: String) -> Result<HeaderMap, AuthError> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&value)
        .map_err(|e| AuthError::Configuration(format!("bad cookie value: {e}")))?;
    headers.insert(header::SET_COOKIE, value);
    Ok(headers)
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

/// Passwords are taken verbatim; only an absent or empty one is missing.
fn required_password(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.is_empty())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, HeaderMap, Json<AuthResponse>), AuthError> {
    let (Some(name), Some(email), Some(password)) = (
        required(payload.name),
        required(payload.email),
        required_password(payload.password),
    ) else {
        warn!("register with missing fields");
        return Err(AuthError::Validation("Name, email and password are required".into()));
    };

    let user = state
        .store
        .create_user(NewUser {
            name,
            email,
            password,
        })
        .await?;

    let token = state.sessions.issue_token(&user)?;
    let headers = set_cookie(state.sessions.session_cookie(&token))?;

    info!(user_id = %user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        headers,
        Json(AuthResponse {
            success: true,
            message: Some("Registration successful".into()),
            user: user.into(),
            token: Some(token),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<(HeaderMap, Json<AuthResponse>), AuthError> {
    let (Some(email), Some(password)) =
        (required(payload.email), required_password(payload.password))
    else {
        return Err(AuthError::Validation("Email and password are required".into()));
    };

    let Some(user) = state.store.verify_credentials(&email, &password).await? else {
        warn!("login rejected");
        return Err(AuthError::InvalidCredentials);
    };

    let token = state.sessions.issue_token(&user)?;
    let headers = set_cookie(state.sessions.session_cookie(&token))?;

    info!(user_id = %user.id, "user logged in");
    Ok((
        headers,
        Json(AuthResponse {
            success: true,
            message: Some("Login successful".into()),
            user: user.into(),
            token: None,
        }),
    ))
}

#[instrument(skip(state, session))]
pub async fn get_me(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<AuthResponse>, AuthError> {
    let user = state
        .store
        .get_user_by_id(&session.claims.id)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %session.claims.id, "session for deleted user");
            AuthError::NotFound
        })?;

    let token = if session.needs_refresh {
        Some(state.sessions.refresh_token(&user)?)
    } else {
        None
    };

    Ok(Json(AuthResponse {
        success: true,
        message: None,
        user: PublicUser::from(user),
        token,
    }))
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
) -> Result<(HeaderMap, Json<MessageResponse>), AuthError> {
    let headers = set_cookie(state.sessions.clear_cookie())?;
    Ok((
        headers,
        Json(MessageResponse {
            success: true,
            message: "Logout successful".into(),
        }),
    ))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if state.store.health_check().await {
        (
            StatusCode::OK,
            Json(HealthResponse {
                success: true,
                store: "ok",
            }),
        )
    } else {
        error!("health check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                success: false,
                store: "unavailable",
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::services::RequestCredentials;
    use crate::users::{repo_types::UserPatch, UserStore};

    fn app(state: AppState) -> Router {
        crate::app::build_app(state)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_with(uri: &str, name: header::HeaderName, value: &str) -> Request<Body> {
        Request::get(uri).header(name, value).body(Body::empty()).unwrap()
    }

    fn alice() -> Value {
        json!({"name": "Alice", "email": "a@x.com", "password": "secret1"})
    }

    #[tokio::test]
    async fn register_then_me_round_trip() {
        let state = AppState::fake();
        let app = app(state.clone());

        let (status, headers, body) = send(&app, post_json("/auth/register", alice())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["email"], "a@x.com");
        assert!(body["user"].get("passwordHash").is_none());
        let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("auth-token="));
        assert!(cookie.contains("HttpOnly"));

        let token = body["token"].as_str().unwrap().to_string();
        let claims = state.sessions.verify_token(&token).unwrap();
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.name, "Alice");
        let stored = state.store.get_user_by_id(&claims.id).await.unwrap().unwrap();
        assert_eq!(stored.email, "a@x.com");

        let (status, _, body) = send(
            &app,
            get_with("/auth/me", header::AUTHORIZATION, &format!("Bearer {token}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], claims.id.as_str());
        assert!(body.get("token").is_none());
    }

    #[tokio::test]
    async fn register_validation_and_duplicates() {
        let app = app(AppState::fake());

        let (status, _, body) = send(
            &app,
            post_json("/auth/register", json!({"name": "Alice", "email": "a@x.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _, _) = send(
            &app,
            post_json(
                "/auth/register",
                json!({"name": "Alice", "email": "a@x.com", "password": "123"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&app, post_json("/auth/register", alice())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _, body) = send(&app, post_json("/auth/register", alice())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Email is already registered");
    }

    #[tokio::test]
    async fn login_sets_cookie_and_hides_failure_reason() {
        let app = app(AppState::fake());
        send(&app, post_json("/auth/register", alice())).await;

        let (status, headers, body) = send(
            &app,
            post_json("/auth/login", json!({"email": "A@x.com", "password": "secret1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["name"], "Alice");
        assert!(headers.get(header::SET_COOKIE).is_some());

        let (wrong_pw, _, wrong_pw_body) = send(
            &app,
            post_json("/auth/login", json!({"email": "a@x.com", "password": "nope123"})),
        )
        .await;
        let (no_user, _, no_user_body) = send(
            &app,
            post_json("/auth/login", json!({"email": "z@x.com", "password": "secret1"})),
        )
        .await;
        assert_eq!(wrong_pw, StatusCode::UNAUTHORIZED);
        assert_eq!(no_user, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_pw_body, no_user_body);

        let (status, _, _) = send(&app, post_json("/auth/login", json!({"email": "a@x.com"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn me_reads_cookie_and_rejects_missing_or_bad_tokens() {
        let state = AppState::fake();
        let app = app(state.clone());
        let (_, headers, _) = send(&app, post_json("/auth/register", alice())).await;
        let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        let pair = cookie.split(';').next().unwrap().to_string();

        let (status, _, body) = send(&app, get_with("/auth/me", header::COOKIE, &pair)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "a@x.com");

        let (status, headers, missing_body) =
            send(&app, Request::get("/auth/me").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            headers.get(header::WWW_AUTHENTICATE).unwrap(),
            r#"Bearer realm="api""#
        );

        let (status, _, bad_body) = send(
            &app,
            get_with("/auth/me", header::AUTHORIZATION, "Bearer not.a.token"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(missing_body, bad_body);
    }

    #[tokio::test]
    async fn me_returns_404_for_deleted_user() {
        let state = AppState::fake();
        let app = app(state.clone());
        let (_, _, body) = send(&app, post_json("/auth/register", alice())).await;
        let token = body["token"].as_str().unwrap().to_string();
        let id = body["user"]["id"].as_str().unwrap().to_string();

        state.store.delete_user(&id).await.unwrap();

        let (status, _, _) = send(
            &app,
            get_with("/auth/me", header::AUTHORIZATION, &format!("Bearer {token}")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn me_refreshes_near_expiry_from_current_record() {
        let state = AppState::fake();
        let app = app(state.clone());
        let (_, _, body) = send(&app, post_json("/auth/register", alice())).await;
        let id = body["user"]["id"].as_str().unwrap().to_string();

        let user = state
            .store
            .update_user(
                &id,
                UserPatch {
                    name: Some("Alice Cooper".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let issued = time::OffsetDateTime::now_utc() - time::Duration::days(7)
            + time::Duration::minutes(10);
        let old = state.sessions.issue_token_at(&user, issued).unwrap();

        let (status, _, body) = send(
            &app,
            get_with("/auth/me", header::AUTHORIZATION, &format!("Bearer {old}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let fresh = body["token"].as_str().expect("refreshed token");
        let claims = state.sessions.verify_token(fresh).unwrap();
        assert_eq!(claims.name, "Alice Cooper");
        assert!(!state.sessions.needs_refresh(&claims));
    }

    #[tokio::test]
    async fn logout_clears_cookie() {
        let state = AppState::fake();
        let app = app(state.clone());
        let (status, headers, body) =
            send(&app, Request::post("/auth/logout").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let mut jar = HeaderMap::new();
        jar.insert(
            header::COOKIE,
            headers
                .get(header::SET_COOKIE)
                .unwrap()
                .to_str()
                .unwrap()
                .split(';')
                .next()
                .unwrap()
                .parse()
                .unwrap(),
        );
        let creds = RequestCredentials::from_headers(&jar, state.sessions.cookie_name());
        assert_eq!(state.sessions.extract_token(&creds), None);
    }

    #[tokio::test]
    async fn health_reports_store_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = AppState::fake();
        state.store = std::sync::Arc::new(UserStore::open(&crate::config::StoreConfig {
            path: dir.path().join("users.json"),
        }));
        let app = app(state);

        let (status, _, body) =
            send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store"], "ok");
    }

    fn post_raw(uri: &str, content_type: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn unreadable_bodies_get_json_400() {
        let app = app(AppState::fake());
        let cases = [
            ("/auth/login", "application/json", "{not json"),
            ("/auth/login", "application/json", r#"{"email":123,"password":"secret1"}"#),
            ("/auth/login", "text/plain", r#"{"email":"a@x.com","password":"secret1"}"#),
            ("/auth/register", "application/json", "{not json"),
            ("/auth/register", "text/plain", "name=Alice"),
        ];
        for (uri, content_type, raw) in cases {
            let (status, _, body) = send(&app, post_raw(uri, content_type, raw)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} {content_type} {raw}");
            assert_eq!(body["success"], false);
            assert!(body["message"].is_string());
        }
    }

    #[tokio::test]
    async fn blank_looking_password_is_taken_verbatim() {
        let app = app(AppState::fake());
        let spaces = json!({"name": "Sam", "email": "s@x.com", "password": "       "});
        let (status, _, _) = send(&app, post_json("/auth/register", spaces)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, _) = send(
            &app,
            post_json("/auth/login", json!({"email": "s@x.com", "password": "       "})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = send(
            &app,
            post_json("/auth/login", json!({"email": "s@x.com", "password": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_failure_is_a_generic_500() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::create_dir(&path).unwrap();

        let mut state = AppState::fake();
        state.store = std::sync::Arc::new(UserStore::open(&crate::config::StoreConfig {
            path: path.clone(),
        }));
        let app = app(state);

        let (status, headers, body) = send(&app, post_json("/auth/register", alice())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(headers.get(header::SET_COOKIE).is_none());
        assert_eq!(
            body,
            json!({"success": false, "message": "Internal server error"})
        );

        let (status, _, body) =
            send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["store"], "unavailable");
    }
}
