use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use microsight_auth::config::{AuthSettings, GoogleSettings, PasswordCost};
use microsight_auth::error::{AuthError, AuthResult};
use microsight_auth::models::ExternalIdentity;
use microsight_auth::services::oauth::{IdentityProvider, OAuthStage};
use microsight_auth::services::password::Argon2Hasher;
use microsight_auth::services::{AuthStores, SessionService};
use microsight_auth::store::{CredentialStore, MemoryStateStore, MemoryStore};
use microsight_auth::{routes, AppState, HttpSettings};
use microsight_shared::types::auth::UserRole;

struct FixedProvider;

#[async_trait]
impl IdentityProvider for FixedProvider {
    fn authorization_url(&self, state: &str) -> AuthResult<String> {
        Ok(format!("https://accounts.example.com/o/oauth2/auth?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> AuthResult<ExternalIdentity> {
        if code != "good-code" {
            return Err(AuthError::IdentityProvider {
                stage: OAuthStage::CodeExchanged,
                message: "invalid_grant".into(),
            });
        }
        Ok(ExternalIdentity {
            subject: "google-alice".into(),
            email: "alice@example.com".into(),
            display_name: "Alice".into(),
            avatar_url: None,
        })
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
}

fn app() -> TestApp {
    let settings = AuthSettings {
        jwt_secret: "integration-test-secret-0123456789abcdef".into(),
        jwt_issuer: "microsight-api".into(),
        access_token_ttl_secs: 900,
        refresh_token_ttl: chrono::Duration::days(7),
        oauth_state_ttl: Duration::from_secs(600),
        password: PasswordCost { memory_kib: 8, iterations: 1, parallelism: 1 },
        store_timeout: Duration::from_secs(5),
        google: GoogleSettings {
            client_id: "client".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://localhost:3001/api/auth/google/callback".into(),
            timeout: Duration::from_secs(5),
        },
    };

    let store = Arc::new(MemoryStore::new());
    let sessions = SessionService::new(
        &settings,
        AuthStores {
            credentials: store.clone(),
            refresh_tokens: store.clone(),
            states: Arc::new(MemoryStateStore::new()),
        },
        Arc::new(Argon2Hasher::new(settings.password).unwrap()),
        Arc::new(FixedProvider),
    );
    let state = Arc::new(AppState {
        sessions,
        http: HttpSettings {
            frontend_url: "http://localhost:5173".into(),
            cookie_secure: true,
        },
        metrics_handle: None,
    });

    TestApp { router: routes::router(state), store }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_cookie(method: &str, uri: &str, refresh: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, format!("refreshToken={refresh}"))
        .body(Body::empty())
        .unwrap()
}

fn with_bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn set_cookie(response: &Response) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("refreshToken="))
        .unwrap_or_default()
        .to_string()
}

fn refresh_value(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("refreshToken="))
        .unwrap_or_default()
        .to_string()
}

async fn register(app: &TestApp, email: &str) -> (String, String) {
    let response = send(
        app,
        json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({ "email": email, "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let refresh = refresh_value(&set_cookie(&response));
    let body = body_json(response).await;
    (body["data"]["access_token"].as_str().unwrap().to_string(), refresh)
}

#[tokio::test]
async fn register_sets_locked_down_cookie() {
    let app = app();
    let response = send(
        &app,
        json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({ "email": "alice@example.com", "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let cookie = set_cookie(&response);
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(cookie.contains("Path=/api/auth"));
    assert!(cookie.contains("Expires="));
    let secret = refresh_value(&cookie);
    assert_eq!(secret.len(), 64);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["token_type"], "Bearer");
    assert_eq!(body["data"]["expires_in"], 900);
    assert_eq!(body["data"]["user"]["email"], "alice@example.com");
    assert!(body["data"]["user"].get("password_hash").is_none());
    assert!(!body.to_string().contains(&secret));
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = app();
    register(&app, "alice@example.com").await;
    let response = send(
        &app,
        json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({ "email": "alice@example.com", "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "E1002");
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let app = app();
    register(&app, "alice@example.com").await;

    let wrong = send(
        &app,
        json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "email": "alice@example.com", "password": "nope-nope" }),
        ),
    )
    .await;
    let unknown = send(
        &app,
        json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "email": "bob@example.com", "password": "password123" }),
        ),
    )
    .await;

    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(wrong).await, body_json(unknown).await);
}

#[tokio::test]
async fn refresh_rotation_and_replay() {
    let app = app();
    register(&app, "alice@example.com").await;

    let login = send(
        &app,
        json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "email": "alice@example.com", "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(login.status(), StatusCode::OK);
    let original = refresh_value(&set_cookie(&login));

    let rotated = send(&app, with_cookie("POST", "/api/auth/refresh", &original)).await;
    assert_eq!(rotated.status(), StatusCode::OK);
    let newest = refresh_value(&set_cookie(&rotated));
    assert_ne!(newest, original);

    let replay = send(&app, with_cookie("POST", "/api/auth/refresh", &original)).await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(refresh_value(&set_cookie(&replay)), "");
    assert_eq!(body_json(replay).await["error"]["code"], "E1006");

    let after = send(&app, with_cookie("POST", "/api/auth/refresh", &newest)).await;
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_without_cookie_is_rejected() {
    let app = app();
    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/auth/refresh")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["code"], "E1005");
}

#[tokio::test]
async fn logout_revokes_refresh_token() {
    let app = app();
    let (_, refresh) = register(&app, "alice@example.com").await;

    let response = send(&app, with_cookie("POST", "/api/auth/logout", &refresh)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let again = send(&app, with_cookie("POST", "/api/auth/refresh", &refresh)).await;
    assert_eq!(again.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_requires_bearer_token() {
    let app = app();
    let (access, _) = register(&app, "alice@example.com").await;

    let ok = send(&app, with_bearer("GET", "/api/auth/me", &access)).await;
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(body_json(ok).await["data"]["email"], "alice@example.com");

    let missing = send(
        &app,
        Request::builder().uri("/api/auth/me").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let forged = send(&app, with_bearer("GET", "/api/auth/me", "forged.token.value")).await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn google_flow_links_and_state_is_single_use() {
    let app = app();
    register(&app, "alice@example.com").await;

    let start = send(
        &app,
        Request::builder().uri("/api/auth/google").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(start.status(), StatusCode::SEE_OTHER);
    let location = start.headers()[header::LOCATION].to_str().unwrap().to_string();
    let state = location.split("state=").nth(1).unwrap().to_string();

    let callback_uri = format!("/api/auth/google/callback?code=good-code&state={state}");
    let callback = send(
        &app,
        Request::builder().uri(&callback_uri).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(callback.status(), StatusCode::SEE_OTHER);
    let target = callback.headers()[header::LOCATION].to_str().unwrap();
    assert!(target.starts_with("http://localhost:5173/auth/callback#token="));
    assert!(!refresh_value(&set_cookie(&callback)).is_empty());
    assert_eq!(app.store.user_count(), 1);

    let replay = send(
        &app,
        Request::builder().uri(&callback_uri).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(replay).await["error"]["code"], "E1015");
}

#[tokio::test]
async fn admin_routes_check_stored_role() {
    let app = app();
    let (admin_token, _) = register(&app, "admin@example.com").await;
    let (_, _) = register(&app, "eve@example.com").await;

    let denied = send(&app, with_bearer("GET", "/api/admin/users", &admin_token)).await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    // Promotion takes effect without a new token.
    let page = app.store.list(Default::default()).await.unwrap();
    let admin = page.items.iter().find(|u| u.email == "admin@example.com").unwrap();
    app.store.set_role(admin.id, UserRole::Admin).await.unwrap();

    let listed = send(&app, with_bearer("GET", "/api/admin/users?page=1&limit=10", &admin_token)).await;
    assert_eq!(listed.status(), StatusCode::OK);
    let body = body_json(listed).await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["limit"], 10);
}

#[tokio::test]
async fn health_reports_service() {
    let app = app();
    let response = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "microsight-auth");
}
