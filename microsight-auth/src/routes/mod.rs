pub mod account;
pub mod admin;
pub mod cookies;
pub mod health;
pub mod login;
pub mod logout;
pub mod me;
pub mod oauth;
pub mod refresh;
pub mod register;

use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::{middleware, Router};
use serde::Serialize;

use microsight_shared::middleware::metrics_middleware;
use microsight_shared::types::auth::BearerToken;

use crate::models::User;
use crate::services::AuthSession;
use crate::AppState;

/// Body of every successful sign-in. The refresh secret travels only in
/// the cookie.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: User,
    #[serde(flatten)]
    pub token: BearerToken,
}

impl From<AuthSession> for SessionResponse {
    fn from(session: AuthSession) -> Self {
        Self {
            token: BearerToken::new(session.access_token, session.expires_in),
            user: session.user,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/api/auth/register", post(register::register))
        .route("/api/auth/login", post(login::login))
        .route("/api/auth/refresh", post(refresh::refresh))
        .route("/api/auth/logout", post(logout::logout))
        .route("/api/auth/google", get(oauth::google_redirect))
        .route("/api/auth/google/callback", get(oauth::google_callback))
        .route("/api/auth/me", get(me::me))
        .route("/api/users/account", delete(account::delete_account))
        .route("/api/users/local-storage-migrated", post(account::mark_local_storage_migrated))
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/users/:id/role", patch(admin::change_role))
        .route("/api/admin/users/:id", delete(admin::deactivate_user))
        .route_layer(middleware::from_fn(metrics_middleware))
        .with_state(state)
}
