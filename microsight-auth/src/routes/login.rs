use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use microsight_shared::types::ApiResponse;

use super::cookies::{client_meta, set_refresh_cookie};
use super::SessionResponse;
use crate::error::AuthResult;
use crate::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> AuthResult<(CookieJar, Json<ApiResponse<SessionResponse>>)> {
    let session = state
        .sessions
        .login(&req.email, &req.password, &client_meta(&headers))
        .await?;
    let jar = set_refresh_cookie(
        jar,
        &session.refresh_secret,
        session.refresh_expires_at,
        state.http.cookie_secure,
    );
    Ok((jar, Json(ApiResponse::ok(session.into()))))
}
