use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;

use microsight_shared::types::ApiResponse;

use super::cookies::{client_meta, set_refresh_cookie};
use super::SessionResponse;
use crate::error::AuthResult;
use crate::services::RegisterInput;
use crate::AppState;

pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<RegisterInput>,
) -> AuthResult<(StatusCode, CookieJar, Json<ApiResponse<SessionResponse>>)> {
    let session = state.sessions.register(req, &client_meta(&headers)).await?;
    let jar = set_refresh_cookie(
        jar,
        &session.refresh_secret,
        session.refresh_expires_at,
        state.http.cookie_secure,
    );
    Ok((StatusCode::CREATED, jar, Json(ApiResponse::ok(session.into()))))
}
