use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;

use microsight_shared::types::ApiResponse;

use super::cookies::{clear_refresh_cookie, refresh_secret};
use crate::error::AuthResult;
use crate::AppState;

pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> AuthResult<(CookieJar, Json<ApiResponse<&'static str>>)> {
    if let Some(raw) = refresh_secret(&jar) {
        state.sessions.logout(&raw).await?;
    }
    Ok((clear_refresh_cookie(jar), Json(ApiResponse::ok("logged out"))))
}
