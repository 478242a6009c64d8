use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;

use microsight_shared::types::auth::AuthUser;
use microsight_shared::types::ApiResponse;

use super::cookies::{clear_refresh_cookie, refresh_secret};
use crate::error::AuthResult;
use crate::models::User;
use crate::AppState;

pub async fn delete_account(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> AuthResult<(CookieJar, Json<ApiResponse<&'static str>>)> {
    let current = refresh_secret(&jar);
    state.sessions.delete_account(user.id, current.as_deref()).await?;
    Ok((clear_refresh_cookie(jar), Json(ApiResponse::ok("account deleted"))))
}

pub async fn mark_local_storage_migrated(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AuthResult<Json<ApiResponse<User>>> {
    let user = state.sessions.mark_local_storage_migrated(user.id).await?;
    Ok(Json(ApiResponse::ok(user)))
}
