use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use microsight_shared::types::auth::AuthUser;
use microsight_shared::types::ApiResponse;

use crate::error::AuthResult;
use crate::models::User;
use crate::AppState;

pub async fn me(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AuthResult<Json<ApiResponse<User>>> {
    let user = state.sessions.me(user.id).await?;
    Ok(Json(ApiResponse::ok(user)))
}
