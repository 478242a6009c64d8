//! Administrative user management. The caller's role is re-read from the
//! credential store on every call; the role claim in the token is ignored.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use microsight_shared::types::auth::{AuthUser, UserRole};
use microsight_shared::types::pagination::{Page, PageRequest};
use microsight_shared::types::ApiResponse;

use crate::error::AuthResult;
use crate::models::User;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: UserRole,
}

pub async fn list_users(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageRequest>,
) -> AuthResult<Json<ApiResponse<Page<User>>>> {
    let page = state.sessions.list_users(user.id, page).await?;
    Ok(Json(ApiResponse::ok(page)))
}

pub async fn change_role(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(target): Path<Uuid>,
    Json(req): Json<ChangeRoleRequest>,
) -> AuthResult<Json<ApiResponse<&'static str>>> {
    state.sessions.change_role(user.id, target, req.role).await?;
    Ok(Json(ApiResponse::ok("role updated")))
}

pub async fn deactivate_user(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(target): Path<Uuid>,
) -> AuthResult<Json<ApiResponse<&'static str>>> {
    state.sessions.deactivate_user(user.id, target).await?;
    Ok(Json(ApiResponse::ok("user deactivated")))
}
