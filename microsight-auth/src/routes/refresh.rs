use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;

use microsight_shared::types::ApiResponse;

use super::cookies::{clear_refresh_cookie, client_meta, refresh_secret, set_refresh_cookie};
use super::SessionResponse;
use crate::error::AuthError;
use crate::AppState;

/// Rotates the refresh cookie. Any failure also clears it; the client has
/// to sign in again.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<SessionResponse>>), (CookieJar, AuthError)> {
    let Some(raw) = refresh_secret(&jar) else {
        return Err((clear_refresh_cookie(jar), AuthError::InvalidToken));
    };

    match state.sessions.refresh(&raw, &client_meta(&headers)).await {
        Ok(session) => {
            let jar = set_refresh_cookie(
                jar,
                &session.refresh_secret,
                session.refresh_expires_at,
                state.http.cookie_secure,
            );
            Ok((jar, Json(ApiResponse::ok(session.into()))))
        }
        Err(err) => Err((clear_refresh_cookie(jar), err)),
    }
}
