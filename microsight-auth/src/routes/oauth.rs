use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Redirect;
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use super::cookies::{client_meta, set_refresh_cookie};
use crate::error::{AuthError, AuthResult};
use crate::services::oauth::OAuthStage;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub async fn google_redirect(State(state): State<Arc<AppState>>) -> AuthResult<Redirect> {
    let request = state.sessions.begin_google_login().await?;
    Ok(Redirect::to(&request.url))
}

/// Completes the flow and hands the access token to the frontend in the URL
/// fragment, which never reaches a server log.
pub async fn google_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> AuthResult<(CookieJar, Redirect)> {
    if let Some(error) = params.error {
        return Err(AuthError::provider(
            OAuthStage::CallbackReceived,
            format!("provider returned error: {error}"),
        ));
    }

    let oauth = state
        .sessions
        .complete_google_login(
            params.state.as_deref().unwrap_or_default(),
            params.code.as_deref().unwrap_or_default(),
            &client_meta(&headers),
        )
        .await?;

    let session = oauth.session;
    let jar = set_refresh_cookie(
        jar,
        &session.refresh_secret,
        session.refresh_expires_at,
        state.http.cookie_secure,
    );
    let target = format!(
        "{}/auth/callback#token={}",
        state.http.frontend_url.trim_end_matches('/'),
        session.access_token
    );
    Ok((jar, Redirect::to(&target)))
}
