use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};

use crate::access_token::AccessTokenState;
use crate::errors::{AppError, ErrorCode};
use crate::types::auth::AuthUser;

/// Authenticates the `Authorization: Bearer` header against the state's
/// access-token keys. The role in the result comes from the token and must
/// not be trusted for privileged operations.
#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: AccessTokenState + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)?;
        let claims = state.access_tokens().verify(token)?;
        Ok(AuthUser::from(claims))
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "authentication required"))?
        .to_str()
        .map_err(|_| AppError::new(ErrorCode::Unauthorized, "authentication required"))?;

    auth_header
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "authentication required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_token::{AccessTokenKeys, ACCESS_TOKEN_TTL_SECS, DEFAULT_ISSUER};
    use crate::types::auth::UserRole;
    use axum::http::Request;
    use uuid::Uuid;

    struct TestState(AccessTokenKeys);

    impl AccessTokenState for TestState {
        fn access_tokens(&self) -> &AccessTokenKeys {
            &self.0
        }
    }

    fn state() -> TestState {
        TestState(AccessTokenKeys::new(b"extractor-secret", DEFAULT_ISSUER, ACCESS_TOKEN_TTL_SECS))
    }

    fn parts_with(auth: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/auth/me");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn accepts_valid_bearer() {
        let state = state();
        let user_id = Uuid::new_v4();
        let token = state.0.issue(user_id, UserRole::User).unwrap();
        let mut parts = parts_with(Some(&format!("Bearer {token}")));

        let user = AuthUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.role, UserRole::User);
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let mut parts = parts_with(None);
        let err = AuthUser::from_request_parts(&mut parts, &state()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn rejects_non_bearer_scheme() {
        let mut parts = parts_with(Some("Basic dXNlcjpwYXNz"));
        assert!(AuthUser::from_request_parts(&mut parts, &state()).await.is_err());

        let mut parts = parts_with(Some("Bearer "));
        assert!(AuthUser::from_request_parts(&mut parts, &state()).await.is_err());
    }
}
