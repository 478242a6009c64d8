use axum::response::{IntoResponse, Response};

use microsight_shared::errors::{AppError, ErrorCode};

use crate::services::oauth::OAuthStage;
use crate::store::StoreError;

/// Failure taxonomy of the auth core. Display strings are the flat,
/// user-facing messages; causes are logged where they occur.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("email already registered")]
    Conflict,

    /// Deliberately the same for unknown email and wrong password.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("invalid refresh token")]
    InvalidToken,

    #[error("refresh token expired")]
    Expired,

    /// The presented refresh token was already consumed or revoked; its
    /// whole family has been invalidated.
    #[error("session is no longer valid, please sign in again")]
    ReuseDetected,

    #[error("invalid oauth state")]
    InvalidOAuthState,

    #[error("authentication required")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("sign-in with the identity provider failed")]
    IdentityProvider { stage: OAuthStage, message: String },

    #[error("service temporarily unavailable")]
    Unavailable(String),
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Conflict => ErrorCode::EmailAlreadyExists,
            AuthError::InvalidCredentials => ErrorCode::InvalidCredentials,
            AuthError::InvalidToken => ErrorCode::TokenInvalid,
            AuthError::Expired => ErrorCode::TokenExpired,
            AuthError::ReuseDetected => ErrorCode::RefreshTokenReused,
            AuthError::InvalidOAuthState => ErrorCode::InvalidOAuthState,
            AuthError::Unauthenticated => ErrorCode::Unauthorized,
            AuthError::Forbidden => ErrorCode::Forbidden,
            AuthError::NotFound => ErrorCode::NotFound,
            AuthError::Validation(_) => ErrorCode::ValidationError,
            AuthError::IdentityProvider { .. } => ErrorCode::OAuthError,
            AuthError::Unavailable(_) => ErrorCode::ServiceUnavailable,
        }
    }

    pub(crate) fn provider(stage: OAuthStage, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(stage = %stage, error = %message, "identity provider call failed");
        AuthError::IdentityProvider { stage, message }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AuthError::NotFound,
            StoreError::Conflict => AuthError::Conflict,
            StoreError::Timeout(op) => {
                tracing::error!(op, "store call timed out");
                AuthError::Unavailable(format!("{op} timed out"))
            }
            StoreError::Backend(message) => {
                tracing::error!(error = %message, "store call failed");
                AuthError::Unavailable(message)
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::new(err.code(), err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
