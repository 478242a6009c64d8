//! Short-lived, stateless access tokens (HS256 JWT).
//!
//! Verification never touches a store: a token stays valid until its `exp`
//! even if the user is demoted or deactivated in the meantime.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::errors::{AppError, AppResult, ErrorCode};
use crate::types::auth::{Claims, UserRole};

/// Default `iss` claim.
pub const DEFAULT_ISSUER: &str = "microsight-api";

/// Access token lifetime: 15 minutes.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Clock skew tolerated on `exp`/`iat` when verifying.
pub const CLOCK_SKEW_LEEWAY_SECS: u64 = 30;

#[derive(Clone)]
pub struct AccessTokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl_secs: i64,
    validation: Validation,
}

impl AccessTokenKeys {
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl_secs: i64) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer,
            ttl_secs,
            validation,
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    pub fn issue(&self, user_id: Uuid, role: UserRole) -> AppResult<String> {
        let claims = Claims::new(user_id, role, self.issuer.clone(), self.ttl_secs);
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::internal(format!("JWT encoding failed: {e}")))
    }

    /// Checks signature, issuer, and expiry. Every failure is the same
    /// unauthenticated outcome to the caller.
    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => tracing::debug!("access token expired"),
                    kind => tracing::debug!(reason = ?kind, "access token rejected"),
                }
                AppError::new(ErrorCode::Unauthorized, "invalid or expired token")
            })
    }
}

/// Router state that can hand out the verifier used by the bearer extractor.
pub trait AccessTokenState {
    fn access_tokens(&self) -> &AccessTokenKeys;
}

impl<T: AccessTokenState> AccessTokenState for Arc<T> {
    fn access_tokens(&self) -> &AccessTokenKeys {
        (**self).access_tokens()
    }
}
