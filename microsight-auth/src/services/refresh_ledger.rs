//! Refresh-token ledger: minting, single-use rotation, and replay response.
//!
//! Every token descends from one login event and shares that event's family
//! id. Presenting a token that is no longer valid means a copy of it exists
//! somewhere else, so the whole family is invalidated and the caller must
//! sign in again. A client retrying a rotation whose response it never
//! received lands in the same branch; there is no grace window.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::models::{ClientMeta, NewRefreshToken, RefreshTokenRecord, User};
use crate::store::{RefreshTokenStore, RotationOutcome, Successor};

/// Refresh token lifetime: 7 days.
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

/// 256 bits of entropy per secret.
const SECRET_BYTES: usize = 32;

/// Raw refresh secret. Lives only in memory and in the one response that
/// delivers it; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshSecret(String);

impl RefreshSecret {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> String {
        hash_secret(&self.0)
    }
}

impl fmt::Debug for RefreshSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshSecret(<redacted>)")
    }
}

pub fn generate_secret() -> RefreshSecret {
    let mut rng = rand::thread_rng();
    let bytes: [u8; SECRET_BYTES] = rng.gen();
    RefreshSecret(hex::encode(bytes))
}

pub fn hash_secret(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Decision for a presented, existing record. Stores evaluate this inside
/// the same atomic unit that applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Reuse,
    Expired,
    OwnerInactive,
    Rotate,
}

pub fn assess(record: &RefreshTokenRecord, owner_active: bool, now: DateTime<Utc>) -> Verdict {
    if !record.is_valid {
        Verdict::Reuse
    } else if record.expires_at <= now {
        Verdict::Expired
    } else if !owner_active {
        Verdict::OwnerInactive
    } else {
        Verdict::Rotate
    }
}

#[derive(Debug)]
pub struct IssuedRefreshToken {
    pub secret: RefreshSecret,
    pub record: RefreshTokenRecord,
}

#[derive(Debug)]
pub struct Rotation {
    pub secret: RefreshSecret,
    pub record: RefreshTokenRecord,
    pub user: User,
}

pub struct RefreshTokenLedger {
    store: Arc<dyn RefreshTokenStore>,
    ttl: chrono::Duration,
}

impl RefreshTokenLedger {
    pub fn new(store: Arc<dyn RefreshTokenStore>, ttl: chrono::Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn issue(&self, user_id: Uuid, family_id: Uuid, meta: &ClientMeta) -> AuthResult<IssuedRefreshToken> {
        let secret = generate_secret();
        let record = self
            .store
            .insert(NewRefreshToken {
                user_id,
                token_hash: secret.hash(),
                family_id,
                expires_at: Utc::now() + self.ttl,
                user_agent: meta.user_agent.clone(),
                ip_address: meta.ip_address.clone(),
            })
            .await?;

        tracing::debug!(user_id = %user_id, family_id = %family_id, token_id = %record.id, "refresh token issued");
        Ok(IssuedRefreshToken { secret, record })
    }

    /// Starts a new family for a fresh login event.
    pub async fn issue_new_family(&self, user_id: Uuid, meta: &ClientMeta) -> AuthResult<IssuedRefreshToken> {
        self.issue(user_id, Uuid::new_v4(), meta).await
    }

    pub async fn rotate(&self, raw: &str, meta: &ClientMeta) -> AuthResult<Rotation> {
        if raw.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let now = Utc::now();
        let next = generate_secret();
        let successor = Successor {
            token_hash: next.hash(),
            expires_at: now + self.ttl,
            user_agent: meta.user_agent.clone(),
            ip_address: meta.ip_address.clone(),
        };

        match self.store.rotate(&hash_secret(raw), successor, now).await? {
            RotationOutcome::Unknown => {
                tracing::debug!("unknown refresh token presented");
                Err(AuthError::InvalidToken)
            }
            RotationOutcome::Reused { family_id, user_id, revoked } => {
                metrics::counter!("refresh_reuse_detected_total").increment(1);
                tracing::error!(
                    user_id = %user_id,
                    family_id = %family_id,
                    revoked,
                    ip = meta.ip_address.as_deref().unwrap_or("-"),
                    "refresh token reuse detected, family revoked"
                );
                Err(AuthError::ReuseDetected)
            }
            RotationOutcome::Expired { token_id, user_id } => {
                tracing::info!(user_id = %user_id, token_id = %token_id, "expired refresh token presented");
                Err(AuthError::Expired)
            }
            RotationOutcome::OwnerInactive { token_id, user_id } => {
                tracing::info!(user_id = %user_id, token_id = %token_id, "refresh token of inactive user presented");
                Err(AuthError::InvalidToken)
            }
            RotationOutcome::Rotated { consumed, issued, owner } => {
                metrics::counter!("refresh_rotations_total").increment(1);
                tracing::debug!(
                    user_id = %owner.id,
                    family_id = %issued.family_id,
                    consumed = %consumed.id,
                    issued = %issued.id,
                    "refresh token rotated"
                );
                Ok(Rotation { secret: next, record: issued, user: owner })
            }
        }
    }

    /// Idempotent; unknown or already-invalid tokens are ignored.
    pub async fn revoke(&self, raw: &str) -> AuthResult<()> {
        if raw.is_empty() {
            return Ok(());
        }
        if self.store.invalidate_by_hash(&hash_secret(raw)).await? {
            tracing::debug!("refresh token revoked");
        }
        Ok(())
    }

    pub async fn revoke_family(&self, family_id: Uuid) -> AuthResult<u64> {
        let revoked = self.store.invalidate_family(family_id).await?;
        tracing::info!(family_id = %family_id, revoked, "refresh token family revoked");
        Ok(revoked)
    }

    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> AuthResult<u64> {
        let revoked = self.store.invalidate_for_user(user_id).await?;
        tracing::info!(user_id = %user_id, revoked, "all refresh tokens of user revoked");
        Ok(revoked)
    }
}
