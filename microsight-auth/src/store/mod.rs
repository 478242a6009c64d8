//! Persistence seams of the auth core.
//!
//! Security-relevant mutations are single trait calls that the backing store
//! executes atomically; callers never read and then write the same field
//! across two calls.

pub mod memory;
pub mod postgres;
pub mod redis_state;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use microsight_shared::types::auth::UserRole;
use microsight_shared::types::pagination::{Page, PageRequest};

use crate::models::{ExternalIdentity, NewRefreshToken, NewUser, RefreshTokenRecord, ResolvedUser, User};

pub use memory::{MemoryStateStore, MemoryStore};
pub use postgres::PgStore;
pub use redis_state::RedisStateStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("unique constraint violated")]
    Conflict,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Users and their credentials. Reads only see active users.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Inserts the user together with its default dependent rows.
    /// Fails with `Conflict` when the email is taken.
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;

    async fn link_external_identity(
        &self,
        user_id: Uuid,
        subject: &str,
        avatar_url: Option<&str>,
    ) -> Result<User, StoreError>;

    /// Finds a user by provider subject or email and links the identity,
    /// or creates a provider-only user with default rows. One transaction.
    async fn resolve_external_identity(&self, identity: &ExternalIdentity) -> Result<ResolvedUser, StoreError>;

    async fn set_role(&self, id: Uuid, role: UserRole) -> Result<(), StoreError>;

    async fn deactivate(&self, id: Uuid) -> Result<(), StoreError>;

    async fn mark_local_storage_migrated(&self, id: Uuid) -> Result<(), StoreError>;

    /// Newest first. Includes deactivated users.
    async fn list(&self, page: PageRequest) -> Result<Page<User>, StoreError>;
}

/// Hash and metadata of the replacement token minted during rotation.
#[derive(Debug, Clone)]
pub struct Successor {
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RotationOutcome {
    /// No record carries the presented hash.
    Unknown,
    /// The record was already invalid; every record of the family is now invalid.
    Reused { family_id: Uuid, user_id: Uuid, revoked: u64 },
    /// The record had expired; it alone was invalidated.
    Expired { token_id: Uuid, user_id: Uuid },
    /// The owning user is deactivated or gone; the record was invalidated.
    OwnerInactive { token_id: Uuid, user_id: Uuid },
    Rotated { consumed: RefreshTokenRecord, issued: RefreshTokenRecord, owner: User },
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, StoreError>;

    /// Looks up `token_hash`, applies the ledger's verdict, and on success
    /// consumes the record and inserts `successor` in the same family.
    /// The whole read-modify-write is one atomic unit keyed on the hash.
    async fn rotate(
        &self,
        token_hash: &str,
        successor: Successor,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, StoreError>;

    /// Returns whether a still-valid record was flipped.
    async fn invalidate_by_hash(&self, token_hash: &str) -> Result<bool, StoreError>;

    async fn invalidate_family(&self, family_id: Uuid) -> Result<u64, StoreError>;

    async fn invalidate_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;
}

/// Ephemeral single-use values with expiry (OAuth CSRF state).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Removes `key`; `true` only for the one caller that removed a live entry.
    async fn take(&self, key: &str) -> Result<bool, StoreError>;
}
