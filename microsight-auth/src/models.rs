use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use microsight_shared::types::auth::{AuthProvider, UserRole};

use crate::schema::{refresh_tokens, users};

// --- Users ---

#[derive(Debug, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub auth_provider: String,
    pub is_active: bool,
    pub migrated_local_storage: bool,
    pub created_at: DateTime<Utc>,
}

/// Identity record. Serializes to the projection callers may see.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing)]
    pub google_id: Option<String>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: UserRole,
    pub auth_provider: AuthProvider,
    #[serde(skip_serializing)]
    pub is_active: bool,
    pub migrated_local_storage: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            role: row.role.parse().unwrap_or(UserRole::User),
            auth_provider: row.auth_provider.parse().unwrap_or(AuthProvider::Local),
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            google_id: row.google_id,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
            is_active: row.is_active,
            migrated_local_storage: row.migrated_local_storage,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub auth_provider: String,
}

impl NewUser {
    pub fn local(email: String, password_hash: String, display_name: String) -> Self {
        Self {
            email,
            password_hash: Some(password_hash),
            google_id: None,
            display_name,
            avatar_url: None,
            auth_provider: AuthProvider::Local.to_string(),
        }
    }

    pub fn google(identity: &ExternalIdentity) -> Self {
        Self {
            email: identity.email.clone(),
            password_hash: None,
            google_id: Some(identity.subject.clone()),
            display_name: identity.display_name.clone(),
            avatar_url: identity.avatar_url.clone(),
            auth_provider: AuthProvider::Google.to_string(),
        }
    }
}

/// Verified identity asserted by the external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub subject: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Result of matching an external identity against stored users.
#[derive(Debug, Clone)]
pub enum ResolvedUser {
    Linked(User),
    Created(User),
    /// Matched a deactivated account; nothing was changed.
    Inactive,
}

// --- Refresh Tokens ---

/// One issued refresh artifact. Only the SHA-256 of the secret is kept.
#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = refresh_tokens)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub is_valid: bool,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Advisory request metadata stored with each refresh record.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}
