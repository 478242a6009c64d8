//! In-process stores for tests and local development.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use microsight_shared::types::auth::{AuthProvider, UserRole};
use microsight_shared::types::pagination::{Page, PageRequest};

use super::{CredentialStore, RefreshTokenStore, RotationOutcome, StateStore, StoreError, Successor};
use crate::models::{ExternalIdentity, NewRefreshToken, NewUser, RefreshTokenRecord, ResolvedUser, User};
use crate::services::refresh_ledger::{assess, Verdict};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    tokens: Vec<RefreshTokenRecord>,
    preference_rows: HashSet<Uuid>,
    stat_rows: HashSet<Uuid>,
}

impl Tables {
    fn user_mut(&mut self, id: Uuid) -> Result<&mut User, StoreError> {
        self.users.iter_mut().find(|u| u.id == id).ok_or(StoreError::NotFound)
    }

    fn insert_user(&mut self, new_user: NewUser) -> Result<User, StoreError> {
        if self.users.iter().any(|u| u.email == new_user.email) {
            return Err(StoreError::Conflict);
        }
        if let Some(subject) = &new_user.google_id {
            if self.users.iter().any(|u| u.google_id.as_ref() == Some(subject)) {
                return Err(StoreError::Conflict);
            }
        }

        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            password_hash: new_user.password_hash,
            google_id: new_user.google_id,
            display_name: new_user.display_name,
            avatar_url: new_user.avatar_url,
            role: UserRole::User,
            auth_provider: new_user.auth_provider.parse().unwrap_or(AuthProvider::Local),
            is_active: true,
            migrated_local_storage: false,
            created_at: Utc::now(),
        };
        self.preference_rows.insert(user.id);
        self.stat_rows.insert(user.id);
        self.users.push(user.clone());
        Ok(user)
    }

    fn insert_token(&mut self, token: NewRefreshToken, now: DateTime<Utc>) -> Result<RefreshTokenRecord, StoreError> {
        if self.tokens.iter().any(|t| t.token_hash == token.token_hash) {
            return Err(StoreError::Conflict);
        }
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            family_id: token.family_id,
            is_valid: true,
            expires_at: token.expires_at,
            last_used_at: None,
            user_agent: token.user_agent,
            ip_address: token.ip_address,
            created_at: now,
        };
        self.tokens.push(record.clone());
        Ok(record)
    }

    fn invalidate_where(&mut self, pred: impl Fn(&RefreshTokenRecord) -> bool) -> u64 {
        let mut flipped = 0;
        for token in self.tokens.iter_mut().filter(|t| t.is_valid && pred(t)) {
            token.is_valid = false;
            flipped += 1;
        }
        flipped
    }
}

/// Credential and refresh-token tables behind one mutex. Every trait call
/// holds the lock for its whole read-modify-write.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    /// Snapshot of every refresh record, valid or not.
    pub fn refresh_records(&self) -> Vec<RefreshTokenRecord> {
        self.lock().map(|t| t.tokens.clone()).unwrap_or_default()
    }

    pub fn refresh_record(&self, id: Uuid) -> Option<RefreshTokenRecord> {
        self.lock().ok()?.tokens.iter().find(|t| t.id == id).cloned()
    }

    /// Looks a user up regardless of the active flag.
    pub fn user_record(&self, id: Uuid) -> Option<User> {
        self.lock().ok()?.users.iter().find(|u| u.id == id).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.lock().map(|t| t.users.len()).unwrap_or_default()
    }

    pub fn has_default_rows(&self, user_id: Uuid) -> bool {
        self.lock()
            .map(|t| t.preference_rows.contains(&user_id) && t.stat_rows.contains(&user_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.users.iter().find(|u| u.email == email && u.is_active).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.users.iter().find(|u| u.id == id && u.is_active).cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        self.lock()?.insert_user(new_user)
    }

    async fn link_external_identity(
        &self,
        user_id: Uuid,
        subject: &str,
        avatar_url: Option<&str>,
    ) -> Result<User, StoreError> {
        let mut tables = self.lock()?;
        if tables
            .users
            .iter()
            .any(|u| u.id != user_id && u.google_id.as_deref() == Some(subject))
        {
            return Err(StoreError::Conflict);
        }
        let user = tables.user_mut(user_id)?;
        user.google_id = Some(subject.to_string());
        if let Some(avatar) = avatar_url {
            user.avatar_url = Some(avatar.to_string());
        }
        user.auth_provider = user.auth_provider.after_google_link();
        Ok(user.clone())
    }

    async fn resolve_external_identity(&self, identity: &ExternalIdentity) -> Result<ResolvedUser, StoreError> {
        let mut tables = self.lock()?;

        let matched = tables
            .users
            .iter()
            .position(|u| u.google_id.as_deref() == Some(identity.subject.as_str()))
            .or_else(|| tables.users.iter().position(|u| u.email == identity.email));

        let Some(index) = matched else {
            let created = tables.insert_user(NewUser::google(identity))?;
            return Ok(ResolvedUser::Created(created));
        };

        let user = &mut tables.users[index];
        if !user.is_active {
            return Ok(ResolvedUser::Inactive);
        }
        user.google_id = Some(identity.subject.clone());
        if identity.avatar_url.is_some() {
            user.avatar_url = identity.avatar_url.clone();
        }
        user.auth_provider = user.auth_provider.after_google_link();
        Ok(ResolvedUser::Linked(user.clone()))
    }

    async fn set_role(&self, id: Uuid, role: UserRole) -> Result<(), StoreError> {
        self.lock()?.user_mut(id)?.role = role;
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), StoreError> {
        self.lock()?.user_mut(id)?.is_active = false;
        Ok(())
    }

    async fn mark_local_storage_migrated(&self, id: Uuid) -> Result<(), StoreError> {
        self.lock()?.user_mut(id)?.migrated_local_storage = true;
        Ok(())
    }

    async fn list(&self, page: PageRequest) -> Result<Page<User>, StoreError> {
        let tables = self.lock()?;
        let mut users = tables.users.clone();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = users.len() as u64;
        let items = users
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok(Page::new(items, total, &page))
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, StoreError> {
        self.lock()?.insert_token(token, Utc::now())
    }

    async fn rotate(
        &self,
        token_hash: &str,
        successor: Successor,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, StoreError> {
        let mut tables = self.lock()?;

        let Some(index) = tables.tokens.iter().position(|t| t.token_hash == token_hash) else {
            return Ok(RotationOutcome::Unknown);
        };
        let record = tables.tokens[index].clone();
        let owner = tables
            .users
            .iter()
            .find(|u| u.id == record.user_id && u.is_active)
            .cloned();

        match assess(&record, owner.is_some(), now) {
            Verdict::Reuse => {
                let revoked = tables.invalidate_where(|t| t.family_id == record.family_id);
                Ok(RotationOutcome::Reused {
                    family_id: record.family_id,
                    user_id: record.user_id,
                    revoked,
                })
            }
            Verdict::Expired => {
                tables.tokens[index].is_valid = false;
                Ok(RotationOutcome::Expired { token_id: record.id, user_id: record.user_id })
            }
            Verdict::OwnerInactive => {
                tables.tokens[index].is_valid = false;
                Ok(RotationOutcome::OwnerInactive { token_id: record.id, user_id: record.user_id })
            }
            Verdict::Rotate => {
                let Some(owner) = owner else {
                    return Err(StoreError::Backend("rotation owner vanished".into()));
                };
                {
                    let consumed = &mut tables.tokens[index];
                    consumed.is_valid = false;
                    consumed.last_used_at = Some(now);
                }
                let consumed = tables.tokens[index].clone();
                let issued = tables.insert_token(
                    NewRefreshToken {
                        user_id: record.user_id,
                        token_hash: successor.token_hash,
                        family_id: record.family_id,
                        expires_at: successor.expires_at,
                        user_agent: successor.user_agent,
                        ip_address: successor.ip_address,
                    },
                    now,
                )?;
                Ok(RotationOutcome::Rotated { consumed, issued, owner })
            }
        }
    }

    async fn invalidate_by_hash(&self, token_hash: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.invalidate_where(|t| t.token_hash == token_hash) > 0)
    }

    async fn invalidate_family(&self, family_id: Uuid) -> Result<u64, StoreError> {
        Ok(self.lock()?.invalidate_where(|t| t.family_id == family_id))
    }

    async fn invalidate_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        Ok(self.lock()?.invalidate_where(|t| t.user_id == user_id))
    }
}

/// OAuth state values keyed to their expiry instant.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, Instant>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        self.entries.retain(|_, expires| *expires > now);
        self.entries.insert(key.to_string(), now + ttl);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, expires)| expires > Instant::now()))
    }
}
