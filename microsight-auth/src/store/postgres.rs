//! Postgres-backed credential and refresh-token stores.
//!
//! Diesel is synchronous; every call checks out a pooled connection on the
//! blocking pool and is bounded by the configured store timeout.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use uuid::Uuid;

use microsight_shared::clients::db::DbPool;
use microsight_shared::types::auth::{AuthProvider, UserRole};
use microsight_shared::types::pagination::{Page, PageRequest};

use super::{CredentialStore, RefreshTokenStore, RotationOutcome, StoreError, Successor};
use crate::models::{
    ExternalIdentity, NewRefreshToken, NewUser, RefreshTokenRecord, ResolvedUser, User, UserRow,
};
use crate::schema::{all_time_stats, refresh_tokens, user_preferences, users};
use crate::services::refresh_ledger::{assess, Verdict};

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => StoreError::NotFound,
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => StoreError::Conflict,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    timeout: Duration,
}

impl PgStore {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Runs `f` with a pooled connection off the async runtime.
    async fn interact<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Backend(format!("pool: {e}")))?;
            f(&mut conn)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Backend(format!("{op} task failed: {join}"))),
            Err(_) => Err(StoreError::Timeout(op)),
        }
    }
}

fn insert_user_with_defaults(conn: &mut PgConnection, new_user: &NewUser) -> Result<User, DieselError> {
    let row: UserRow = diesel::insert_into(users::table)
        .values(new_user)
        .get_result(conn)?;

    diesel::insert_into(user_preferences::table)
        .values(user_preferences::user_id.eq(row.id))
        .execute(conn)?;
    diesel::insert_into(all_time_stats::table)
        .values(all_time_stats::user_id.eq(row.id))
        .execute(conn)?;

    Ok(row.into())
}

fn link_identity(
    conn: &mut PgConnection,
    user_id: Uuid,
    current: AuthProvider,
    subject: &str,
    avatar_url: Option<&str>,
) -> Result<User, DieselError> {
    let provider = current.after_google_link().to_string();
    let target = users::table.find(user_id);

    let row: UserRow = match avatar_url {
        Some(avatar) => diesel::update(target)
            .set((
                users::google_id.eq(subject),
                users::avatar_url.eq(avatar),
                users::auth_provider.eq(provider),
            ))
            .get_result(conn)?,
        None => diesel::update(target)
            .set((users::google_id.eq(subject), users::auth_provider.eq(provider)))
            .get_result(conn)?,
    };
    Ok(row.into())
}

fn invalidate(conn: &mut PgConnection, family_id: Uuid) -> Result<u64, DieselError> {
    let flipped = diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::family_id.eq(family_id))
            .filter(refresh_tokens::is_valid.eq(true)),
    )
    .set(refresh_tokens::is_valid.eq(false))
    .execute(conn)?;
    Ok(flipped as u64)
}

fn rotate_in_tx(
    conn: &mut PgConnection,
    token_hash: &str,
    successor: Successor,
    now: DateTime<Utc>,
) -> Result<RotationOutcome, StoreError> {
    let record: Option<RefreshTokenRecord> = refresh_tokens::table
        .filter(refresh_tokens::token_hash.eq(token_hash))
        .for_update()
        .first(conn)
        .optional()?;
    let Some(record) = record else {
        return Ok(RotationOutcome::Unknown);
    };

    let owner: Option<User> = users::table
        .find(record.user_id)
        .filter(users::is_active.eq(true))
        .first::<UserRow>(conn)
        .optional()?
        .map(User::from);

    let verdict = assess(&record, owner.is_some(), now);
    let consume = |conn: &mut PgConnection, last_used: Option<DateTime<Utc>>| {
        diesel::update(
            refresh_tokens::table
                .find(record.id)
                .filter(refresh_tokens::is_valid.eq(true)),
        )
        .set((
            refresh_tokens::is_valid.eq(false),
            refresh_tokens::last_used_at.eq(last_used),
        ))
        .execute(conn)
    };

    match (verdict, owner) {
        (Verdict::Reuse, _) => Ok(RotationOutcome::Reused {
            family_id: record.family_id,
            user_id: record.user_id,
            revoked: invalidate(conn, record.family_id)?,
        }),
        (Verdict::Expired, _) => {
            consume(conn, record.last_used_at)?;
            Ok(RotationOutcome::Expired { token_id: record.id, user_id: record.user_id })
        }
        (Verdict::OwnerInactive, _) | (Verdict::Rotate, None) => {
            consume(conn, record.last_used_at)?;
            Ok(RotationOutcome::OwnerInactive { token_id: record.id, user_id: record.user_id })
        }
        (Verdict::Rotate, Some(owner)) => {
            // The row lock makes a lost race impossible here, but a zero
            // count is still treated as a replay.
            if consume(conn, Some(now))? == 0 {
                return Ok(RotationOutcome::Reused {
                    family_id: record.family_id,
                    user_id: record.user_id,
                    revoked: invalidate(conn, record.family_id)?,
                });
            }
            let consumed: RefreshTokenRecord = refresh_tokens::table.find(record.id).first(conn)?;
            let issued: RefreshTokenRecord = diesel::insert_into(refresh_tokens::table)
                .values(NewRefreshToken {
                    user_id: record.user_id,
                    token_hash: successor.token_hash,
                    family_id: record.family_id,
                    expires_at: successor.expires_at,
                    user_agent: successor.user_agent,
                    ip_address: successor.ip_address,
                })
                .get_result(conn)?;
            Ok(RotationOutcome::Rotated { consumed, issued, owner })
        }
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.to_string();
        self.interact("find_by_email", move |conn| {
            let row = users::table
                .filter(users::email.eq(&email))
                .filter(users::is_active.eq(true))
                .first::<UserRow>(conn)
                .optional()?;
            Ok(row.map(User::from))
        })
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.interact("find_by_id", move |conn| {
            let row = users::table
                .find(id)
                .filter(users::is_active.eq(true))
                .first::<UserRow>(conn)
                .optional()?;
            Ok(row.map(User::from))
        })
        .await
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        self.interact("create_user", move |conn| {
            conn.transaction(|conn| insert_user_with_defaults(conn, &new_user))
                .map_err(StoreError::from)
        })
        .await
    }

    async fn link_external_identity(
        &self,
        user_id: Uuid,
        subject: &str,
        avatar_url: Option<&str>,
    ) -> Result<User, StoreError> {
        let subject = subject.to_string();
        let avatar_url = avatar_url.map(str::to_string);
        self.interact("link_external_identity", move |conn| {
            conn.transaction(|conn| {
                let current: UserRow = users::table.find(user_id).for_update().first(conn)?;
                let current = User::from(current).auth_provider;
                link_identity(conn, user_id, current, &subject, avatar_url.as_deref())
            })
            .map_err(StoreError::from)
        })
        .await
    }

    async fn resolve_external_identity(&self, identity: &ExternalIdentity) -> Result<ResolvedUser, StoreError> {
        let identity = identity.clone();
        self.interact("resolve_external_identity", move |conn| {
            conn.transaction(|conn| {
                let by_subject: Option<UserRow> = users::table
                    .filter(users::google_id.eq(&identity.subject))
                    .for_update()
                    .first(conn)
                    .optional()?;
                let matched = match by_subject {
                    Some(row) => Some(row),
                    None => users::table
                        .filter(users::email.eq(&identity.email))
                        .for_update()
                        .first(conn)
                        .optional()?,
                };

                let Some(row) = matched else {
                    let created = insert_user_with_defaults(conn, &NewUser::google(&identity))?;
                    return Ok(ResolvedUser::Created(created));
                };
                if !row.is_active {
                    return Ok(ResolvedUser::Inactive);
                }

                let current = User::from(row);
                let linked = link_identity(
                    conn,
                    current.id,
                    current.auth_provider,
                    &identity.subject,
                    identity.avatar_url.as_deref(),
                )?;
                Ok(ResolvedUser::Linked(linked))
            })
            .map_err(|e: DieselError| StoreError::from(e))
        })
        .await
    }

    async fn set_role(&self, id: Uuid, role: UserRole) -> Result<(), StoreError> {
        self.interact("set_role", move |conn| {
            let updated = diesel::update(users::table.find(id))
                .set(users::role.eq(role.to_string()))
                .execute(conn)?;
            if updated == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), StoreError> {
        self.interact("deactivate", move |conn| {
            let updated = diesel::update(users::table.find(id))
                .set(users::is_active.eq(false))
                .execute(conn)?;
            if updated == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn mark_local_storage_migrated(&self, id: Uuid) -> Result<(), StoreError> {
        self.interact("mark_local_storage_migrated", move |conn| {
            let updated = diesel::update(users::table.find(id))
                .set(users::migrated_local_storage.eq(true))
                .execute(conn)?;
            if updated == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn list(&self, page: PageRequest) -> Result<Page<User>, StoreError> {
        self.interact("list_users", move |conn| {
            let total: i64 = users::table.count().get_result(conn)?;
            let rows: Vec<UserRow> = users::table
                .order(users::created_at.desc())
                .offset(i64::try_from(page.offset()).unwrap_or(i64::MAX))
                .limit(page.limit() as i64)
                .load(conn)?;
            let items = rows.into_iter().map(User::from).collect();
            Ok(Page::new(items, total.max(0) as u64, &page))
        })
        .await
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn insert(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, StoreError> {
        self.interact("insert_refresh_token", move |conn| {
            let record: RefreshTokenRecord = diesel::insert_into(refresh_tokens::table)
                .values(&token)
                .get_result(conn)?;
            Ok(record)
        })
        .await
    }

    async fn rotate(
        &self,
        token_hash: &str,
        successor: Successor,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, StoreError> {
        let token_hash = token_hash.to_string();
        self.interact("rotate_refresh_token", move |conn| {
            conn.transaction(|conn| rotate_in_tx(conn, &token_hash, successor, now))
        })
        .await
    }

    async fn invalidate_by_hash(&self, token_hash: &str) -> Result<bool, StoreError> {
        let token_hash = token_hash.to_string();
        self.interact("invalidate_refresh_token", move |conn| {
            let flipped = diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::token_hash.eq(&token_hash))
                    .filter(refresh_tokens::is_valid.eq(true)),
            )
            .set(refresh_tokens::is_valid.eq(false))
            .execute(conn)?;
            Ok(flipped > 0)
        })
        .await
    }

    async fn invalidate_family(&self, family_id: Uuid) -> Result<u64, StoreError> {
        self.interact("invalidate_family", move |conn| Ok(invalidate(conn, family_id)?))
            .await
    }

    async fn invalidate_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.interact("invalidate_for_user", move |conn| {
            let flipped = diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::user_id.eq(user_id))
                    .filter(refresh_tokens::is_valid.eq(true)),
            )
            .set(refresh_tokens::is_valid.eq(false))
            .execute(conn)?;
            Ok(flipped as u64)
        })
        .await
    }
}
