//! Session facade: the operations the HTTP layer calls.
//!
//! Every successful sign-in returns the user, a bearer access token, and a
//! raw refresh secret with its expiry. The caller delivers the secret only
//! as an HttpOnly cookie.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use microsight_shared::access_token::AccessTokenKeys;
use microsight_shared::types::auth::{Claims, UserRole};
use microsight_shared::types::pagination::{Page, PageRequest};

use super::oauth::{AuthorizationRequest, IdentityProvider, OAuthFlow, OAuthStage};
use super::password::PasswordHasher;
use super::refresh_ledger::{RefreshSecret, RefreshTokenLedger};
use crate::config::AuthSettings;
use crate::error::{AuthError, AuthResult};
use crate::models::{ClientMeta, NewUser, User};
use crate::store::{CredentialStore, RefreshTokenStore, StateStore};

#[derive(Deserialize, Validate)]
pub struct RegisterInput {
    #[validate(email(message = "invalid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 72, message = "password must be between 8 and 72 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 50, message = "display name must be between 1 and 50 characters"))]
    pub display_name: Option<String>,
}

#[derive(Debug)]
pub struct AuthSession {
    pub user: User,
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_secret: RefreshSecret,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct OAuthSession {
    pub session: AuthSession,
    pub is_new_user: bool,
}

/// Backing stores for the auth core.
pub struct AuthStores {
    pub credentials: Arc<dyn CredentialStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub states: Arc<dyn StateStore>,
}

pub struct SessionService {
    credentials: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    ledger: RefreshTokenLedger,
    access_tokens: AccessTokenKeys,
    oauth: OAuthFlow,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validation_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "invalid input".to_string())
}

impl SessionService {
    pub fn new(
        settings: &AuthSettings,
        stores: AuthStores,
        hasher: Arc<dyn PasswordHasher>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        let access_tokens = AccessTokenKeys::new(
            settings.jwt_secret.as_bytes(),
            settings.jwt_issuer.clone(),
            settings.access_token_ttl_secs,
        );
        let ledger = RefreshTokenLedger::new(stores.refresh_tokens, settings.refresh_token_ttl);
        let oauth = OAuthFlow::new(provider, stores.states, stores.credentials.clone(), settings.oauth_state_ttl);

        Self {
            credentials: stores.credentials,
            hasher,
            ledger,
            access_tokens,
            oauth,
        }
    }

    pub fn access_tokens(&self) -> &AccessTokenKeys {
        &self.access_tokens
    }

    async fn start_session(&self, user: User, meta: &ClientMeta) -> AuthResult<AuthSession> {
        let access_token = self.issue_access_token(&user)?;
        let refresh = self.ledger.issue_new_family(user.id, meta).await?;
        Ok(AuthSession {
            user,
            access_token,
            expires_in: self.access_tokens.ttl_secs(),
            refresh_secret: refresh.secret,
            refresh_expires_at: refresh.record.expires_at,
        })
    }

    fn issue_access_token(&self, user: &User) -> AuthResult<String> {
        self.access_tokens.issue(user.id, user.role).map_err(|e| {
            tracing::error!(user_id = %user.id, error = %e, "access token signing failed");
            AuthError::Unavailable("access token signing failed".into())
        })
    }

    pub async fn register(&self, mut input: RegisterInput, meta: &ClientMeta) -> AuthResult<AuthSession> {
        input.email = normalize_email(&input.email);
        input.display_name = input
            .display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        input
            .validate()
            .map_err(|e| AuthError::Validation(validation_message(&e)))?;

        let display_name = input
            .display_name
            .unwrap_or_else(|| input.email.split('@').next().unwrap_or_default().to_string());
        let password_hash = self.hasher.hash(&input.password).await?;

        let user = match self
            .credentials
            .create(NewUser::local(input.email, password_hash, display_name))
            .await
        {
            Ok(user) => user,
            Err(err) => {
                let err = AuthError::from(err);
                if matches!(err, AuthError::Conflict) {
                    tracing::info!("registration with an existing email");
                }
                return Err(err);
            }
        };

        tracing::info!(user_id = %user.id, "user registered");
        self.start_session(user, meta).await
    }

    /// One password verification per call, whether or not the email exists.
    pub async fn login(&self, email: &str, password: &str, meta: &ClientMeta) -> AuthResult<AuthSession> {
        let email = normalize_email(email);
        let user = self.credentials.find_by_email(&email).await?;
        let stored = user.as_ref().and_then(|u| u.password_hash.as_deref());
        let verified = self.hasher.verify(password, stored).await?;

        let user = match user {
            Some(user) if verified => user,
            _ => {
                metrics::counter!("auth_logins_total", "outcome" => "failure").increment(1);
                tracing::debug!("password login rejected");
                return Err(AuthError::InvalidCredentials);
            }
        };

        metrics::counter!("auth_logins_total", "outcome" => "success").increment(1);
        tracing::info!(user_id = %user.id, "user logged in");
        self.start_session(user, meta).await
    }

    pub async fn refresh(&self, raw_secret: &str, meta: &ClientMeta) -> AuthResult<AuthSession> {
        let rotation = self.ledger.rotate(raw_secret, meta).await?;
        let access_token = self.issue_access_token(&rotation.user)?;
        Ok(AuthSession {
            user: rotation.user,
            access_token,
            expires_in: self.access_tokens.ttl_secs(),
            refresh_secret: rotation.secret,
            refresh_expires_at: rotation.record.expires_at,
        })
    }

    pub async fn logout(&self, raw_secret: &str) -> AuthResult<()> {
        self.ledger.revoke(raw_secret).await
    }

    pub fn verify_access_token(&self, token: &str) -> AuthResult<Claims> {
        self.access_tokens
            .verify(token)
            .map_err(|_| AuthError::Unauthenticated)
    }

    pub async fn revoke_family(&self, family_id: Uuid) -> AuthResult<u64> {
        self.ledger.revoke_family(family_id).await
    }

    pub async fn begin_google_login(&self) -> AuthResult<AuthorizationRequest> {
        self.oauth.begin().await
    }

    pub async fn complete_google_login(&self, state: &str, code: &str, meta: &ClientMeta) -> AuthResult<OAuthSession> {
        let login = match self.oauth.complete(state, code).await {
            Ok(login) => login,
            Err(err) => {
                metrics::counter!("oauth_logins_total", "outcome" => "failure").increment(1);
                return Err(err);
            }
        };

        let session = self.start_session(login.user, meta).await?;
        metrics::counter!("oauth_logins_total", "outcome" => "success").increment(1);
        tracing::info!(stage = %OAuthStage::TokensIssued, user_id = %session.user.id, "oauth login complete");
        Ok(OAuthSession { session, is_new_user: login.is_new_user })
    }

    pub async fn me(&self, user_id: Uuid) -> AuthResult<User> {
        self.credentials
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)
    }

    /// Soft-deletes the account and invalidates every refresh record it owns.
    pub async fn delete_account(&self, user_id: Uuid, current_refresh: Option<&str>) -> AuthResult<()> {
        let user = self.me(user_id).await?;
        if let Some(raw) = current_refresh {
            self.ledger.revoke(raw).await?;
        }
        self.credentials.deactivate(user.id).await?;
        self.ledger.revoke_all_for_user(user.id).await?;
        tracing::info!(user_id = %user.id, "account deleted");
        Ok(())
    }

    pub async fn mark_local_storage_migrated(&self, user_id: Uuid) -> AuthResult<User> {
        self.credentials.mark_local_storage_migrated(user_id).await?;
        self.me(user_id).await
    }

    /// Re-reads the caller's role; the role in the access token may be stale.
    pub async fn require_admin(&self, user_id: Uuid) -> AuthResult<User> {
        let user = self.me(user_id).await?;
        if user.role != UserRole::Admin {
            tracing::info!(user_id = %user_id, "admin operation refused");
            return Err(AuthError::Forbidden);
        }
        Ok(user)
    }

    pub async fn list_users(&self, actor: Uuid, page: PageRequest) -> AuthResult<Page<User>> {
        self.require_admin(actor).await?;
        Ok(self.credentials.list(page).await?)
    }

    pub async fn change_role(&self, actor: Uuid, target: Uuid, role: UserRole) -> AuthResult<()> {
        self.require_admin(actor).await?;
        if actor == target && role != UserRole::Admin {
            return Err(AuthError::Validation("admins cannot demote themselves".into()));
        }
        self.credentials.set_role(target, role).await?;
        tracing::info!(actor = %actor, target = %target, role = %role, "user role changed");
        Ok(())
    }

    pub async fn deactivate_user(&self, actor: Uuid, target: Uuid) -> AuthResult<()> {
        self.require_admin(actor).await?;
        if actor == target {
            return Err(AuthError::Validation("admins cannot deactivate themselves".into()));
        }
        self.credentials.deactivate(target).await?;
        let revoked = self.ledger.revoke_all_for_user(target).await?;
        tracing::info!(actor = %actor, target = %target, revoked, "user deactivated");
        Ok(())
    }
}
