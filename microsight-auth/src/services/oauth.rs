//! OAuth authorization-code flow with account linking.
//!
//! `REQUESTED -> CALLBACK_RECEIVED -> STATE_VERIFIED -> CODE_EXCHANGED ->
//! IDENTITY_VERIFIED -> USER_RESOLVED -> TOKENS_ISSUED`
//!
//! The state is consumed before any side-effecting work, so an aborted
//! callback only forces the user to start over.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{AuthError, AuthResult};
use crate::models::{ExternalIdentity, ResolvedUser, User};
use crate::store::{CredentialStore, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthStage {
    Requested,
    CallbackReceived,
    StateVerified,
    CodeExchanged,
    IdentityVerified,
    UserResolved,
    TokensIssued,
}

impl fmt::Display for OAuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OAuthStage::Requested => "requested",
            OAuthStage::CallbackReceived => "callback_received",
            OAuthStage::StateVerified => "state_verified",
            OAuthStage::CodeExchanged => "code_exchanged",
            OAuthStage::IdentityVerified => "identity_verified",
            OAuthStage::UserResolved => "user_resolved",
            OAuthStage::TokensIssued => "tokens_issued",
        };
        f.write_str(name)
    }
}

/// External identity provider (Google in production).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn authorization_url(&self, state: &str) -> AuthResult<String>;

    /// Exchanges the code for provider tokens and returns the identity
    /// asserted by the verified ID token.
    async fn exchange_code(&self, code: &str) -> AuthResult<ExternalIdentity>;
}

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Outcome of a completed callback, before tokens are issued.
#[derive(Debug, Clone)]
pub struct OAuthLogin {
    pub user: User,
    pub is_new_user: bool,
}

pub struct OAuthFlow {
    provider: Arc<dyn IdentityProvider>,
    states: Arc<dyn StateStore>,
    credentials: Arc<dyn CredentialStore>,
    state_ttl: Duration,
}

impl OAuthFlow {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        states: Arc<dyn StateStore>,
        credentials: Arc<dyn CredentialStore>,
        state_ttl: Duration,
    ) -> Self {
        Self { provider, states, credentials, state_ttl }
    }

    pub async fn begin(&self) -> AuthResult<AuthorizationRequest> {
        let state = generate_state();
        self.states.put(&state, self.state_ttl).await?;
        let url = self.provider.authorization_url(&state)?;
        tracing::debug!(stage = %OAuthStage::Requested, "oauth authorization requested");
        Ok(AuthorizationRequest { url, state })
    }

    pub async fn complete(&self, state: &str, code: &str) -> AuthResult<OAuthLogin> {
        tracing::debug!(stage = %OAuthStage::CallbackReceived, "oauth callback received");
        if state.is_empty() {
            return Err(AuthError::InvalidOAuthState);
        }
        if !self.states.take(state).await? {
            tracing::info!("unknown or already consumed oauth state");
            return Err(AuthError::InvalidOAuthState);
        }
        tracing::debug!(stage = %OAuthStage::StateVerified, "oauth state consumed");

        if code.is_empty() {
            return Err(AuthError::provider(OAuthStage::CallbackReceived, "callback carried no code"));
        }
        let identity = self.provider.exchange_code(code).await?;
        tracing::debug!(stage = %OAuthStage::IdentityVerified, subject = %identity.subject, "provider identity verified");

        let login = match self.credentials.resolve_external_identity(&identity).await? {
            ResolvedUser::Linked(user) => OAuthLogin { user, is_new_user: false },
            ResolvedUser::Created(user) => OAuthLogin { user, is_new_user: true },
            ResolvedUser::Inactive => {
                tracing::info!(subject = %identity.subject, "oauth login matched an inactive account");
                return Err(AuthError::InvalidCredentials);
            }
        };
        tracing::info!(
            stage = %OAuthStage::UserResolved,
            user_id = %login.user.id,
            is_new_user = login.is_new_user,
            "oauth user resolved"
        );
        Ok(login)
    }
}

fn generate_state() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::models::NewUser;
    use crate::store::{MemoryStateStore, MemoryStore};

    /// Provider that hands out identities keyed by authorization code.
    pub(crate) struct ScriptedProvider {
        pub identities: Vec<(String, ExternalIdentity)>,
        pub exchanges: AtomicUsize,
    }

    impl ScriptedProvider {
        pub(crate) fn new(identities: Vec<(&str, ExternalIdentity)>) -> Self {
            Self {
                identities: identities.into_iter().map(|(c, i)| (c.to_string(), i)).collect(),
                exchanges: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        fn authorization_url(&self, state: &str) -> AuthResult<String> {
            Ok(format!("https://accounts.example.com/auth?state={state}"))
        }

        async fn exchange_code(&self, code: &str) -> AuthResult<ExternalIdentity> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            self.identities
                .iter()
                .find(|(c, _)| c == code)
                .map(|(_, identity)| identity.clone())
                .ok_or_else(|| AuthError::provider(OAuthStage::CodeExchanged, "invalid_grant"))
        }
    }

    pub(crate) fn identity(subject: &str, email: &str) -> ExternalIdentity {
        ExternalIdentity {
            subject: subject.into(),
            email: email.into(),
            display_name: "Alice".into(),
            avatar_url: Some("https://example.com/alice.png".into()),
        }
    }

    fn flow(provider: Arc<ScriptedProvider>, store: Arc<MemoryStore>) -> OAuthFlow {
        OAuthFlow::new(provider, Arc::new(MemoryStateStore::new()), store, Duration::from_secs(600))
    }

    #[tokio::test]
    async fn begin_embeds_state_in_url() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let flow = flow(provider, Arc::new(MemoryStore::new()));
        let request = flow.begin().await.unwrap();

        assert_eq!(request.state.len(), 64);
        assert!(request.url.ends_with(&format!("state={}", request.state)));
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let provider = Arc::new(ScriptedProvider::new(vec![("code-1", identity("g-1", "bob@example.com"))]));
        let flow = flow(provider.clone(), Arc::new(MemoryStore::new()));
        let request = flow.begin().await.unwrap();

        let first = flow.complete(&request.state, "code-1").await.unwrap();
        assert!(first.is_new_user);

        let second = flow.complete(&request.state, "code-1").await;
        assert!(matches!(second, Err(AuthError::InvalidOAuthState)));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forged_state_never_reaches_provider() {
        let provider = Arc::new(ScriptedProvider::new(vec![("code-1", identity("g-1", "bob@example.com"))]));
        let flow = flow(provider.clone(), Arc::new(MemoryStore::new()));

        assert!(matches!(flow.complete("forged", "code-1").await, Err(AuthError::InvalidOAuthState)));
        assert!(matches!(flow.complete("", "code-1").await, Err(AuthError::InvalidOAuthState)));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn links_existing_local_account() {
        let store = Arc::new(MemoryStore::new());
        let local = store
            .create(NewUser::local("alice@example.com".into(), "hash".into(), "alice".into()))
            .await
            .unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![("code-1", identity("g-1", "alice@example.com"))]));
        let flow = flow(provider, store.clone());

        let request = flow.begin().await.unwrap();
        let login = flow.complete(&request.state, "code-1").await.unwrap();

        assert!(!login.is_new_user);
        assert_eq!(login.user.id, local.id);
        assert!(login.user.password_hash.is_some());
        assert_eq!(login.user.google_id.as_deref(), Some("g-1"));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn provider_failure_after_state_consumption() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let store = Arc::new(MemoryStore::new());
        let flow = flow(provider, store.clone());
        let request = flow.begin().await.unwrap();

        let result = flow.complete(&request.state, "bad-code").await;
        assert!(matches!(
            result,
            Err(AuthError::IdentityProvider { stage: OAuthStage::CodeExchanged, .. })
        ));
        assert_eq!(store.user_count(), 0);
        // The state is gone; the flow must restart.
        assert!(matches!(
            flow.complete(&request.state, "bad-code").await,
            Err(AuthError::InvalidOAuthState)
        ));
    }

    #[tokio::test]
    async fn inactive_match_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create(NewUser::local("alice@example.com".into(), "hash".into(), "alice".into()))
            .await
            .unwrap();
        store.deactivate(user.id).await.unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![("code-1", identity("g-1", "alice@example.com"))]));
        let flow = flow(provider, store);

        let request = flow.begin().await.unwrap();
        assert!(matches!(
            flow.complete(&request.state, "code-1").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn stage_names() {
        assert_eq!(OAuthStage::CodeExchanged.to_string(), "code_exchanged");
        assert_eq!(OAuthStage::TokensIssued.to_string(), "tokens_issued");
    }
}
