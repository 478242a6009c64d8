use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::oauth::{IdentityProvider, OAuthStage};
use crate::config::GoogleSettings;
use crate::error::{AuthError, AuthResult};
use crate::models::ExternalIdentity;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
const JWKS_TTL: Duration = Duration::from_secs(3600);
/// Width of `users.display_name`.
const MAX_DISPLAY_NAME: usize = 100;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Text(s) => s.eq_ignore_ascii_case("true"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleIdClaims {
    sub: String,
    email: Option<String>,
    email_verified: Option<Flag>,
    name: Option<String>,
    picture: Option<String>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Google OpenID Connect provider. ID tokens are verified against Google's
/// published signing keys, which are cached for an hour.
pub struct GoogleIdentityProvider {
    http: reqwest::Client,
    settings: GoogleSettings,
    jwks: RwLock<Option<CachedJwks>>,
}

impl GoogleIdentityProvider {
    pub fn new(settings: GoogleSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { http, settings, jwks: RwLock::new(None) })
    }

    async fn signing_keys(&self, force: bool) -> AuthResult<JwkSet> {
        if !force {
            if let Some(cached) = self.jwks.read().await.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_TTL {
                    return Ok(cached.keys.clone());
                }
            }
        }

        let keys: JwkSet = self
            .http
            .get(JWKS_URL)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::provider(OAuthStage::IdentityVerified, format!("jwks fetch: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::provider(OAuthStage::IdentityVerified, format!("jwks decode: {e}")))?;

        *self.jwks.write().await = Some(CachedJwks { keys: keys.clone(), fetched_at: Instant::now() });
        tracing::debug!(keys = keys.keys.len(), "google signing keys refreshed");
        Ok(keys)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.settings.client_id.as_str()]);
        validation.set_issuer(&ISSUERS);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation
    }

    async fn verify_id_token(&self, id_token: &str) -> AuthResult<ExternalIdentity> {
        let stage = OAuthStage::IdentityVerified;
        let header = decode_header(id_token).map_err(|e| AuthError::provider(stage, format!("id token header: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::provider(stage, format!("unexpected id token algorithm {:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::provider(stage, "id token has no key id"))?;

        let mut keys = self.signing_keys(false).await?;
        if keys.find(&kid).is_none() {
            keys = self.signing_keys(true).await?;
        }
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| AuthError::provider(stage, format!("unknown signing key {kid}")))?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::provider(stage, format!("signing key: {e}")))?;

        let data = decode::<GoogleIdClaims>(id_token, &key, &self.validation())
            .map_err(|e| AuthError::provider(stage, format!("id token rejected: {e}")))?;
        identity_from_claims(data.claims)
    }
}

fn identity_from_claims(claims: GoogleIdClaims) -> AuthResult<ExternalIdentity> {
    let stage = OAuthStage::IdentityVerified;
    let email = claims
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AuthError::provider(stage, "id token carries no email"))?;
    if !claims.email_verified.as_ref().is_some_and(Flag::is_set) {
        return Err(AuthError::provider(stage, "google email is not verified"));
    }

    let display_name = claims
        .name
        .map(|n| n.trim().chars().take(MAX_DISPLAY_NAME).collect::<String>())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

    Ok(ExternalIdentity {
        subject: claims.sub,
        email,
        display_name,
        avatar_url: claims.picture,
    })
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    fn authorization_url(&self, state: &str) -> AuthResult<String> {
        let url = reqwest::Url::parse_with_params(
            AUTH_URL,
            &[
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("access_type", "offline"),
                ("prompt", "select_account"),
                ("state", state),
            ],
        )
        .map_err(|e| AuthError::provider(OAuthStage::Requested, e.to_string()))?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> AuthResult<ExternalIdentity> {
        let stage = OAuthStage::CodeExchanged;
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::provider(stage, format!("token exchange: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::provider(stage, format!("token endpoint returned {}", response.status())));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::provider(stage, format!("token response: {e}")))?;
        let id_token = tokens
            .id_token
            .ok_or_else(|| AuthError::provider(stage, "token response has no id_token"))?;

        self.verify_id_token(&id_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn provider() -> GoogleIdentityProvider {
        GoogleIdentityProvider::new(GoogleSettings {
            client_id: "client-123.apps.googleusercontent.com".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://localhost:3001/api/auth/google/callback".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn claims(verified: Option<Flag>) -> GoogleIdClaims {
        GoogleIdClaims {
            sub: "1098".into(),
            email: Some(" Alice@Example.com ".into()),
            email_verified: verified,
            name: None,
            picture: Some("https://lh3.example.com/a.png".into()),
        }
    }

    #[test]
    fn authorization_url_carries_required_params() {
        let url = provider().authorization_url("state-abc").unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        let params: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        let get = |k: &str| params.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());

        assert!(url.starts_with(AUTH_URL));
        assert_eq!(get("state"), Some("state-abc"));
        assert_eq!(get("scope"), Some("openid email profile"));
        assert_eq!(get("access_type"), Some("offline"));
        assert_eq!(get("prompt"), Some("select_account"));
        assert_eq!(get("response_type"), Some("code"));
        assert_eq!(get("client_id"), Some("client-123.apps.googleusercontent.com"));
    }

    #[test]
    fn verified_claims_become_identity() {
        let identity = identity_from_claims(claims(Some(Flag::Bool(true)))).unwrap();
        assert_eq!(identity.subject, "1098");
        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.display_name, "alice");
        assert_eq!(identity.avatar_url.as_deref(), Some("https://lh3.example.com/a.png"));
    }

    #[test]
    fn string_verified_flag_is_accepted() {
        assert!(identity_from_claims(claims(Some(Flag::Text("true".into())))).is_ok());
    }

    #[test]
    fn unverified_email_is_rejected() {
        for flag in [None, Some(Flag::Bool(false)), Some(Flag::Text("false".into()))] {
            let err = identity_from_claims(claims(flag)).unwrap_err();
            assert!(matches!(err, AuthError::IdentityProvider { stage: OAuthStage::IdentityVerified, .. }));
        }
    }

    #[test]
    fn missing_email_is_rejected() {
        let mut c = claims(Some(Flag::Bool(true)));
        c.email = None;
        assert!(identity_from_claims(c).is_err());
    }

    #[tokio::test]
    async fn symmetric_id_token_is_rejected_before_key_fetch() {
        #[derive(serde::Serialize)]
        struct Forged<'a> {
            sub: &'a str,
            iss: &'a str,
            aud: &'a str,
            exp: i64,
        }
        let token = encode(
            &Header::default(),
            &Forged {
                sub: "1098",
                iss: "https://accounts.google.com",
                aud: "client-123.apps.googleusercontent.com",
                exp: chrono::Utc::now().timestamp() + 600,
            },
            &EncodingKey::from_secret(b"attacker"),
        )
        .unwrap();

        let err = provider().verify_id_token(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::IdentityProvider { stage: OAuthStage::IdentityVerified, .. }));
    }
}
