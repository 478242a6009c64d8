use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;

use crate::config::PasswordCost;
use crate::error::{AuthError, AuthResult};

/// Fixed input for the dummy hash; never a valid user password.
const DUMMY_PASSWORD: &str = "microsight-dummy-password";

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> AuthResult<String>;

    /// Performs exactly one verification. With no stored hash, the
    /// plaintext is checked against a dummy hash of the same cost and the
    /// result is always `false`.
    async fn verify(&self, plaintext: &str, stored: Option<&str>) -> AuthResult<bool>;
}

/// Argon2id with the configured work factor. Hashing runs on the blocking
/// pool so slow hashes never stall the runtime.
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl Argon2Hasher {
    pub fn new(cost: PasswordCost) -> anyhow::Result<Self> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(DUMMY_PASSWORD.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("dummy hash failed: {e}"))?
            .to_string();

        Ok(Self { argon2, dummy_hash })
    }
}

#[async_trait]
impl PasswordHasher for Argon2Hasher {
    async fn hash(&self, plaintext: &str) -> AuthResult<String> {
        let argon2 = self.argon2.clone();
        let plaintext = plaintext.to_owned();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(plaintext.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| AuthError::Unavailable(format!("password hashing failed: {e}")))
        })
        .await
        .map_err(|e| AuthError::Unavailable(format!("hash task failed: {e}")))?
    }

    async fn verify(&self, plaintext: &str, stored: Option<&str>) -> AuthResult<bool> {
        let (target, genuine) = match stored {
            Some(hash) if PasswordHash::new(hash).is_ok() => (hash.to_owned(), true),
            Some(_) => {
                tracing::error!("stored password hash is malformed");
                (self.dummy_hash.clone(), false)
            }
            None => (self.dummy_hash.clone(), false),
        };

        let argon2 = self.argon2.clone();
        let plaintext = plaintext.to_owned();
        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&target)
                .map_err(|e| AuthError::Unavailable(format!("invalid password hash: {e}")))?;
            let matches = argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok();
            Ok(matches && genuine)
        })
        .await
        .map_err(|e| AuthError::Unavailable(format!("verify task failed: {e}")))?
    }
}
