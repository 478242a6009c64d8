use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::User => write!(f, "user"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// How an account was first established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Local,
    Google,
}

impl AuthProvider {
    /// Provider designator after a Google identity is linked onto the account.
    /// Password accounts stay `local` so password login keeps working.
    pub fn after_google_link(self) -> Self {
        match self {
            AuthProvider::Local => AuthProvider::Local,
            AuthProvider::Google => AuthProvider::Google,
        }
    }
}

impl std::fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthProvider::Local => write!(f, "local"),
            AuthProvider::Google => write!(f, "google"),
        }
    }
}

impl std::str::FromStr for AuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(AuthProvider::Local),
            "google" => Ok(AuthProvider::Google),
            _ => Err(format!("unknown auth provider: {s}")),
        }
    }
}

/// Access-token claim set. The role is a cache of the stored role at issue
/// time; privileged operations must re-read it from the credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: UserRole,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl Claims {
    pub fn new(user_id: Uuid, role: UserRole, issuer: impl Into<String>, duration_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id,
            role,
            iss: issuer.into(),
            iat: now,
            exp: now + duration_secs,
            jti: Uuid::now_v7(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
    pub token_id: Uuid,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            token_id: claims.jti,
        }
    }
}

/// Bearer credential handed to the client. The refresh secret is never part
/// of a response body; it travels in an HTTP-only cookie.
#[derive(Debug, Serialize, Deserialize)]
pub struct BearerToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl BearerToken {
    pub fn new(access_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("ADMIN".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert_eq!("user".parse::<UserRole>().unwrap(), UserRole::User);
        assert!("moderator".parse::<UserRole>().is_err());
    }

    #[test]
    fn provider_round_trips_through_display() {
        for provider in [AuthProvider::Local, AuthProvider::Google] {
            assert_eq!(provider.to_string().parse::<AuthProvider>().unwrap(), provider);
        }
    }

    #[test]
    fn google_link_keeps_local_designator() {
        assert_eq!(AuthProvider::Local.after_google_link(), AuthProvider::Local);
        assert_eq!(AuthProvider::Google.after_google_link(), AuthProvider::Google);
    }

    #[test]
    fn claims_expire_after_duration() {
        let claims = Claims::new(Uuid::new_v4(), UserRole::User, "microsight-api", 60);
        assert_eq!(claims.exp - claims.iat, 60);
        assert_eq!(claims.iss, "microsight-api");
    }

    #[test]
    fn auth_user_takes_subject_and_role() {
        let claims = Claims::new(Uuid::new_v4(), UserRole::Admin, "microsight-api", 60);
        let user = AuthUser::from(claims.clone());
        assert_eq!(user.id, claims.sub);
        assert_eq!(user.role, UserRole::Admin);
        assert_eq!(user.token_id, claims.jti);
    }
}
