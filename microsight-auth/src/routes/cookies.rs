use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use time::OffsetDateTime;

use crate::models::ClientMeta;
use crate::services::refresh_ledger::RefreshSecret;

pub const REFRESH_COOKIE: &str = "refreshToken";

/// Scope of the refresh cookie; the browser only sends it to the auth routes.
pub const REFRESH_COOKIE_PATH: &str = "/api/auth";

pub fn set_refresh_cookie(
    jar: CookieJar,
    secret: &RefreshSecret,
    expires_at: DateTime<Utc>,
    secure: bool,
) -> CookieJar {
    let mut cookie = Cookie::build((REFRESH_COOKIE, secret.expose().to_owned()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path(REFRESH_COOKIE_PATH)
        .build();
    if let Ok(at) = OffsetDateTime::from_unix_timestamp(expires_at.timestamp()) {
        cookie.set_expires(at);
    }
    jar.add(cookie)
}

pub fn clear_refresh_cookie(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(REFRESH_COOKIE).path(REFRESH_COOKIE_PATH))
}

pub fn refresh_secret(jar: &CookieJar) -> Option<String> {
    jar.get(REFRESH_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|v| !v.is_empty())
}

/// Advisory request metadata; the client IP comes from the proxy headers.
pub fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let ip_address = header_str("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .or_else(|| header_str("x-real-ip"))
        .map(|ip| ip.trim().chars().take(64).collect::<String>())
        .filter(|ip| !ip.is_empty());

    ClientMeta {
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        ip_address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::refresh_ledger::generate_secret;

    #[test]
    fn refresh_cookie_is_locked_down() {
        let secret = generate_secret();
        let expires_at = Utc::now() + chrono::Duration::days(7);
        let jar = set_refresh_cookie(CookieJar::new(), &secret, expires_at, true);
        let cookie = jar.get(REFRESH_COOKIE).unwrap();

        assert_eq!(cookie.value(), secret.expose());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.path(), Some(REFRESH_COOKIE_PATH));
        assert_eq!(
            cookie.expires_datetime().map(|t| t.unix_timestamp()),
            Some(expires_at.timestamp())
        );
    }

    #[test]
    fn forwarded_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert(header::USER_AGENT, "curl/8.0".parse().unwrap());

        let meta = client_meta(&headers);
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn missing_headers_give_empty_meta() {
        let meta = client_meta(&HeaderMap::new());
        assert!(meta.ip_address.is_none());
        assert!(meta.user_agent.is_none());
    }
}
