//! Authentication core for Microsight: password and Google sign-in,
//! short-lived access tokens, and rotating refresh tokens with replay
//! detection.

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;

use metrics_exporter_prometheus::PrometheusHandle;

use microsight_shared::access_token::{AccessTokenKeys, AccessTokenState};

use services::SessionService;

/// Transport settings for the HTTP binding.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub frontend_url: String,
    pub cookie_secure: bool,
}

pub struct AppState {
    pub sessions: SessionService,
    pub http: HttpSettings,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AccessTokenState for AppState {
    fn access_tokens(&self) -> &AccessTokenKeys {
        self.sessions.access_tokens()
    }
}
