use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;

use microsight_auth::config::AppConfig;
use microsight_auth::services::google::GoogleIdentityProvider;
use microsight_auth::services::password::Argon2Hasher;
use microsight_auth::services::{AuthStores, SessionService};
use microsight_auth::store::{PgStore, RedisStateStore};
use microsight_auth::{routes, AppState, HttpSettings};
use microsight_shared::clients::db::create_pool;
use microsight_shared::clients::redis::RedisClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    microsight_shared::middleware::init_tracing("microsight-auth");

    let config = AppConfig::load()?;
    let settings = config.auth_settings();
    let metrics_handle = microsight_shared::middleware::init_metrics()?;

    let pool = create_pool(&config.database_url, settings.store_timeout)?;
    let pg = Arc::new(PgStore::new(pool, settings.store_timeout));
    let redis = RedisClient::connect(&config.redis_url).await?;

    let sessions = SessionService::new(
        &settings,
        AuthStores {
            credentials: pg.clone(),
            refresh_tokens: pg,
            states: Arc::new(RedisStateStore::new(redis, settings.store_timeout)),
        },
        Arc::new(Argon2Hasher::new(settings.password)?),
        Arc::new(GoogleIdentityProvider::new(settings.google.clone())?),
    );

    let cors = CorsLayer::new()
        .allow_origin(config.frontend_url.parse::<HeaderValue>()?)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_credentials(true);

    let state = Arc::new(AppState {
        sessions,
        http: HttpSettings {
            frontend_url: config.frontend_url.clone(),
            cookie_secure: config.cookie_secure,
        },
        metrics_handle: Some(metrics_handle),
    });

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(addr = %addr, "microsight-auth starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
