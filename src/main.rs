use std::sync::Arc;

use courier::config::{AuthMode, ServerConfig};
use courier::services::auth::{IdentityResolver, QueryParamResolver, SessionTokenResolver};
use courier::services::store::{MemoryMessageStore, MessageStore, PgMessageStore};
use courier::state::{AppState, SessionLimits};
use courier::{db, routes};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, "no .env file loaded");
    }

    let config = ServerConfig::from_env();

    let (store, auth): (Arc<dyn MessageStore>, Arc<dyn IdentityResolver>) = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            let store: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pool.clone()));
            let auth: Arc<dyn IdentityResolver> = match config.auth_mode {
                AuthMode::Session => Arc::new(SessionTokenResolver::new(pool)),
                AuthMode::Query => Arc::new(QueryParamResolver::new(config.auth_query_param.clone())),
            };
            (store, auth)
        }
        None => {
            if config.auth_mode == AuthMode::Session {
                tracing::warn!("AUTH_MODE=session needs DATABASE_URL; falling back to query auth");
            }
            tracing::warn!("DATABASE_URL not set; messages are kept in memory only");
            let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
            let auth: Arc<dyn IdentityResolver> = Arc::new(QueryParamResolver::new(config.auth_query_param.clone()));
            (store, auth)
        }
    };

    let state = AppState::new(store, auth, SessionLimits::from(&config));
    let app = routes::app(state.clone(), &config);

    let port = config.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, auth_mode = ?config.auth_mode, "courier listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .expect("server failed");
}

async fn shutdown_signal(state: AppState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown requested; closing sessions");
    state.begin_shutdown();
}
