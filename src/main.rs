use anyhow::{Context, Result};
use credlink::api::{
    create_oauth_router, create_session_router, run_state_cleanup, OAuthAppState, SessionAppState,
    StateManager,
};
use credlink::config::{self, ProviderConfig, Secrets, ServiceConfig};
use credlink::credentials::{ConnectionStore, TokenCipher};
use credlink::session::SessionRegistry;
use credlink::tokens::ActiveTokenProvider;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credlink=info".into()),
        )
        .init();

    info!("credlink starting...");

    // Non-secret settings from TOML (defaults when the file is absent)
    let config_path =
        std::env::var("CREDLINK_CONFIG").unwrap_or_else(|_| "credlink.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        config::load_config(&config_path)
            .with_context(|| format!("Failed to load config file {}", config_path))?
    } else {
        info!(path = %config_path, "Config file not found, using defaults");
        ServiceConfig::default()
    };

    // Secrets are env-only; missing ones abort startup here
    let secrets = Secrets::from_env().context("Startup configuration invalid")?;
    let provider_config = ProviderConfig::assemble(&config.provider, &secrets)
        .context("Provider configuration invalid")?;

    // Key derivation happens once; the cipher is immutable from here on
    let cipher = Arc::new(
        TokenCipher::new(&secrets.token_encryption_key)
            .context("CREDLINK_TOKEN_ENCRYPTION_KEY is unusable")?,
    );

    let store = Arc::new(
        ConnectionStore::open(&config.storage.db_path).context("Failed to open connection store")?,
    );
    info!(db_path = %config.storage.db_path, "Connection store ready");

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.provider.timeout_seconds))
        .build()
        .context("Failed to build HTTP client")?;

    let tokens = Arc::new(ActiveTokenProvider::new(
        Arc::clone(&store),
        Arc::clone(&cipher),
        http,
        provider_config.clone(),
        secrets.expiry_buffer_seconds,
    ));

    let sessions = Arc::new(SessionRegistry::new());
    let state_manager = StateManager::new(config.oauth_state.ttl_seconds);

    // Sweep expired CSRF states in the background
    tokio::spawn(run_state_cleanup(
        state_manager.clone(),
        config.oauth_state.cleanup_interval_seconds,
    ));

    let oauth_state = OAuthAppState {
        tokens,
        sessions: Arc::clone(&sessions),
        state_manager,
        provider: provider_config,
        auth_enabled: config.server.auth_enabled,
    };
    let session_state = SessionAppState {
        sessions,
        admin_token: config.server.session_admin_token.clone(),
        auth_enabled: config.server.auth_enabled,
    };

    // The quoting SPA is served from a different origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_oauth_router(oauth_state)
        .merge(create_session_router(session_state))
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "credlink API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}
