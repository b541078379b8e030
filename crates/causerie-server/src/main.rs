//! # causerie-server
//!
//! Realtime messaging and call-signaling server.
//!
//! This binary provides:
//! - **WebSocket gateway** carrying the realtime channel (presence,
//!   message delivery, call signaling)
//! - **REST API** (axum) for message creation, history pagination, and
//!   conversation listing, authenticated by bearer tokens
//! - **SQLite persistence** for messages and conversations
//! - **Per-IP rate limiting** on the HTTP surface

mod api;
mod auth;
mod config;
mod error;
mod gateway;
mod rate_limit;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use causerie_realtime::{
    CallSessionManager, ConnectionRegistry, ConversationSync, MessageDispatcher, SharedStore,
};
use causerie_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,causerie_server=debug")),
        )
        .init();

    info!("Starting Causerie server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        instance = %config.instance_name,
        max_page_size = config.max_page_size,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let database = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::open_default()?,
    };
    let store: SharedStore = Arc::new(tokio::sync::Mutex::new(database));

    let registry = Arc::new(ConnectionRegistry::new());
    let calls = Arc::new(CallSessionManager::new(registry.clone()));
    let dispatcher = Arc::new(MessageDispatcher::new(store.clone(), registry.clone()));
    let sync = Arc::new(ConversationSync::with_max_page_size(
        store.clone(),
        config.max_page_size,
    ));

    // Rate limiter: 10 req/s sustained, burst of 30
    let rate_limiter = RateLimiter::default();

    let state = AppState {
        registry,
        calls,
        dispatcher,
        sync,
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
