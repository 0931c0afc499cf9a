//! # foodbridge-server
//!
//! HTTP API for the FoodBridge surplus-food network.
//!
//! This binary provides:
//! - **Surplus lifecycle** endpoints: listing, claiming, driver assignment
//!   and the two code-verified handoffs (pickup, delivery)
//! - **Chat** endpoints gated by the contact rule (only parties linked by an
//!   active delivery may message each other)
//! - **Dashboard** figures for the current day
//! - **Admin API** (bearer token) for status and on-demand expiry sweeps
//! - **Per-client rate limiting** to protect against abuse

mod api;
mod chat;
mod config;
mod error;
mod rate_limit;
mod surplus;

use std::sync::Arc;
use std::time::Duration;

use foodbridge_shared::clock::SystemClock;
use foodbridge_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,foodbridge_server=debug")),
        )
        .init();

    info!("Starting FoodBridge server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        http_addr = %config.http_addr,
        retry_on_conflict = config.retry_on_conflict,
        expiry_sweep_secs = config.expiry_sweep_secs,
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the database (runs migrations)
    // -----------------------------------------------------------------------
    let db = match config.database_path {
        Some(ref path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    let http_addr = config.http_addr;
    let sweep_secs = config.expiry_sweep_secs;
    let state = AppState::new(db, Arc::new(SystemClock), config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let evicted = rl.purge_stale(600.0).await;
            tracing::debug!(evicted, "Purged idle rate limit buckets");
        }
    });

    // Optional expiry sweep; expiry is otherwise evaluated lazily.
    if sweep_secs > 0 {
        let sweep_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(sweep_secs));
            loop {
                interval.tick().await;
                match api::sweep_once(&sweep_state) {
                    Ok(0) => {}
                    Ok(expired) => info!(expired, "Expiry sweep persisted overdue listings"),
                    Err(e) => tracing::error!(error = %e, "Expiry sweep failed"),
                }
            }
        });
        info!(every_secs = sweep_secs, "Expiry sweep enabled");
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, http_addr) => {
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
