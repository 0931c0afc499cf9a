//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use foodbridge_shared::constants::{
    APP_NAME, AVAILABLE_LISTING_LIMIT, DEFAULT_FRESHNESS_MINUTES, DEFAULT_HTTP_PORT,
    MAX_FRESHNESS_MINUTES,
};

use crate::surplus::SurplusSettings;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"FoodBridge"`
    pub instance_name: String,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Freshness window used when a listing arrives without one.
    /// Env: `DEFAULT_FRESHNESS_MINUTES`
    pub default_freshness_minutes: i64,

    /// Page size of the available-listings feed.
    /// Env: `AVAILABLE_LISTING_LIMIT`
    pub available_listing_limit: u32,

    /// Re-read and re-plan once after losing a conditional write.
    /// Env: `RETRY_ON_CONFLICT` (true/false)
    /// Default: `true`
    pub retry_on_conflict: bool,

    /// Interval of the background expiry sweep (0 = expiry stays lazy).
    /// Env: `EXPIRY_SWEEP_SECS`
    /// Default: `0`
    pub expiry_sweep_secs: u64,

    /// Sustained requests per second allowed per client IP.
    pub rate_limit_per_sec: f64,

    /// Burst capacity per client IP.
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            instance_name: APP_NAME.to_string(),
            admin_token: None,
            default_freshness_minutes: DEFAULT_FRESHNESS_MINUTES,
            available_listing_limit: AVAILABLE_LISTING_LIMIT,
            retry_on_conflict: true,
            expiry_sweep_secs: 0,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = lookup("DEFAULT_FRESHNESS_MINUTES") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 && n <= MAX_FRESHNESS_MINUTES => {
                    config.default_freshness_minutes = n
                }
                _ => tracing::warn!(value = %val, "Invalid DEFAULT_FRESHNESS_MINUTES, using default"),
            }
        }

        if let Some(val) = lookup("AVAILABLE_LISTING_LIMIT") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.available_listing_limit = n,
                _ => tracing::warn!(value = %val, "Invalid AVAILABLE_LISTING_LIMIT, using default"),
            }
        }

        if let Some(val) = lookup("RETRY_ON_CONFLICT") {
            config.retry_on_conflict = val != "false" && val != "0";
        }

        if let Some(val) = lookup("EXPIRY_SWEEP_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.expiry_sweep_secs = n;
            } else {
                tracing::warn!(value = %val, "Invalid EXPIRY_SWEEP_SECS, sweep disabled");
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn surplus_settings(&self) -> SurplusSettings {
        SurplusSettings {
            default_freshness_minutes: self.default_freshness_minutes,
            available_limit: self.available_listing_limit,
            retry_on_conflict: self.retry_on_conflict,
        }
    }
}
