//! API configuration
//!
//! CORS, bind address, and root-path settings, loaded from environment
//! variables with development defaults.

use std::net::SocketAddr;

/// API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address for the HTTP server.
    pub bind_addr: SocketAddr,
    /// Optional path prefix when served behind a reverse proxy.
    pub root_path: String,
    /// Allowed CORS origins; empty means allow all (dev mode).
    pub cors_origins: Vec<String>,
    /// Login provider advertised in auth errors.
    pub auth_provider_hint: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".parse().expect("static addr"),
            root_path: String::new(),
            cors_origins: Vec::new(),
            auth_provider_hint: "google".to_string(),
        }
    }
}

impl ApiConfig {
    /// Load from environment variables:
    /// - `REM_BIND_ADDR` (default `0.0.0.0:8000`)
    /// - `REM_ROOT_PATH` (default empty)
    /// - `REM_CORS_ORIGINS` (comma-separated; empty = allow all)
    /// - `REM_AUTH_PROVIDER` (default `google`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("REM_BIND_ADDR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.bind_addr),
            root_path: std::env::var("REM_ROOT_PATH").unwrap_or_default(),
            cors_origins: std::env::var("REM_CORS_ORIGINS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            auth_provider_hint: std::env::var("REM_AUTH_PROVIDER")
                .unwrap_or(defaults.auth_provider_hint),
        }
    }

    /// Whether strict CORS is in effect.
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}
