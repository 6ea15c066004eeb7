use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ExchangeError;

pub const API_KEY_ENV: &str = "BINANCE_API_KEY";
pub const API_SECRET_ENV: &str = "BINANCE_API_SECRET";

/// Which product line the market-data endpoints and streams point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    #[default]
    Spot,
    UsdFutures,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub testnet: bool,
    pub market: Market,
    pub recv_window_ms: u64,
    pub timeout_ms: u64,
    pub use_server_time: bool,
    pub depth_limit: u32,
    pub chart_limit: u32,
    pub max_pending_updates: usize,
    pub cancel_check_interval_ms: u64,
    pub rest_base_url: Option<String>,
    pub ws_base_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            testnet: false,
            market: Market::Spot,
            recv_window_ms: 5_000,
            timeout_ms: 15_000,
            use_server_time: false,
            depth_limit: 1_000,
            chart_limit: 500,
            max_pending_updates: 10_000,
            cancel_check_interval_ms: 1_000,
            rest_base_url: None,
            ws_base_url: None,
        }
    }
}

impl ClientConfig {
    /// Fills missing credentials from the process environment (and `.env`, if present).
    pub fn with_env_credentials(mut self) -> Self {
        dotenvy::dotenv().ok();
        if self.api_key.is_none() {
            self.api_key = std::env::var(API_KEY_ENV).ok().filter(|v| !v.is_empty());
        }
        if self.api_secret.is_none() {
            self.api_secret = std::env::var(API_SECRET_ENV).ok().filter(|v| !v.is_empty());
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cancel_check_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_check_interval_ms.max(1))
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(Credentials::new(key.clone(), secret.clone()))
            }
            _ => None,
        }
    }
}

/// Reads a YAML client configuration. Missing keys take their defaults.
pub fn load_client_config(path: impl AsRef<Path>) -> Result<ClientConfig, ExchangeError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        ExchangeError::Configuration(format!("failed to read {}: {e}", path.display()))
    })?;
    serde_yaml::from_str(&content).map_err(|e| {
        ExchangeError::Configuration(format!("invalid config {}: {e}", path.display()))
    })
}

/// API key and secret. The secret never appears in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self { api_key, api_secret }
    }

    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}
