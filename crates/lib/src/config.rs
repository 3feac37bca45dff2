//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.hookrelay/config.json`) and environment.
//! Every field has a default, so an empty `{}` (or a missing file) is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::settings::{RelaySettings, DEFAULT_INSTANCE_ID};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Outbound webhook client settings.
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Pending-response table expiry.
    #[serde(default)]
    pub correlator: CorrelatorConfig,

    /// Relay agent instances keyed by instance id. Empty => a single `default` instance.
    #[serde(default)]
    pub instances: BTreeMap<String, RelaySettings>,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP and WebSocket (default 8765).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

/// Where outbound webhook calls go and how long a single attempt may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundConfig {
    /// Base URL; calls go to `{baseUrl}/webhook/{sendTarget}`. Overridden by HOOKRELAY_BASE_URL env.
    /// When unset, the gateway's own API root is used.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout for the outbound POST (default 10).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatorConfig {
    /// Undelivered-to-anyone entries older than this are evicted (default 600, twice the longest allowed wait).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// How often the background sweeper runs (default 30).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_gateway_port() -> u16 {
    8765
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_retention_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Config {
    /// Configured instances, or a single `default` instance with default settings when none are configured.
    pub fn resolved_instances(&self) -> BTreeMap<String, RelaySettings> {
        if self.instances.is_empty() {
            let mut m = BTreeMap::new();
            m.insert(DEFAULT_INSTANCE_ID.to_string(), RelaySettings::default());
            m
        } else {
            self.instances.clone()
        }
    }

    /// Check value ranges before starting the gateway.
    pub fn validate(&self) -> Result<()> {
        for (id, settings) in &self.instances {
            settings
                .validate()
                .with_context(|| format!("instance \"{}\"", id))?;
        }
        if self.outbound.request_timeout_secs == 0 {
            anyhow::bail!("outbound.requestTimeoutSecs must be greater than 0");
        }
        if self.correlator.sweep_interval_secs == 0 {
            anyhow::bail!("correlator.sweepIntervalSecs must be greater than 0");
        }
        let min_retention = self.min_retention_secs();
        if self.correlator.retention_secs <= min_retention {
            anyhow::bail!(
                "correlator.retentionSecs must be greater than {} (outbound timeout plus longest instance wait), got {}",
                min_retention,
                self.correlator.retention_secs
            );
        }
        Ok(())
    }

    /// Longest a reply may legitimately sit in the pending table before its waiter takes it:
    /// the outbound POST timeout plus the longest instance wait.
    pub fn min_retention_secs(&self) -> u64 {
        let longest_wait = self
            .resolved_instances()
            .values()
            .map(|s| s.timeout_seconds)
            .max()
            .unwrap_or(0);
        self.outbound.request_timeout_secs.saturating_add(longest_wait)
    }
}

/// Resolve the outbound base URL: env HOOKRELAY_BASE_URL overrides config; otherwise
/// the gateway's own `http://{bind}:{port}/api`. Trailing slashes are removed.
pub fn resolve_base_url(config: &Config) -> String {
    std::env::var("HOOKRELAY_BASE_URL")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .outbound
                .base_url
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| {
            format!(
                "http://{}:{}/api",
                config.gateway.bind.trim(),
                config.gateway.port
            )
        })
        .trim_end_matches('/')
        .to_string()
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("HOOKRELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".hookrelay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, the default path, or HOOKRELAY_CONFIG_PATH. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
