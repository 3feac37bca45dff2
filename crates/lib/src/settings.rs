//! Per-instance relay settings and the store the agent reads them from.
//!
//! Settings are looked up on every invocation, so replacing an instance's entry
//! takes effect on that instance's next request.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Instance id used when a caller does not name one.
pub const DEFAULT_INSTANCE_ID: &str = "default";

pub const DEFAULT_SEND_TARGET: &str = "noderedsend";
pub const DEFAULT_RECEIVE_TARGET: &str = "noderedreceive";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_FALLBACK_ERROR_TEXT: &str = "Error";

pub const MIN_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Settings for one relay agent instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySettings {
    /// Outbound webhook id. Empty disables sending; every request resolves to the fallback text.
    #[serde(default = "default_send_target")]
    pub send_target: String,
    /// Inbound webhook id the reply arrives on. Empty means the agent sends but never waits.
    #[serde(default = "default_receive_target")]
    pub receive_target: String,
    /// How long to wait for the reply, 1..=300.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Text returned when no genuine reply is obtained.
    #[serde(default = "default_fallback_error_text")]
    pub fallback_error_text: String,
}

fn default_send_target() -> String {
    DEFAULT_SEND_TARGET.to_string()
}

fn default_receive_target() -> String {
    DEFAULT_RECEIVE_TARGET.to_string()
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_fallback_error_text() -> String {
    DEFAULT_FALLBACK_ERROR_TEXT.to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            send_target: default_send_target(),
            receive_target: default_receive_target(),
            timeout_seconds: default_timeout_seconds(),
            fallback_error_text: default_fallback_error_text(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("timeoutSeconds must be between 1 and 300, got {0}")]
    TimeoutOutOfRange(u64),
}

impl RelaySettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&self.timeout_seconds) {
            return Err(SettingsError::TimeoutOutOfRange(self.timeout_seconds));
        }
        Ok(())
    }
}

/// Host-provided settings lookup, keyed by instance id.
pub trait SettingsStore: Send + Sync {
    fn get(&self, instance_id: &str) -> Option<RelaySettings>;
}

/// In-memory settings store seeded from config.
pub struct InstanceSettings {
    inner: RwLock<HashMap<String, RelaySettings>>,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceSettings {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Build a store from validated instances; the first invalid entry aborts.
    pub fn from_instances(
        instances: &BTreeMap<String, RelaySettings>,
    ) -> Result<Self, SettingsError> {
        let store = Self::new();
        for (id, settings) in instances {
            store.set(id.clone(), settings.clone())?;
        }
        Ok(store)
    }

    /// Insert or replace an instance's settings after validating them.
    pub fn set(&self, instance_id: String, settings: RelaySettings) -> Result<(), SettingsError> {
        settings.validate()?;
        let mut g = self.inner.write().unwrap_or_else(|e| e.into_inner());
        g.insert(instance_id, settings);
        Ok(())
    }

    /// Instance ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let g = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = g.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl SettingsStore for InstanceSettings {
    fn get(&self, instance_id: &str) -> Option<RelaySettings> {
        let g = self.inner.read().unwrap_or_else(|e| e.into_inner());
        g.get(instance_id).cloned()
    }
}
