use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::paths::config_path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BereaConfig {
    pub version: u32,
    pub endpoints: EndpointsConfig,
    pub sync: SyncSettings,
    pub chat: ChatSettings,
}

impl Default for BereaConfig {
    fn default() -> Self {
        Self {
            version: 1,
            endpoints: EndpointsConfig::default(),
            sync: SyncSettings::default(),
            chat: ChatSettings::default(),
        }
    }
}

impl BereaConfig {
    pub fn load() -> Result<Self, String> {
        let path = config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| format!("read config.toml: {e}"))?;
        toml::from_str(&raw).map_err(|e| format!("parse config.toml: {e}"))
    }
}

/// Base URLs and the publishable api key for the hosted services.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// GoTrue-style auth service base (`.../auth/v1`).
    pub auth_url: String,
    /// PostgREST-style data service base (`.../rest/v1`).
    pub store_url: String,
    /// The hosted completion endpoint (`POST <chat_url>`).
    pub chat_url: String,
    /// Publishable (anon) api key sent with every hosted-service request.
    pub api_key: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://127.0.0.1:54321/auth/v1".to_string(),
            store_url: "http://127.0.0.1:54321/rest/v1".to_string(),
            chat_url: "http://127.0.0.1:8787/api/chat".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Collapse window between a message-list change and the sync it schedules.
    pub debounce_ms: u64,
    /// How many prior messages accompany a completion request.
    pub history_window: usize,
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            history_window: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Greeting shown at the top of a fresh conversation. Never persisted.
    pub welcome: String,
    /// Assistant text appended when a completion call fails.
    pub apology: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            welcome: "Welcome! I'm here to help you explore scripture and walk through \
                      whatever is on your heart. How can I encourage you today?"
                .to_string(),
            apology: "I'm sorry, I wasn't able to respond just now. Please try again in a moment."
                .to_string(),
        }
    }
}
