//! Daemon settings loaded from a YAML file.
//!
//! These cover the hosting process (where data lives, which tenant the
//! worker serves, collaborator endpoints and timeouts). Per-run pipeline
//! behaviour lives in [`crate::config::AgentConfig`] instead.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::BoxError;
use crate::config::DEFAULT_SCHEDULE;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub tenant_id: String,
    pub data_dir: String,
    /// Address the control server binds to.
    pub listen: String,
    pub reconcile_interval_secs: u64,
    /// Schedule used when the tenant has none persisted.
    pub default_schedule: String,
    pub llm: LlmSettings,
    pub images: ImageSettings,
    pub feeds: FeedSettings,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            tenant_id: "default".to_string(),
            data_dir: "./data".to_string(),
            listen: "127.0.0.1:8787".to_string(),
            reconcile_interval_secs: 300,
            default_schedule: DEFAULT_SCHEDULE.to_string(),
            llm: LlmSettings::default(),
            images: ImageSettings::default(),
            feeds: FeedSettings::default(),
        }
    }
}

impl DaemonSettings {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub unsplash_access_key_env: String,
    pub pexels_api_key_env: String,
    /// Placeholders resolve to `{placeholder_base_url}/{category}.jpg`.
    pub placeholder_base_url: String,
    pub timeout_secs: u64,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            unsplash_access_key_env: "UNSPLASH_ACCESS_KEY".to_string(),
            pexels_api_key_env: "PEXELS_API_KEY".to_string(),
            placeholder_base_url: "/images/placeholders".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: concat!("newsroom_agent/", env!("CARGO_PKG_VERSION"), " (feed reader)")
                .to_string(),
        }
    }
}

/// Load settings from `path`; a missing file yields the defaults.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_settings(path: &Path) -> Result<DaemonSettings, BoxError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let settings: DaemonSettings = serde_yaml::from_str(&raw)?;
            info!(tenant = %settings.tenant_id, data_dir = %settings.data_dir, "Loaded daemon settings");
            Ok(settings)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Settings file not found; using defaults");
            Ok(DaemonSettings::default())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Read an API key from the environment variable `var`, if set and non-empty.
pub fn env_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
