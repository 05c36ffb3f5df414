use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/concord.json";
pub const REGISTRY_URL_ENV: &str = "CONCORD_REGISTRY_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// How registry writes guard against concurrent writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Concurrency {
    /// Writes carry the version token read with the document; conflicts retry.
    Versioned,
    /// Plain full-document overwrite, last write wins.
    Overwrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// URL of the shared `{ "users": [...] }` document. None keeps presence in-process.
    pub url: Option<String>,
    pub staleness_ms: u64,
    pub concurrency: Concurrency,
    pub max_conflict_retries: u32,
    /// Extra headers sent with every registry request (API keys and the like).
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: None,
            staleness_ms: 120_000,
            concurrency: Concurrency::Versioned,
            max_conflict_retries: 3,
            headers: BTreeMap::new(),
            timeout_ms: 10_000,
        }
    }
}

impl RegistryConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub announce_interval_ms: u64,
    pub discovery_interval_ms: u64,
    pub jitter_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            announce_interval_ms: 20_000,
            discovery_interval_ms: 6_000,
            jitter_ms: 1_000,
            max_backoff_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub endpoint_prefix: String,
    pub listen_addr: String,
    pub key_path: String,
    /// Drop the session when the transport reports a handle collision.
    pub logout_on_collision: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint_prefix: "concord-".to_string(),
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            key_path: "data/node_key.pk".to_string(),
            logout_on_collision: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub persona: String,
    pub timeout_ms: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            persona: "You are Concord AI, the digital ghost of Noir Peak. Your tone is \
                      mysterious, refined and noir. Answer atmospherically but usefully, \
                      and keep it short."
                .to_string(),
            timeout_ms: 20_000,
        }
    }
}

impl AssistantConfig {
    pub fn api_key(&self) -> Option<String> {
        env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/concord.db".to_string(),
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    let mut config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    };
    apply_env_overrides(&mut config);
    config
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(url) = env::var(REGISTRY_URL_ENV) {
        if !url.trim().is_empty() {
            log::info!("Registry url taken from {REGISTRY_URL_ENV}");
            config.registry.url = Some(url.trim().to_string());
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "registry": { "staleness_ms": 300000, "concurrency": "overwrite" } }"#,
        )
        .unwrap();
        assert_eq!(config.registry.staleness_ms, 300_000);
        assert_eq!(config.registry.concurrency, Concurrency::Overwrite);
        assert_eq!(config.registry.max_conflict_retries, 3);
        assert_eq!(config.heartbeat.announce_interval_ms, 20_000);
        assert_eq!(config.transport.endpoint_prefix, "concord-");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config("does/not/exist.json");
        assert_eq!(config.registry.staleness_ms, 120_000);
        assert!(config.transport.logout_on_collision);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = env::temp_dir().join(format!("concord-config-{}", std::process::id()));
        let path = dir.join("concord.json");
        let path = path.to_string_lossy().to_string();

        let mut config = AppConfig::default();
        config.heartbeat.discovery_interval_ms = 8_000;
        save_config(&path, &config).unwrap();

        let loaded = load_config(&path);
        assert_eq!(loaded.heartbeat.discovery_interval_ms, 8_000);
        let _ = fs::remove_dir_all(dir);
    }
}
