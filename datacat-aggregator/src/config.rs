//! Aggregator configuration, loaded from a JSON file with documented
//! defaults (spec.md §6). Environment overrides follow the same
//! `dotenvy`-backed pattern as `datacat-store::config`.

use std::path::Path;

use serde::Deserialize;

fn default_daemon_port() -> u16 {
    8079
}
fn default_server_url() -> String {
    "http://127.0.0.1:9090".to_string()
}
fn default_batch_interval_seconds() -> u64 {
    5
}
fn default_max_batch_size() -> usize {
    500
}
fn default_heartbeat_timeout_seconds() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_daemon_port")]
    pub daemon_port: u16,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_batch_interval_seconds")]
    pub batch_interval_seconds: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_heartbeat_timeout_seconds")]
    pub heartbeat_timeout_seconds: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub enable_compression: bool,
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    #[serde(default)]
    pub tls_insecure_skip_verify: bool,
    /// Per-host identity used for the Store's crash-correlation logic
    /// (spec.md §4.4). Not part of spec.md §6's documented config-key list;
    /// see SPEC_FULL.md's Configuration section.
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            daemon_port: default_daemon_port(),
            server_url: default_server_url(),
            batch_interval_seconds: default_batch_interval_seconds(),
            max_batch_size: default_max_batch_size(),
            heartbeat_timeout_seconds: default_heartbeat_timeout_seconds(),
            api_key: None,
            enable_compression: default_true(),
            tls_verify: default_true(),
            tls_insecure_skip_verify: false,
            machine_id: None,
            hostname: None,
        }
    }
}

impl AggregatorConfig {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn batch_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.batch_interval_seconds)
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_seconds as i64)
    }
}
