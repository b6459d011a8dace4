//! Store configuration, loaded from a JSON file with documented defaults
//! (spec.md §6). Mirrors the teacher's `RuntimeConfig::resolve_sqlite_db_name`
//! pattern of allowing an environment variable (via `dotenvy`) to override a
//! config value for local development.

use std::path::Path;

use serde::Deserialize;

fn default_data_path() -> String {
    "./datacat-store.db".to_string()
}
fn default_retention_days() -> u32 {
    365
}
fn default_cleanup_interval_hours() -> u32 {
    24
}
fn default_server_port() -> u16 {
    9090
}
fn default_heartbeat_timeout_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_path")]
    pub data_path: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u32,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_heartbeat_timeout_seconds")]
    pub heartbeat_timeout_seconds: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub require_api_key: bool,
    #[serde(default)]
    pub tls_cert_file: Option<String>,
    #[serde(default)]
    pub tls_key_file: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
            server_port: default_server_port(),
            heartbeat_timeout_seconds: default_heartbeat_timeout_seconds(),
            api_key: None,
            require_api_key: false,
            tls_cert_file: None,
            tls_key_file: None,
            log_file: None,
        }
    }
}

impl StoreConfig {
    /// Load from a JSON file, falling back to all-defaults if the file is
    /// absent. Missing individual fields fall back to their documented
    /// defaults via `#[serde(default)]`.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_seconds as i64)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.cleanup_interval_hours) * 3600)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}
