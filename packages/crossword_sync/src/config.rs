use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [sync]
//                    heartbeat_secs = 30
//
//   env var:         XWORD_SYNC__HEARTBEAT_SECS=30   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub sync: SyncFileConfig,
    #[serde(default)]
    pub explainer: ExplainerFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Realtime fan-out knobs (lives under `[sync]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncFileConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Frames queued per client before a write counts as failed.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

impl Default for SyncFileConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            client_buffer: default_client_buffer(),
        }
    }
}

/// Explanation service (lives under `[explainer]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExplainerFileConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_explainer_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExplainerFileConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: None,
            timeout_secs: default_explainer_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_heartbeat_secs() -> u64 {
    15
}
fn default_client_buffer() -> usize {
    64
}
fn default_explainer_timeout_secs() -> u64 {
    60
}

/// Build a figment that layers: defaults → config.toml → XWORD_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `XWORD_SERVER__PORT=8080`  →  `server.port = 8080`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("XWORD_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub heartbeat_interval: Duration,
    pub client_buffer: usize,
}

impl SyncConfig {
    pub fn from_file(fc: &SyncFileConfig) -> Self {
        Self {
            // A zero interval would make tokio::time::interval panic.
            heartbeat_interval: Duration::from_secs(fc.heartbeat_secs.max(1)),
            client_buffer: fc.client_buffer.max(1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExplainerConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout: Duration,
}

impl ExplainerConfig {
    pub fn from_file(fc: &ExplainerFileConfig) -> Self {
        Self {
            endpoint: fc.endpoint.clone().filter(|e| !e.trim().is_empty()),
            api_key: fc.api_key.clone().filter(|k| !k.is_empty()),
            model: fc.model.clone(),
            timeout: Duration::from_secs(fc.timeout_secs),
        }
    }
}

// =============================================================================
// Directory layout config (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct XwordConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl XwordConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".xword"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("xword.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_defaults() {
        let d = FileConfig::default();
        assert_eq!(d.server.host, "127.0.0.1");
        assert_eq!(d.server.port, 3000);
        assert_eq!(d.sync.heartbeat_secs, 15);
        assert_eq!(d.sync.client_buffer, 64);
        assert!(d.explainer.endpoint.is_none());
        assert_eq!(d.explainer.timeout_secs, 60);
    }

    #[test]
    fn test_sync_config_clamps_zero_values() {
        let sc = SyncConfig::from_file(&SyncFileConfig {
            heartbeat_secs: 0,
            client_buffer: 0,
        });
        assert_eq!(sc.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(sc.client_buffer, 1);
    }

    #[test]
    fn test_explainer_config_blank_endpoint_is_none() {
        let ec = ExplainerConfig::from_file(&ExplainerFileConfig {
            endpoint: Some("  ".into()),
            api_key: Some(String::new()),
            ..Default::default()
        });
        assert!(ec.endpoint.is_none());
        assert!(ec.api_key.is_none());
    }

    #[test]
    fn test_xword_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = XwordConfig::new(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(config.data_dir, tmp.path());
        assert_eq!(config.db_path, tmp.path().join("xword.db"));
        assert_eq!(config.config_toml_path(), tmp.path().join("config.toml"));
        let url = config.db_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("?mode=rwc"));
    }

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.port, 3000);
        assert_eq!(fc.sync.heartbeat_secs, 15);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[server]\nport = 8080\n\n[sync]\nheartbeat_secs = 5\n\n[explainer]\nendpoint = \"http://localhost:9999/explain\"\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.port, 8080);
        assert_eq!(fc.server.host, "127.0.0.1");
        assert_eq!(fc.sync.heartbeat_secs, 5);
        assert_eq!(
            fc.explainer.endpoint.as_deref(),
            Some("http://localhost:9999/explain")
        );
    }
}
