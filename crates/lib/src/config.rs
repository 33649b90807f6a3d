//! Configuration types, loading, and the config provider.
//!
//! Config is loaded from a JSON file (e.g. `~/.orty/config.json`) and environment.
//! The server section is published to the session through a `watch` channel so
//! settings changes reach a running session without restarting it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Server address used until the user configures one.
pub const DEFAULT_BASE_URL: &str = "http://192.168.12.175:8080";

/// Top-level client config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Assistant server address and shared secret.
    #[serde(default)]
    pub server: ServerConfig,

    /// HTTP transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Server address and shared secret. The session holds a read-only copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Absolute server URL without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Shared secret sent with every request. Empty means unconfigured.
    #[serde(default)]
    pub secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            secret: String::new(),
        }
    }
}

impl ServerConfig {
    /// Build a config the way it is stored: URL trimmed with one trailing slash removed, secret trimmed.
    pub fn normalized(base_url: &str, secret: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            secret: secret.trim().to_string(),
        }
    }

    /// True when a non-blank secret is configured.
    pub fn has_secret(&self) -> bool {
        !self.secret.trim().is_empty()
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Per-request timeout in seconds (default 10).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Trim the URL and drop a single trailing slash.
pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim();
    url.strip_suffix('/').unwrap_or(url).to_string()
}

/// Resolve the shared secret: env ORTY_SECRET overrides config.
pub fn resolve_secret(server: &ServerConfig) -> String {
    std::env::var("ORTY_SECRET")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| server.secret.trim().to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("ORTY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".orty").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(ClientConfig, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = read_config_file(&path)?;
    Ok((config, path))
}

fn read_config_file(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(ClientConfig::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}

/// Source of the server config: a change stream plus a persist operation.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Subscribe to the current config and every later change.
    fn subscribe(&self) -> watch::Receiver<ServerConfig>;

    /// Normalize and store new settings. Subscribers see the stored value once it is written.
    async fn persist(&self, base_url: &str, secret: &str) -> Result<()>;
}

/// Config provider backed by the JSON config file.
pub struct FileConfigStore {
    path: PathBuf,
    tx: watch::Sender<ServerConfig>,
}

impl FileConfigStore {
    /// Load the config file (or defaults when missing) and start publishing its server section.
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let (config, path) = load_config(path)?;
        let (tx, _) = watch::channel(effective_server(&config.server));
        Ok(Self { path, tx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The server config currently published to subscribers.
    pub fn current(&self) -> ServerConfig {
        self.tx.borrow().clone()
    }

    /// Re-read the file and publish the server section if it changed. Returns true when it did.
    pub fn reload(&self) -> Result<bool> {
        let config = read_config_file(&self.path)?;
        Ok(publish(&self.tx, effective_server(&config.server)))
    }
}

#[async_trait]
impl ConfigProvider for FileConfigStore {
    fn subscribe(&self) -> watch::Receiver<ServerConfig> {
        self.tx.subscribe()
    }

    async fn persist(&self, base_url: &str, secret: &str) -> Result<()> {
        let mut config = read_config_file(&self.path)?;
        config.server = ServerConfig::normalized(base_url, secret);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }
        let s = serde_json::to_string_pretty(&config).context("serializing config")?;
        tokio::fs::write(&self.path, s)
            .await
            .with_context(|| format!("writing config to {}", self.path.display()))?;
        log::info!(
            "saved server settings to {} (base url {})",
            self.path.display(),
            config.server.base_url
        );
        publish(&self.tx, effective_server(&config.server));
        Ok(())
    }
}

/// In-process config provider with the same normalization as the file store. Nothing is written to disk.
pub struct MemoryConfigStore {
    tx: watch::Sender<ServerConfig>,
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl MemoryConfigStore {
    pub fn new(initial: ServerConfig) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a config as-is, as if it changed outside this process.
    pub fn set(&self, config: ServerConfig) {
        self.tx.send_replace(config);
    }

    pub fn current(&self) -> ServerConfig {
        self.tx.borrow().clone()
    }
}

#[async_trait]
impl ConfigProvider for MemoryConfigStore {
    fn subscribe(&self) -> watch::Receiver<ServerConfig> {
        self.tx.subscribe()
    }

    async fn persist(&self, base_url: &str, secret: &str) -> Result<()> {
        publish(&self.tx, ServerConfig::normalized(base_url, secret));
        Ok(())
    }
}

fn effective_server(server: &ServerConfig) -> ServerConfig {
    ServerConfig {
        base_url: normalize_base_url(&server.base_url),
        secret: resolve_secret(server),
    }
}

fn publish(tx: &watch::Sender<ServerConfig>, config: ServerConfig) -> bool {
    tx.send_if_modified(|current| {
        if *current == config {
            false
        } else {
            *current = config;
            true
        }
    })
}
