use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{ExporterError, Result};
use crate::models::CustomQuery;

/// Directory holding the exporter's config, client secret and token
pub const CONFIG_DIR_NAME: &str = ".prometheus-gmail-exporter";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub labels: LabelsConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub custom_queries: Vec<CustomQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LabelsConfig {
    /// Label ids to monitor; empty means discover all labels
    #[serde(default)]
    pub include: Vec<String>,
    /// Label ids that also get a per-sender unread breakdown
    #[serde(default)]
    pub sender_count: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub daemonize: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            daemonize: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Serve `/readyz` alongside `/metrics`
    #[serde(default = "default_readiness")]
    pub readiness: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            readiness: default_readiness(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthFlow {
    /// Local HTTP redirect listener on `oauth_bind_port`
    #[default]
    Redirect,
    /// Print the consent URL and read the code from stdin
    Interactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_client_secret_file")]
    pub client_secret_file: PathBuf,
    #[serde(default = "default_token_cache")]
    pub token_cache: PathBuf,
    #[serde(default)]
    pub flow: AuthFlow,
    #[serde(default = "default_oauth_bind_port")]
    pub oauth_bind_port: u16,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_secret_file: default_client_secret_file(),
            token_cache: default_token_cache(),
            flow: AuthFlow::default(),
            oauth_bind_port: default_oauth_bind_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Reset a label's sender series before each aggregation pass
    #[serde(default)]
    pub zero_absent_senders: bool,
    /// Cap on cached thread senders; unbounded when unset
    #[serde(default)]
    pub sender_cache_capacity: Option<usize>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            zero_absent_senders: false,
            sender_cache_capacity: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

/// `~/.prometheus-gmail-exporter/<filename>`, or a relative path without a home
pub fn home_config_path(filename: &str) -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(CONFIG_DIR_NAME).join(filename),
        None => PathBuf::from(CONFIG_DIR_NAME).join(filename),
    }
}

/// Config files probed in order when `--config` is not given
pub fn default_config_candidates() -> Vec<PathBuf> {
    vec![
        home_config_path("prometheus-gmail-exporter.toml"),
        PathBuf::from("/etc/prometheus-gmail-exporter.toml"),
    ]
}

fn default_interval_secs() -> u64 {
    300
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_readiness() -> bool {
    true
}

fn default_client_secret_file() -> PathBuf {
    home_config_path("client_secret.json")
}

fn default_token_cache() -> PathBuf {
    home_config_path("login_cookie.json")
}

fn default_oauth_bind_port() -> u16 {
    9090
}

fn default_namespace() -> String {
    "gmail".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_concurrent() -> usize {
    10
}

impl Config {
    /// Read `path` without validating; callers validate once overrides are applied
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ExporterError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            ExporterError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load the first existing default location, or defaults if none exists
    pub async fn load_default() -> Result<Self> {
        for candidate in default_config_candidates() {
            if candidate.exists() {
                return Self::load(&candidate).await;
            }
        }

        tracing::info!("No config file found in default locations, using defaults");
        Ok(Self::default())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ExporterError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            ExporterError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        tokio::fs::write(path, content).await.map_err(|e| {
            ExporterError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.refresh.interval_secs == 0 {
            return Err(ExporterError::ConfigError(
                "refresh.interval_secs must be at least 1".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ExporterError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        if self.server.port == self.auth.oauth_bind_port && self.auth.flow == AuthFlow::Redirect {
            return Err(ExporterError::ConfigError(format!(
                "server.port and auth.oauth_bind_port cannot both be {}",
                self.server.port
            )));
        }

        if !is_valid_metric_fragment(&self.metrics.namespace) {
            return Err(ExporterError::ConfigError(format!(
                "metrics.namespace '{}' must start with a letter and contain only letters, digits and '_'",
                self.metrics.namespace
            )));
        }

        if self.metrics.sender_cache_capacity == Some(0) {
            return Err(ExporterError::ConfigError(
                "metrics.sender_cache_capacity must be greater than 0 when set".to_string(),
            ));
        }

        if self.api.request_timeout_secs == 0 {
            return Err(ExporterError::ConfigError(
                "api.request_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.api.max_concurrent_requests == 0 {
            return Err(ExporterError::ConfigError(
                "api.max_concurrent_requests must be at least 1".to_string(),
            ));
        }

        for label in self.labels.include.iter().chain(&self.labels.sender_count) {
            if label.trim().is_empty() {
                return Err(ExporterError::ConfigError(
                    "labels cannot contain empty label ids".to_string(),
                ));
            }
        }

        let mut names = HashSet::new();
        for query in &self.custom_queries {
            if query.name.trim().is_empty() {
                return Err(ExporterError::ConfigError(
                    "custom_queries entries need a non-empty name".to_string(),
                ));
            }
            if query.query.trim().is_empty() {
                return Err(ExporterError::ConfigError(format!(
                    "custom query '{}' has an empty query string",
                    query.name
                )));
            }
            if let Some(suffix) = LABEL_GAUGE_SUFFIXES
                .iter()
                .find(|suffix| query.name.ends_with(*suffix))
            {
                return Err(ExporterError::ConfigError(format!(
                    "custom query name '{}' ends in '{}', which is reserved for label gauges",
                    query.name, suffix
                )));
            }
            if !names.insert(query.name.as_str()) {
                return Err(ExporterError::ConfigError(format!(
                    "custom query name '{}' is used more than once",
                    query.name
                )));
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let mut config = Self::default();
        config.labels.include = vec!["INBOX".to_string(), "UNREAD".to_string()];
        config.custom_queries = vec![CustomQuery {
            name: "urgent".to_string(),
            query: "is:important is:unread".to_string(),
        }];
        config.save(path).await
    }
}

/// Suffixes of the per-label gauge keys; custom query names may not collide with them
const LABEL_GAUGE_SUFFIXES: [&str; 3] = ["_total", "_unread", "_sender"];

fn is_valid_metric_fragment(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
