use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout for proxy uploads and server-side processing.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
    /// Timeout for ordinary JSON requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Timeout for health probes.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
    /// Timeout for a single presigned PUT attempt against object storage.
    #[serde(default = "default_storage_put_timeout")]
    pub storage_put_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            upload_timeout_secs: default_upload_timeout(),
            request_timeout_secs: default_request_timeout(),
            health_timeout_secs: default_health_timeout(),
            storage_put_timeout_secs: default_storage_put_timeout(),
        }
    }
}

fn default_base_url() -> String {
    // NEXT_PUBLIC_API_URL mirrors the web client's environment contract.
    std::env::var("NEXT_PUBLIC_API_URL").unwrap_or_else(|_| "http://localhost:8000".to_string())
}
fn default_upload_timeout() -> u64 {
    180
}
fn default_request_timeout() -> u64 {
    30
}
fn default_health_timeout() -> u64 {
    5
}
fn default_storage_put_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Retries after the first presigned PUT attempt. 4xx is never retried.
    #[serde(default = "default_max_put_retries")]
    pub max_put_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_put_retries: default_max_put_retries(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
        }
    }
}

fn default_max_put_retries() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    1
}
fn default_backoff_cap() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    /// Concurrent content fetches during a conversation reload.
    #[serde(default = "default_content_parallelism")]
    pub content_parallelism: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            content_parallelism: default_content_parallelism(),
            page_size: default_page_size(),
        }
    }
}

fn default_content_parallelism() -> usize {
    6
}
fn default_page_size() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Optional override forwarded to the server-side processor and the
    /// configuration-synthesis call.
    #[serde(default)]
    pub ai_api_url: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            ai_api_url: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}
fn default_max_poll_attempts() -> u32 {
    60
}

impl Config {
    /// A minimal in-memory configuration for tests and token-less commands.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/docsync.sqlite"),
            },
            api: ApiConfig::default(),
            uploads: UploadConfig::default(),
            reconcile: ReconcileConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.api.base_url.is_empty() {
        anyhow::bail!("api.base_url must not be empty");
    }

    if config.reconcile.content_parallelism == 0 {
        anyhow::bail!("reconcile.content_parallelism must be >= 1");
    }

    if config.reconcile.page_size == 0 {
        anyhow::bail!("reconcile.page_size must be >= 1");
    }

    if config.report.poll_interval_secs == 0 {
        anyhow::bail!("report.poll_interval_secs must be >= 1");
    }

    if config.report.max_poll_attempts == 0 {
        anyhow::bail!("report.max_poll_attempts must be >= 1");
    }

    if config.uploads.backoff_cap_secs < config.uploads.backoff_base_secs {
        anyhow::bail!("uploads.backoff_cap_secs must be >= uploads.backoff_base_secs");
    }

    Ok(config)
}
