use serde::Deserialize;
use std::{fs, time::Duration};

use crate::{
    sources::{Aggregate, DEFAULT_AUTH_URL, DEFAULT_DATA_BASE_URL},
    sync::SchedulerConfig,
};

pub const TOKEN_ENV: &str = "POWERSHAPER_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_data_base_url")]
    pub data_base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_refresh_interval_days")]
    pub refresh_interval_days: i64,
    /// Seed streams from the newest stored statistic (pgwire sink only).
    #[serde(default)]
    pub resume_from_store: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            refresh_interval_days: default_refresh_interval_days(),
            resume_from_store: false,
        }
    }
}

impl SchedulerSection {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestDbConfig {
    pub uri: String,
    pub max_connections: u32,
    pub ilp_tcp_addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Ilp,
    Pgwire,
    /// Keep statistics in process memory only (dry runs).
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl SinkConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    pub questdb: Option<QuestDbConfig>,
    pub sink: SinkConfig,
    pub metrics: Option<MetricsConfig>,
    pub push: Option<PushConfig>,
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_data_base_url() -> String {
    DEFAULT_DATA_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_tick_interval_secs() -> u64 {
    3600
}

fn default_refresh_interval_days() -> i64 {
    7
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("SYNC_CONFIG").unwrap_or_else(|_| "sync-config.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;
        let mut cfg = Self::from_toml_str(&contents)?;

        if let Ok(token) = env::var(TOKEN_ENV) {
            cfg.api.token = token;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.token.trim().is_empty() {
            anyhow::bail!("api.token is empty; set it in the config or via {TOKEN_ENV}");
        }
        if self.scheduler.tick_interval_secs == 0 {
            anyhow::bail!("scheduler.tick_interval_secs must be positive");
        }
        if self.scheduler.refresh_interval_days <= 0 {
            anyhow::bail!("scheduler.refresh_interval_days must be positive");
        }
        if self.sink.batch_size == 0 {
            anyhow::bail!("sink.batch_size must be positive");
        }
        if matches!(self.sink.kind, SinkKind::Ilp | SinkKind::Pgwire) && self.questdb.is_none() {
            anyhow::bail!("sink.kind requires a [questdb] section");
        }
        if self.scheduler.resume_from_store && self.sink.kind != SinkKind::Pgwire {
            anyhow::bail!("scheduler.resume_from_store requires sink.kind = \"pgwire\"");
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            refresh_interval: time::Duration::days(self.scheduler.refresh_interval_days),
            aggregate: self.api.aggregate,
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}
