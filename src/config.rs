use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::ClientOptions;
use crate::error::{GmailError, Result};
use crate::fetcher::MAX_CONCURRENCY;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Message fetches in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_create_interval_secs")]
    pub create_interval_secs: u64,
    #[serde(default = "default_delete_interval_secs")]
    pub delete_interval_secs: u64,
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    #[serde(default = "default_modify_interval_ms")]
    pub modify_interval_ms: u64,
    #[serde(default = "default_mutations_per_minute")]
    pub mutations_per_minute: u32,
    #[serde(default = "default_mutation_burst")]
    pub mutation_burst: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            create_interval_secs: default_create_interval_secs(),
            delete_interval_secs: default_delete_interval_secs(),
            update_interval_secs: default_update_interval_secs(),
            modify_interval_ms: default_modify_interval_ms(),
            mutations_per_minute: default_mutations_per_minute(),
            mutation_burst: default_mutation_burst(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            max_pages: default_max_pages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_merge_journal")]
    pub merge_journal: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            merge_journal: default_merge_journal(),
        }
    }
}

fn default_concurrency() -> usize {
    20
}

fn default_page_size() -> u32 {
    500
}

fn default_create_interval_secs() -> u64 {
    5
}

fn default_delete_interval_secs() -> u64 {
    1
}

fn default_update_interval_secs() -> u64 {
    1
}

fn default_modify_interval_ms() -> u64 {
    250
}

fn default_mutations_per_minute() -> u32 {
    60
}

fn default_mutation_burst() -> u32 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_pages() -> usize {
    10_000
}

fn default_merge_journal() -> PathBuf {
    PathBuf::from(".gmail-rules/merge-journal.json")
}

const EXAMPLE_HEADER: &str = "\
# gmail-rules configuration
#
# [fetch]      concurrency: parallel message fetches (1-50)
#              page_size: ids requested per listing page (1-500)
# [pacing]     seconds between paced filter creations (5-10), deletions and
#              label updates; milliseconds between message modifications;
#              mutations_per_minute/mutation_burst size the shared token bucket
# [execution]  dry_run logs every mutation without sending it
# [paths]      merge_journal records in-flight label merges for `labels repair`

";

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fetch.concurrency == 0 || self.fetch.concurrency > MAX_CONCURRENCY {
            return Err(GmailError::ConfigError(format!(
                "fetch.concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.fetch.concurrency
            )));
        }

        if self.fetch.page_size == 0 || self.fetch.page_size > 500 {
            return Err(GmailError::ConfigError(format!(
                "fetch.page_size must be between 1 and 500, got {}",
                self.fetch.page_size
            )));
        }

        // Filter creation is the most quota-sensitive mutation
        if !(5..=10).contains(&self.pacing.create_interval_secs) {
            return Err(GmailError::ConfigError(format!(
                "pacing.create_interval_secs must be between 5 and 10, got {}",
                self.pacing.create_interval_secs
            )));
        }

        if self.pacing.delete_interval_secs == 0 || self.pacing.update_interval_secs == 0 {
            return Err(GmailError::ConfigError(
                "pacing.delete_interval_secs and pacing.update_interval_secs must be at least 1"
                    .to_string(),
            ));
        }

        if self.pacing.mutations_per_minute == 0 || self.pacing.mutation_burst == 0 {
            return Err(GmailError::ConfigError(
                "pacing.mutations_per_minute and pacing.mutation_burst must be greater than 0"
                    .to_string(),
            ));
        }

        if self.execution.request_timeout_secs == 0 {
            return Err(GmailError::ConfigError(
                "execution.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.execution.max_pages == 0 {
            return Err(GmailError::ConfigError(
                "execution.max_pages must be greater than 0".to_string(),
            ));
        }

        if self.paths.merge_journal.as_os_str().is_empty() {
            return Err(GmailError::ConfigError(
                "paths.merge_journal cannot be empty".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Limits for the production client
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            max_concurrent: self.fetch.concurrency,
            request_timeout: Duration::from_secs(self.execution.request_timeout_secs),
            max_retries: self.execution.max_retries,
            page_size: self.fetch.page_size,
        }
    }

    /// Write a default configuration with an explanatory header
    pub async fn create_example(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = toml::to_string_pretty(&Self::default())
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        tokio::fs::write(path, format!("{}{}", EXAMPLE_HEADER, body)).await?;
        tracing::info!("Wrote example configuration to {:?}", path);
        Ok(())
    }
}
