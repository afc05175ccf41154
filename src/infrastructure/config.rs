//! Application configuration
//!
//! Loaded once at process start from built-in defaults, an optional
//! `bookwatch.toml` and `BOOKWATCH_*` environment variables. The crawl
//! core receives the resolved struct as an immutable value; invalid
//! settings fail here, never mid-run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Root of the catalog site, e.g. `https://books.toscrape.com`.
    pub base_url: String,

    /// Maximum in-flight detail-page requests.
    pub max_concurrent_requests: u32,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Total fetch attempts per URL (first try included).
    pub retry_attempts: u32,

    /// Base delay between retry attempts in milliseconds; the n-th
    /// retry waits n times this value.
    pub retry_delay_ms: u64,

    /// Minimum spacing between dispatched requests in milliseconds.
    pub politeness_delay_ms: u64,

    /// Keep the raw HTML of each detail page on the stored record.
    pub store_raw_html: bool,

    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file path. Empty means the platform data dir.
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: String,

    /// Also write logs to a daily-rotated file under `log_dir`.
    pub file_output: bool,

    pub log_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig {
                base_url: "https://books.toscrape.com".to_string(),
                max_concurrent_requests: 10,
                request_timeout_secs: 30,
                retry_attempts: 3,
                retry_delay_ms: 1000,
                politeness_delay_ms: 100,
                store_raw_html: false,
                user_agent: format!("bookwatch/{}", env!("CARGO_PKG_VERSION")),
            },
            storage: StorageConfig { database_path: String::new() },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_output: false,
                log_dir: "logs".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from defaults, the optional
    /// config file and environment overrides, in that precedence order.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&AppConfig::default())?;

        let mut builder = config::Config::builder().add_source(defaults);
        match config_file {
            Some(path) => {
                builder = builder.add_source(config::File::with_name(path).required(true));
            }
            None => {
                builder = builder.add_source(config::File::with_name("bookwatch").required(false));
            }
        }
        let loaded = builder
            .add_source(config::Environment::with_prefix("BOOKWATCH").separator("__"))
            .build()?;

        let app_config: AppConfig = loaded.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if url::Url::parse(&self.crawler.base_url).is_err() {
            return Err(ConfigError::Invalid {
                field: "crawler.base_url",
                reason: format!("not a valid URL: {}", self.crawler.base_url),
            });
        }
        if self.crawler.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid {
                field: "crawler.max_concurrent_requests",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.crawler.retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "crawler.retry_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.crawler.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "crawler.request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Resolved SQLite database path, defaulting to the platform data
    /// directory.
    pub fn database_path(&self) -> PathBuf {
        if self.storage.database_path.is_empty() {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("bookwatch")
                .join("bookwatch.db")
        } else {
            PathBuf::from(&self.storage.database_path)
        }
    }
}
