//! Configuration management for formreach.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides. Every tunable the pipeline depends on
//! (retry counts, delays, crawl budgets) lives here so it can be injected
//! at construction and pinned in tests.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main application configuration.
///
/// Loaded from `~/.config/formreach/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Page fetching settings
    pub fetch: FetchConfig,
    /// Submission retry settings
    pub retry: RetryConfig,
    /// Form locator settings
    pub locator: LocatorConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Per-site throttling settings
    pub throttle: ThrottleConfig,
    /// CAPTCHA queue settings
    pub queue: QueueConfig,
    /// Audit sink settings
    pub audit: AuditConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `FORMREACH_TIMEOUT_SECS`: Override request timeout
    /// - `FORMREACH_HEADLESS`: Override browser headless mode (true/false)
    /// - `FORMREACH_THROTTLE_SECS`: Override per-site minimum delay
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;

        if let Ok(val) = std::env::var("FORMREACH_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.fetch.timeout_secs = secs;
                tracing::debug!("Override fetch.timeout_secs from env: {}", secs);
            }
        }

        if let Ok(val) = std::env::var("FORMREACH_HEADLESS") {
            if let Ok(headless) = val.parse() {
                config.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("FORMREACH_THROTTLE_SECS") {
            if let Ok(secs) = val.parse() {
                config.throttle.per_site_secs = secs;
                tracing::debug!("Override throttle.per_site_secs from env: {}", secs);
            }
        }

        Ok(config)
    }

    /// Save configuration to disk, creating the config directory if needed.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("io", "formreach", "formreach").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path (queue file, audit database).
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("io", "formreach", "formreach").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Page fetching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Fetch-level retry attempts for 429/5xx and transport errors
    pub max_retries: u32,
    /// User agent string
    pub user_agent: String,
    /// Whether to respect robots.txt
    pub respect_robots_txt: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            user_agent: "ContactBot/1.0 (+https://github.com/formreach/formreach)".to_string(),
            respect_robots_txt: true,
        }
    }
}

/// Submission retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries beyond the first attempt
    pub max_retries: u32,
    /// Base backoff delay in seconds
    pub base_delay_secs: f64,
    /// Backoff multiplier applied per retry
    pub backoff_multiplier: f64,
    /// Verified 200-responses below this confidence are retried as ambiguous
    pub ambiguous_confidence_floor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 5.0,
            backoff_multiplier: 2.0,
            ambiguous_confidence_floor: 0.30,
        }
    }
}

/// Form locator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Crawl budget: pages containing a `<form>` before the crawl stops
    pub max_crawl_pages: usize,
    /// Generic (non-contact-shaped) links followed per crawled page
    pub generic_links_per_page: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            max_crawl_pages: 15,
            generic_links_per_page: 5,
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
    /// Seconds to watch network traffic when capturing AJAX endpoints
    pub capture_window_secs: u64,
    /// Concurrent browser sessions (kept below the plain-HTTP limit; each
    /// session owns a heavyweight render process)
    pub max_concurrent: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            navigation_timeout_secs: 30,
            capture_window_secs: 5,
            max_concurrent: 2,
        }
    }
}

/// Per-site throttling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Minimum seconds between submissions to the same destination site
    pub per_site_secs: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { per_site_secs: 2.0 }
    }
}

/// CAPTCHA queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Path to the queue JSONL file
    pub path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("captcha_queue.jsonl"),
        }
    }
}

/// Audit sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("form_submissions.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_secs, 5.0);
        assert_eq!(config.locator.max_crawl_pages, 15);
        assert_eq!(config.throttle.per_site_secs, 2.0);
        assert!(config.browser.headless);
        assert!(config.fetch.respect_robots_txt);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[fetch]"));
        assert!(toml_str.contains("[retry]"));
        assert!(toml_str.contains("[throttle]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.fetch.user_agent, config.fetch.user_agent);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[retry]
max_retries = 5

[throttle]
per_site_secs = 4.5
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.throttle.per_site_secs, 4.5);
        // These should be defaults
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.locator.max_crawl_pages, 15);
    }

    #[test]
    fn test_config_save_load_roundtrip() {
        let tmp = tempfile::TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.retry.max_retries = 7;
        config.fetch.user_agent = "TestBot/0.1".to_string();

        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded_contents = fs::read_to_string(&config_path).expect("read config file");
        let loaded: AppConfig = toml::from_str(&loaded_contents).expect("parse loaded config");

        assert_eq!(loaded.retry.max_retries, 7);
        assert_eq!(loaded.fetch.user_agent, "TestBot/0.1");
    }
}
