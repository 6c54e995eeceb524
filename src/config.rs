//! Configuration management for webshelf.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories, and turns it into the plain
//! [`ScrapeOptions`] the pipeline runs with.

use crate::error::ConfigError;
use crate::http::RateLimit;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config directory.
const APP_NAME: &str = "webshelf";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP and fetch behaviour.
    pub scraping: ScrapingConfig,

    /// Embedded image handling.
    pub assets: AssetsConfig,

    /// File paths.
    pub paths: PathsConfig,
}

/// Rate limit for one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLimit {
    pub requests: u32,
    pub interval_sec: f64,
}

/// Web scraping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Requests allowed per host per interval.
    pub requests_per_interval: u32,

    /// Length of a rate-limit interval in seconds.
    pub interval_sec: f64,

    /// Chapters fetched at the same time.
    pub max_concurrent: usize,

    /// Attempts per request, including the first.
    pub max_attempts: u32,

    /// First retry delay in seconds; doubles on every retry.
    pub backoff_base_sec: f64,

    /// Upper bound on a retry delay in seconds.
    pub backoff_max_sec: f64,

    /// Per-request timeout in seconds.
    pub timeout_sec: f64,

    pub user_agent: String,

    /// Retry once after a cookie pass when a site serves a challenge page.
    pub solve_challenges: bool,

    /// Enable scraper debug logging.
    pub debug: bool,

    /// Netscape-format cookie file loaded into the session.
    pub cookie_file: Option<PathBuf>,

    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,

    /// Per-host rate limits, keyed by host name.
    pub host_limits: BTreeMap<String, HostLimit>,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            requests_per_interval: 5,
            interval_sec: 1.0,
            max_concurrent: 3,
            max_attempts: 3,
            backoff_base_sec: 1.0,
            backoff_max_sec: 32.0,
            timeout_sec: 30.0,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            solve_challenges: true,
            debug: false,
            cookie_file: None,
            headers: BTreeMap::new(),
            host_limits: BTreeMap::new(),
        }
    }
}

/// Embedded image configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Download images embedded in chapters.
    pub enabled: bool,

    /// Images larger than this are dropped.
    pub max_image_bytes: u64,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_image_bytes: crate::assets::DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// File path configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for finished books.
    pub output_directory: PathBuf,

    /// Directory for downloaded images. Defaults to `assets` under the config directory.
    pub asset_directory: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("."),
            asset_directory: None,
        }
    }
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scraping = &self.scraping;

        if scraping.max_concurrent == 0 {
            return Err(invalid("scraping.max_concurrent", "must be greater than 0"));
        }
        if scraping.max_attempts == 0 {
            return Err(invalid("scraping.max_attempts", "must be greater than 0"));
        }
        if scraping.requests_per_interval == 0 {
            return Err(invalid("scraping.requests_per_interval", "must be greater than 0"));
        }
        positive_seconds("scraping.interval_sec", scraping.interval_sec)?;
        positive_seconds("scraping.timeout_sec", scraping.timeout_sec)?;
        positive_seconds("scraping.backoff_base_sec", scraping.backoff_base_sec)?;
        positive_seconds("scraping.backoff_max_sec", scraping.backoff_max_sec)?;

        for (host, limit) in &scraping.host_limits {
            if limit.requests == 0 {
                return Err(invalid(
                    &format!("scraping.host_limits.{}.requests", host),
                    "must be greater than 0",
                ));
            }
            positive_seconds(
                &format!("scraping.host_limits.{}.interval_sec", host),
                limit.interval_sec,
            )?;
        }

        if self.assets.max_image_bytes == 0 {
            return Err(invalid("assets.max_image_bytes", "must be greater than 0"));
        }

        Ok(())
    }

    /// Returns the effective asset directory, using config or default.
    pub fn asset_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref dir) = self.paths.asset_directory {
            Ok(dir.clone())
        } else {
            Ok(Self::config_dir()?.join("assets"))
        }
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn positive_seconds(key: &str, value: f64) -> Result<Duration, ConfigError> {
    if value.is_nan() || value <= 0.0 {
        return Err(invalid(key, "must be a positive number of seconds"));
    }
    Duration::try_from_secs_f64(value).map_err(|e| invalid(key, &e.to_string()))
}

/// Everything a run needs, resolved from [`Config`] and command-line overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeOptions {
    pub rate_limit: RateLimit,
    pub host_limits: Vec<(String, RateLimit)>,
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub cookie_file: Option<PathBuf>,
    pub solve_challenges: bool,
    pub download_assets: bool,
    pub max_image_bytes: u64,
    pub output_directory: PathBuf,
    pub asset_directory: PathBuf,
    /// Keep only the first N chapters.
    pub chapter_limit: Option<usize>,
    /// Use this cover instead of the one on the landing page.
    pub cover_url: Option<String>,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            rate_limit: RateLimit::default(),
            host_limits: Vec::new(),
            max_concurrent: 3,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: Vec::new(),
            cookie_file: None,
            solve_challenges: true,
            download_assets: true,
            max_image_bytes: crate::assets::DEFAULT_MAX_IMAGE_BYTES,
            output_directory: PathBuf::from("."),
            asset_directory: std::env::temp_dir().join(APP_NAME).join("assets"),
            chapter_limit: None,
            cover_url: None,
        }
    }
}

impl ScrapeOptions {
    /// Validates `config` and converts it.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let scraping = &config.scraping;

        let host_limits = scraping
            .host_limits
            .iter()
            .map(|(host, limit)| {
                let interval = positive_seconds("scraping.host_limits", limit.interval_sec)?;
                Ok((host.clone(), RateLimit::new(limit.requests, interval)))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            rate_limit: RateLimit::new(
                scraping.requests_per_interval,
                positive_seconds("scraping.interval_sec", scraping.interval_sec)?,
            ),
            host_limits,
            max_concurrent: scraping.max_concurrent,
            retry: RetryPolicy::new(
                scraping.max_attempts,
                positive_seconds("scraping.backoff_base_sec", scraping.backoff_base_sec)?,
                positive_seconds("scraping.backoff_max_sec", scraping.backoff_max_sec)?,
            ),
            timeout: positive_seconds("scraping.timeout_sec", scraping.timeout_sec)?,
            user_agent: scraping.user_agent.clone(),
            headers: scraping
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            cookie_file: scraping.cookie_file.clone(),
            solve_challenges: scraping.solve_challenges,
            download_assets: config.assets.enabled,
            max_image_bytes: config.assets.max_image_bytes,
            output_directory: config.paths.output_directory.clone(),
            asset_directory: config.asset_dir()?,
            chapter_limit: None,
            cover_url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn with_asset_dir() -> Config {
        let mut config = Config::default();
        config.paths.asset_directory = Some(PathBuf::from("/tmp/webshelf-assets"));
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scraping.requests_per_interval, 5);
        assert_eq!(config.scraping.interval_sec, 1.0);
        assert_eq!(config.scraping.max_concurrent, 3);
        assert!(config.assets.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = Config::default();
        config.scraping.headers.insert("Referer".to_string(), "https://a.test/".to_string());
        config.scraping.host_limits.insert(
            "slow.test".to_string(),
            HostLimit {
                requests: 1,
                interval_sec: 2.0,
            },
        );
        config.scraping.cookie_file = Some(PathBuf::from("/tmp/cookies.txt"));
        let file = NamedTempFile::new().unwrap();

        config.save_to(file.path()).unwrap();

        let loaded = Config::load_from(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[scraping]\nmax_concurrent = 8\n").unwrap();

        let config = Config::load_from(file.path()).unwrap();

        assert_eq!(config.scraping.max_concurrent, 8);
        assert_eq!(config.scraping.max_attempts, 3);
        assert!(config.assets.enabled);
    }

    #[test]
    fn test_parse_error() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[scraping\n").unwrap();

        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.scraping.max_concurrent = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "scraping.max_concurrent"
        ));

        let mut config = Config::default();
        config.scraping.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scraping.requests_per_interval = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scraping.interval_sec = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scraping.interval_sec = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scraping.host_limits.insert(
            "a.test".to_string(),
            HostLimit {
                requests: 2,
                interval_sec: -1.0,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scrape_options_from_config() {
        let mut config = with_asset_dir();
        config.scraping.requests_per_interval = 2;
        config.scraping.interval_sec = 0.5;
        config.scraping.max_attempts = 4;
        config.scraping.host_limits.insert(
            "slow.test".to_string(),
            HostLimit {
                requests: 1,
                interval_sec: 3.0,
            },
        );
        config.assets.enabled = false;

        let options = ScrapeOptions::from_config(&config).unwrap();

        assert_eq!(options.rate_limit, RateLimit::new(2, Duration::from_millis(500)));
        assert_eq!(
            options.host_limits,
            vec![("slow.test".to_string(), RateLimit::new(1, Duration::from_secs(3)))]
        );
        assert_eq!(options.retry.max_attempts, 4);
        assert_eq!(options.retry.base_delay, Duration::from_secs(1));
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert!(!options.download_assets);
        assert_eq!(options.asset_directory, PathBuf::from("/tmp/webshelf-assets"));
        assert_eq!(options.chapter_limit, None);
    }

    #[test]
    fn test_scrape_options_reject_invalid_config() {
        let mut config = with_asset_dir();
        config.scraping.max_concurrent = 0;
        assert!(ScrapeOptions::from_config(&config).is_err());
    }
}
