//! Configuration management for listing-watcher
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Search definitions, one polling loop each
    #[serde(default)]
    pub searches: Vec<SearchConfig>,

    /// Listing source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Handler retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix LISTING_WATCHER_
    ///
    /// Search definitions are read from `LISTING_WATCHER_SEARCHES` as an inline
    /// YAML (or JSON) sequence.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(searches) = std::env::var("LISTING_WATCHER_SEARCHES") {
            config.searches = serde_yaml::from_str(&expand_env_vars(&searches)).map_err(|e| {
                ConfigError::Parse(format!("Failed to parse LISTING_WATCHER_SEARCHES: {}", e))
            })?;
        }

        // Source config from env
        if let Ok(endpoint) = std::env::var("LISTING_WATCHER_SOURCE_ENDPOINT") {
            config.source.endpoint = endpoint;
        }
        if let Ok(verify) = std::env::var("LISTING_WATCHER_SOURCE_VERIFY_TLS") {
            config.source.verify_tls = verify.parse().map_err(|_| {
                ConfigError::Parse(format!("Invalid TLS verification flag: {}", verify))
            })?;
        }

        // Retry / scheduler config from env
        if let Ok(attempts) = std::env::var("LISTING_WATCHER_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid retry max attempts".to_string()))?;
        }
        if let Ok(backoff) = std::env::var("LISTING_WATCHER_RETRY_INITIAL_BACKOFF_MS") {
            config.retry.initial_backoff_ms = backoff
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid retry initial backoff".to_string()))?;
        }
        if let Ok(stagger) = std::env::var("LISTING_WATCHER_SCHEDULER_STAGGER_SECS") {
            config.scheduler.stagger_secs = stagger
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid stagger seconds".to_string()))?;
        }

        // Database config from env
        if let Ok(path) = std::env::var("LISTING_WATCHER_DATABASE_PATH") {
            config.database.path = path;
        }

        // Logging config from env
        if let Ok(level) = std::env::var("LISTING_WATCHER_LOG_LEVEL") {
            config.logging.level = level;
        }

        // OTEL config from env
        if let Ok(enabled) = std::env::var("LISTING_WATCHER_OTEL_ENABLED") {
            config.otel.enabled = enabled.parse().map_err(|_| {
                ConfigError::Parse(format!("Invalid OTEL enabled flag: {}", enabled))
            })?;
        }
        if let Ok(endpoint) = std::env::var("LISTING_WATCHER_OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for search in &self.searches {
            if search.name.trim().is_empty() {
                return Err(ConfigError::MissingRequired("searches[].name".to_string()));
            }
            if !names.insert(search.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate search name: {}",
                    search.name
                )));
            }
            if let HandlerConfig::Webhook { url, .. } = &search.handler {
                if url.trim().is_empty() {
                    return Err(ConfigError::MissingRequired(format!(
                        "searches[{}].handler.url",
                        search.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// A single configured search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Unique search name, used in logs and as the task name
    pub name: String,

    /// Query parameters forwarded verbatim to the listing source
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    /// Target time between the starts of two polls, in seconds
    #[serde(default = "default_search_delay")]
    pub delay_secs: u64,

    /// Optional proxy URL for this search's source client
    #[serde(default)]
    pub proxy: Option<String>,

    /// Handler invoked for every new listing
    #[serde(default)]
    pub handler: HandlerConfig,
}

fn default_search_delay() -> u64 {
    60
}

/// Built-in handler selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerConfig {
    /// Log every new listing
    #[default]
    Log,

    /// POST every new listing as JSON to a URL
    Webhook {
        /// Target URL
        url: String,

        /// Extra request headers
        #[serde(default)]
        headers: HashMap<String, String>,

        /// Request timeout in seconds
        #[serde(default = "default_webhook_timeout")]
        timeout_secs: u64,
    },
}

fn default_webhook_timeout() -> u64 {
    10
}

/// Listing source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Search endpoint URL
    #[serde(default = "default_source_endpoint")]
    pub endpoint: String,

    /// Whether to verify TLS certificates
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Request timeout in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of listings requested per poll
    #[serde(default = "default_source_limit")]
    pub limit: u32,

    /// Wait time when rate limited without a Retry-After header (in seconds)
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_source_endpoint(),
            verify_tls: default_verify_tls(),
            timeout_secs: default_source_timeout(),
            limit: default_source_limit(),
            rate_limit_wait_secs: default_rate_limit_wait(),
        }
    }
}

fn default_source_endpoint() -> String {
    "http://127.0.0.1:8080/search".to_string()
}

fn default_verify_tls() -> bool {
    true
}

fn default_source_timeout() -> u64 {
    30
}

fn default_source_limit() -> u32 {
    35
}

fn default_rate_limit_wait() -> u64 {
    60
}

/// Retry configuration for handler invocations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of handler attempts per listing (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds; doubles afterwards
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    2000
}

/// Configuration for the search scheduler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Delay between launching two consecutive search loops (seconds)
    #[serde(default = "default_stagger")]
    pub stagger_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stagger_secs: default_stagger(),
        }
    }
}

fn default_stagger() -> u64 {
    5
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "listing-watcher.db".to_string()
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "listing-watcher".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
