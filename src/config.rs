//! Configuration management for Cliniq
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, StreamFailure, CliniqError};
use crate::stream::AnswerMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for Cliniq
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Generation service connection settings
    #[serde(default)]
    pub service: ServiceConfig,
    /// Conversation session behavior
    #[serde(default)]
    pub session: SessionConfig,
    /// Feedback prompt scheduling
    #[serde(default)]
    pub feedback: FeedbackConfig,
    /// Question quota display
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Thread store location
    #[serde(default)]
    pub storage: StorageConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Streaming endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Connect timeout and maximum silence between streamed chunks (seconds)
    #[serde(default = "default_service_timeout")]
    pub timeout_seconds: u64,

    /// Answer mode sent with every request
    #[serde(default)]
    pub mode: AnswerMode,

    /// Locale sent with every request, if any
    #[serde(default)]
    pub locale: Option<String>,
}

fn default_endpoint() -> String {
    "http://localhost:8000/api/stream".to_string()
}

fn default_service_timeout() -> u64 {
    60
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_seconds: default_service_timeout(),
            mode: AnswerMode::default(),
            locale: None,
        }
    }
}

/// Session behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lower bound of the delay before a failure fallback is shown (ms)
    #[serde(default = "default_failure_delay_min")]
    pub failure_delay_min_ms: u64,

    /// Upper bound of the delay before a failure fallback is shown (ms)
    #[serde(default = "default_failure_delay_max")]
    pub failure_delay_max_ms: u64,

    /// Texts shown in place of an answer when a stream fails
    #[serde(default)]
    pub fallback: FallbackMessages,
}

fn default_failure_delay_min() -> u64 {
    2000
}

fn default_failure_delay_max() -> u64 {
    3000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            failure_delay_min_ms: default_failure_delay_min(),
            failure_delay_max_ms: default_failure_delay_max(),
            fallback: FallbackMessages::default(),
        }
    }
}

impl SessionConfig {
    /// Inclusive range of the randomized failure delay
    pub fn failure_delay_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.failure_delay_min_ms),
            Duration::from_millis(self.failure_delay_max_ms),
        )
    }
}

/// Fallback answer texts by failure kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackMessages {
    #[serde(default = "default_rate_limited_message")]
    pub rate_limited: String,

    #[serde(default = "default_offline_message")]
    pub offline: String,

    #[serde(default = "default_server_error_message")]
    pub server_error: String,
}

fn default_rate_limited_message() -> String {
    "You've reached your question limit for now. Upgrade your plan to keep asking questions without interruption."
        .to_string()
}

fn default_offline_message() -> String {
    "You appear to be offline. Please check your internet connection and try again.".to_string()
}

fn default_server_error_message() -> String {
    "We're experiencing unusually high demand right now. Please try your question again in a moment."
        .to_string()
}

impl Default for FallbackMessages {
    fn default() -> Self {
        Self {
            rate_limited: default_rate_limited_message(),
            offline: default_offline_message(),
            server_error: default_server_error_message(),
        }
    }
}

impl FallbackMessages {
    /// Selects the fallback text for a failure kind
    pub fn for_failure(&self, kind: StreamFailure) -> &str {
        match kind {
            StreamFailure::RateLimited => &self.rate_limited,
            StreamFailure::Offline => &self.offline,
            StreamFailure::ServerError => &self.server_error,
        }
    }
}

/// Feedback prompt configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Delay between a qualifying event and the prompt (seconds)
    #[serde(default = "default_prompt_delay")]
    pub prompt_delay_seconds: u64,

    /// Prompt again every this many questions once shown
    #[serde(default = "default_every_n_questions")]
    pub every_n_questions: u32,

    /// Whether the initial prompt was already shown in an earlier session
    #[serde(default)]
    pub initial_shown: bool,
}

fn default_prompt_delay() -> u64 {
    75
}

fn default_every_n_questions() -> u32 {
    4
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            prompt_delay_seconds: default_prompt_delay(),
            every_n_questions: default_every_n_questions(),
            initial_shown: false,
        }
    }
}

/// Quota display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Remaining questions at or below which the quota is "nearly exhausted"
    #[serde(default = "default_low_water")]
    pub low_water: u64,
}

fn default_low_water() -> u64 {
    5
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            low_water: default_low_water(),
        }
    }
}

/// Thread store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database directory; defaults to the platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolves the database directory
    ///
    /// # Errors
    ///
    /// Returns `CliniqError::Storage` when no path is configured and the
    /// platform data directory cannot be determined.
    pub fn resolve_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let dirs = directories::ProjectDirs::from("com", "cliniq", "cliniq")
            .ok_or_else(|| CliniqError::Storage("Could not determine data directory".into()))?;
        Ok(dirs.data_dir().join("threads.db"))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Also append logs to this file
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "cliniq=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CliniqError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| CliniqError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(endpoint) = std::env::var("CLINIQ_ENDPOINT") {
            self.service.endpoint = endpoint;
        }

        if let Ok(timeout) = std::env::var("CLINIQ_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.service.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid CLINIQ_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(mode) = std::env::var("CLINIQ_MODE") {
            match mode.parse() {
                Ok(value) => self.service.mode = value,
                Err(e) => tracing::warn!("Invalid CLINIQ_MODE: {}", e),
            }
        }

        if let Ok(locale) = std::env::var("CLINIQ_LOCALE") {
            self.service.locale = Some(locale).filter(|l| !l.trim().is_empty());
        }

        if let Ok(path) = std::env::var("CLINIQ_STORE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }

        if let Ok(level) = std::env::var("CLINIQ_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json) = std::env::var("CLINIQ_JSON_LOGS") {
            self.logging.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(endpoint) = &cli.endpoint {
            self.service.endpoint = endpoint.clone();
        }
        if let Some(store) = &cli.store {
            self.storage.path = Some(store.clone());
        }
        if cli.verbose {
            self.logging.level = "cliniq=debug".to_string();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `CliniqError::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.service.endpoint.trim().is_empty() {
            return Err(CliniqError::Config("service.endpoint cannot be empty".to_string()).into());
        }

        let endpoint = url::Url::parse(&self.service.endpoint).map_err(|e| {
            CliniqError::Config(format!(
                "service.endpoint is not a valid URL ({}): {}",
                self.service.endpoint, e
            ))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(CliniqError::Config(format!(
                "service.endpoint must use http or https, got {}",
                endpoint.scheme()
            ))
            .into());
        }

        if self.service.timeout_seconds == 0 {
            return Err(CliniqError::Config(
                "service.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.failure_delay_min_ms > self.session.failure_delay_max_ms {
            return Err(CliniqError::Config(
                "session.failure_delay_min_ms must not exceed failure_delay_max_ms".to_string(),
            )
            .into());
        }

        if self.feedback.every_n_questions == 0 {
            return Err(CliniqError::Config(
                "feedback.every_n_questions must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cli() -> crate::cli::Cli {
        crate::cli::Cli {
            config: None,
            verbose: false,
            endpoint: None,
            store: None,
            command: crate::cli::Commands::History {
                conversation: "c1".to_string(),
                json: false,
            },
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.endpoint, "http://localhost:8000/api/stream");
        assert_eq!(config.service.mode, AnswerMode::Research);
        assert_eq!(config.session.failure_delay_min_ms, 2000);
        assert_eq!(config.session.failure_delay_max_ms, 3000);
        assert_eq!(config.feedback.prompt_delay_seconds, 75);
        assert_eq!(config.feedback.every_n_questions, 4);
        assert_eq!(config.quota.low_water, 5);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_endpoint() {
        let mut config = Config::default();
        config.service.endpoint = "localhost:8000".to_string();
        assert!(config.validate().is_err());

        config.service.endpoint = String::new();
        assert!(config.validate().is_err());

        config.service.endpoint = "ftp://example.org/stream".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = Config::default();
        config.service.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_inverted_delay() {
        let mut config = Config::default();
        config.session.failure_delay_min_ms = 4000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_interval() {
        let mut config = Config::default();
        config.feedback.every_n_questions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
service:
  endpoint: https://answers.example.org/stream
  timeout_seconds: 30
  mode: instant
  locale: en-GB
session:
  failure_delay_min_ms: 0
  failure_delay_max_ms: 10
  fallback:
    offline: "No connection."
feedback:
  prompt_delay_seconds: 10
  every_n_questions: 2
quota:
  low_water: 3
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.service.mode, AnswerMode::Instant);
        assert_eq!(config.service.locale.as_deref(), Some("en-GB"));
        assert_eq!(config.session.fallback.offline, "No connection.");
        assert_eq!(
            config.session.fallback.server_error,
            default_server_error_message()
        );
        assert_eq!(config.feedback.every_n_questions, 2);
        assert_eq!(config.quota.low_water, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fallback_selection() {
        let fallback = FallbackMessages::default();
        assert!(fallback
            .for_failure(StreamFailure::RateLimited)
            .contains("Upgrade"));
        assert!(fallback.for_failure(StreamFailure::Offline).contains("offline"));
        assert!(fallback
            .for_failure(StreamFailure::ServerError)
            .contains("high demand"));
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let config = Config::load("nonexistent.yaml", &cli()).unwrap();
        assert_eq!(config.feedback.prompt_delay_seconds, 75);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("CLINIQ_ENDPOINT", "https://env.example.org/stream");
        std::env::set_var("CLINIQ_MODE", "instant");
        std::env::set_var("CLINIQ_TIMEOUT_SECONDS", "not-a-number");
        std::env::set_var("CLINIQ_JSON_LOGS", "true");

        let config = Config::load("nonexistent.yaml", &cli()).unwrap();

        std::env::remove_var("CLINIQ_ENDPOINT");
        std::env::remove_var("CLINIQ_MODE");
        std::env::remove_var("CLINIQ_TIMEOUT_SECONDS");
        std::env::remove_var("CLINIQ_JSON_LOGS");

        assert_eq!(config.service.endpoint, "https://env.example.org/stream");
        assert_eq!(config.service.mode, AnswerMode::Instant);
        assert_eq!(config.service.timeout_seconds, 60);
        assert!(config.logging.json);
    }

    #[test]
    #[serial]
    fn test_cli_overrides_win_over_env() {
        std::env::set_var("CLINIQ_ENDPOINT", "https://env.example.org/stream");
        let mut args = cli();
        args.endpoint = Some("https://cli.example.org/stream".to_string());
        args.store = Some(PathBuf::from("/tmp/cliniq-test-store"));
        args.verbose = true;

        let config = Config::load("nonexistent.yaml", &args).unwrap();
        std::env::remove_var("CLINIQ_ENDPOINT");

        assert_eq!(config.service.endpoint, "https://cli.example.org/stream");
        assert_eq!(
            config.storage.resolve_path().unwrap(),
            PathBuf::from("/tmp/cliniq-test-store")
        );
        assert_eq!(config.logging.level, "cliniq=debug");
    }
}
