use crate::error::ConfigError;
use crate::taxonomy::ErrorLevel;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the resilience framework
///
/// Every field has a default, so an empty TOML document is a valid configuration.
///
/// # Example
///
/// ```
/// use sentinel::config::ResilienceConfig;
///
/// let config = ResilienceConfig::from_toml_str(
///     "[boundary]\nmax_consecutive_errors = 3\n",
/// ).unwrap();
/// assert_eq!(config.boundary.max_consecutive_errors, 3);
/// assert_eq!(config.dispatcher.debounce_ms, 1000);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    pub dispatcher: DispatcherConfig,
    pub filesystem: FileSystemConfig,
    pub parsing: ParsingConfig,
    pub provider: ProviderConfig,
    pub boundary: BoundaryConfig,
}

/// Logging, notification and debouncing behavior of the error dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub log_errors: bool,
    pub show_notifications: bool,
    /// Minimum level that gets logged
    pub log_threshold: ErrorLevel,
    /// Minimum level that gets shown to the user
    pub notification_threshold: ErrorLevel,
    /// Window in which identical errors are coalesced
    pub debounce_ms: u64,
    /// Offer a "show details" action on critical notifications
    pub show_details_on_critical: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            log_errors: true,
            show_notifications: true,
            log_threshold: ErrorLevel::Info,
            notification_threshold: ErrorLevel::Error,
            debounce_ms: 1000,
            show_details_on_critical: true,
        }
    }
}

impl DispatcherConfig {
    pub fn debounce_time(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Filesystem recoverer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileSystemConfig {
    pub auto_recovery: bool,
    pub auto_create_file: bool,
    pub auto_create_directory: bool,
    pub max_retries: u32,
    pub retry_interval_ms: u64,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            auto_recovery: true,
            auto_create_file: true,
            auto_create_directory: true,
            max_retries: 3,
            retry_interval_ms: 1000,
        }
    }
}

impl FileSystemConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Parsing recoverer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParsingConfig {
    pub auto_fix: bool,
    pub fallback_parsing: bool,
    pub max_retries: u32,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            auto_fix: true,
            fallback_parsing: true,
            max_retries: 3,
        }
    }
}

/// Provider recoverer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub auto_recovery: bool,
    /// Allow decoration providers to degrade instead of failing
    pub degraded_mode: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            auto_recovery: true,
            degraded_mode: true,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl ProviderConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Circuit breaker settings of the component health boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoundaryConfig {
    pub max_consecutive_errors: u32,
    pub recovery_interval_ms: u64,
    pub degraded_mode_timeout_ms: u64,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 5,
            recovery_interval_ms: 5000,
            degraded_mode_timeout_ms: 30000,
        }
    }
}

impl BoundaryConfig {
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    pub fn degraded_mode_timeout(&self) -> Duration {
        Duration::from_millis(self.degraded_mode_timeout_ms)
    }
}

impl ResilienceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ResilienceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given and present, otherwise fall back to defaults
    ///
    /// A missing file only produces a warning; a file that exists but fails to
    /// parse or validate is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if path.exists() => Self::from_file(path),
            Some(path) => {
                warn!(
                    "Configuration file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Serialize the configuration back to TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Check that every numeric knob is within its supported range
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::check_retries("filesystem.max_retries", self.filesystem.max_retries)?;
        Self::check_retries("parsing.max_retries", self.parsing.max_retries)?;
        Self::check_retries("provider.max_retries", self.provider.max_retries)?;

        if !(1..=100).contains(&self.boundary.max_consecutive_errors) {
            return Err(ConfigError::ValidationError(format!(
                "boundary.max_consecutive_errors must be between 1 and 100, got {}",
                self.boundary.max_consecutive_errors
            )));
        }

        if self.boundary.recovery_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "boundary.recovery_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.boundary.degraded_mode_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "boundary.degraded_mode_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.dispatcher.notification_threshold < self.dispatcher.log_threshold {
            warn!(
                "Notification threshold ({}) is below log threshold ({}); some notified errors will not be logged",
                self.dispatcher.notification_threshold, self.dispatcher.log_threshold
            );
        }

        Ok(())
    }

    fn check_retries(name: &str, value: u32) -> Result<(), ConfigError> {
        if (1..=10).contains(&value) {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(format!(
                "{} must be between 1 and 10, got {}",
                name, value
            )))
        }
    }
}
