use crate::taxonomy::TaxonomyError;
use thiserror::Error;

/// Errors returned by the component health boundary
#[derive(Error, Debug, Clone)]
pub enum BoundaryError {
    #[error("Component '{component}' is disabled, do not retry now")]
    Disabled { component: String },

    #[error("Component '{component}' is in error state, try again later")]
    Unavailable { component: String },

    #[error("{0}")]
    Failed(TaxonomyError),

    #[error("Resilience framework has been disposed")]
    Disposed,
}

impl BoundaryError {
    /// Whether the caller may retry the same call at a later time
    pub fn is_recoverable(&self) -> bool {
        match self {
            BoundaryError::Disabled { .. } => false,
            BoundaryError::Unavailable { .. } => true,
            BoundaryError::Failed(error) => error.recoverable,
            BoundaryError::Disposed => false,
        }
    }

    /// The underlying taxonomy error, if the primary operation actually ran and failed
    pub fn taxonomy_error(&self) -> Option<&TaxonomyError> {
        match self {
            BoundaryError::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Errors raised by error handlers and recoverers
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Recovery not supported: {0}")]
    Unsupported(String),

    #[error("Provider failure: {0}")]
    ProviderFailed(String),
}

/// Errors that can occur when delivering a user notification
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
