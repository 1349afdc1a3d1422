/// Error types for the resilience framework
pub mod error;

/// Leveled, categorized error values
pub mod taxonomy;

/// Timer scheduling abstraction
pub mod clock;

/// Error dispatcher with debouncing, statistics and notifications
pub mod dispatcher;

/// Category recoverers for filesystem, parsing and provider failures
pub mod recovery;

/// Per-component circuit breaker and degraded mode
pub mod boundary;

/// Configuration management
pub mod config;

/// Owned registry wiring every subsystem together
pub mod framework;

// Re-export commonly used types
pub use boundary::{ComponentBoundary, ComponentHealth, FatalSink, HealthStatus, SystemStatusSummary};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::ResilienceConfig;
pub use dispatcher::{ErrorDispatcher, ErrorStatistics, HandleOptions, Notifier};
pub use error::{BoundaryError, ConfigError, NotifyError, RecoveryError};
pub use framework::ResilienceFramework;
pub use recovery::SafeResult;
pub use taxonomy::{ErrorCategory, ErrorLevel, RecoveryStrategy, TaxonomyError};
