/// Circuit breaker wrapping operations per named component
pub mod boundary;

/// Component health records and system summary
pub mod health;

pub use boundary::{ComponentBoundary, FatalOrigin, FatalSink};
pub use health::{ComponentHealth, HealthStatus, SystemStatusSummary};
