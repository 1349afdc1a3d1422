use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Health state of a component
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Normal,
    /// Running on a fallback path
    Degraded,
    /// Circuit open; waiting for recovery
    Error,
    /// Administratively switched off; only manual recovery turns it back on
    Disabled,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Normal => "normal",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Error => "error",
            HealthStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health record of one named component
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_error_time: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub enabled: bool,
    pub degraded_mode_start_time: Option<DateTime<Utc>>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Normal,
            last_error_time: None,
            consecutive_errors: 0,
            total_errors: 0,
            enabled: true,
            degraded_mode_start_time: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Normal
    }

    pub(crate) fn record_failure(&mut self) {
        self.consecutive_errors += 1;
        self.total_errors += 1;
        self.last_error_time = Some(Utc::now());
    }

    pub(crate) fn enter_degraded(&mut self) {
        self.status = HealthStatus::Degraded;
        if self.degraded_mode_start_time.is_none() {
            self.degraded_mode_start_time = Some(Utc::now());
        }
    }

    pub(crate) fn enter_error(&mut self) {
        self.status = HealthStatus::Error;
        self.enabled = false;
        self.degraded_mode_start_time = None;
    }

    pub(crate) fn disable(&mut self) {
        self.status = HealthStatus::Disabled;
        self.enabled = false;
        self.degraded_mode_start_time = None;
    }

    /// Back to Normal; failures keep counting toward the threshold
    pub(crate) fn leave_degraded(&mut self) {
        self.status = HealthStatus::Normal;
        self.degraded_mode_start_time = None;
    }

    /// Back to Normal with a clean consecutive error count
    pub(crate) fn restore(&mut self) {
        self.status = HealthStatus::Normal;
        self.enabled = true;
        self.consecutive_errors = 0;
        self.degraded_mode_start_time = None;
    }
}

/// Aggregate view over every registered component
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemStatusSummary {
    pub healthy: usize,
    pub degraded: usize,
    pub error: usize,
    pub disabled: usize,
    pub total: usize,
    /// No component is in Error or Disabled status
    pub overall_healthy: bool,
}

impl SystemStatusSummary {
    pub fn from_components<'a, I>(components: I) -> Self
    where
        I: IntoIterator<Item = &'a ComponentHealth>,
    {
        let mut summary = SystemStatusSummary::default();
        for health in components {
            summary.total += 1;
            match health.status {
                HealthStatus::Normal => summary.healthy += 1,
                HealthStatus::Degraded => summary.degraded += 1,
                HealthStatus::Error => summary.error += 1,
                HealthStatus::Disabled => summary.disabled += 1,
            }
        }
        summary.overall_healthy = summary.error == 0 && summary.disabled == 0;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_component_is_normal_and_enabled() {
        let health = ComponentHealth::new("tasks");
        assert_eq!(health.status, HealthStatus::Normal);
        assert!(health.enabled);
        assert!(health.is_healthy());
        assert_eq!(health.consecutive_errors, 0);
    }

    #[test]
    fn test_error_implies_disabled() {
        let mut health = ComponentHealth::new("tasks");
        health.record_failure();
        health.enter_degraded();
        assert!(health.degraded_mode_start_time.is_some());

        health.enter_error();
        assert_eq!(health.status, HealthStatus::Error);
        assert!(!health.enabled);
        assert!(health.degraded_mode_start_time.is_none());

        health.restore();
        assert!(health.enabled);
        assert_eq!(health.consecutive_errors, 0);
        assert_eq!(health.total_errors, 1);
    }

    #[test]
    fn test_leaving_degraded_mode_keeps_failure_count() {
        let mut health = ComponentHealth::new("tasks");
        health.record_failure();
        health.record_failure();
        health.enter_degraded();

        health.leave_degraded();
        assert_eq!(health.status, HealthStatus::Normal);
        assert!(health.enabled);
        assert!(health.degraded_mode_start_time.is_none());
        assert_eq!(health.consecutive_errors, 2);
    }

    #[test]
    fn test_summary_counts() {
        let mut degraded = ComponentHealth::new("b");
        degraded.enter_degraded();
        let mut failed = ComponentHealth::new("c");
        failed.enter_error();

        let summary =
            SystemStatusSummary::from_components(&[ComponentHealth::new("a"), degraded.clone()]);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.degraded, 1);
        assert!(summary.overall_healthy);

        let summary = SystemStatusSummary::from_components(&[degraded, failed]);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.error, 1);
        assert!(!summary.overall_healthy);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(ComponentHealth::new("x")).unwrap();
        assert_eq!(json["status"], "normal");
    }
}
