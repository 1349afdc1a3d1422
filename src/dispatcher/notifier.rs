use crate::error::NotifyError;
use crate::taxonomy::{ErrorLevel, TaxonomyError};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Mutex;

const MAX_TITLE_LENGTH: usize = 256;
const MAX_BODY_LENGTH: usize = 1024;

/// User-facing severity of a notification
///
/// The host UI only knows three severities, so `critical` errors are shown as
/// `error` notifications with a "show details" affordance.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSeverity {
    Info,
    Warning,
    Error,
}

impl From<ErrorLevel> for NotificationSeverity {
    fn from(level: ErrorLevel) -> Self {
        match level {
            ErrorLevel::Info => NotificationSeverity::Info,
            ErrorLevel::Warning => NotificationSeverity::Warning,
            ErrorLevel::Error | ErrorLevel::Critical => NotificationSeverity::Error,
        }
    }
}

/// A message shown to the user
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub severity: NotificationSeverity,
    pub title: String,
    pub body: String,
    /// Full error dump offered behind a "show details" action
    pub details: Option<String>,
}

impl Notification {
    /// Build the notification for an error
    ///
    /// `offer_details` only has an effect for critical errors.
    pub fn from_error(error: &TaxonomyError, offer_details: bool) -> Self {
        let title = match error.component() {
            Some(component) => format!("{} ({})", error.message, component),
            None => error.message.clone(),
        };

        let mut body = format!("{} error", error.category());
        if let Some(operation) = error.operation() {
            body.push_str(&format!(" during {}", operation));
        }
        if let Some(resource) = error.resource() {
            body.push_str(&format!(" on {}", resource));
        }
        if error.recoverable {
            body.push_str(&format!(". Recovery strategy: {}", error.strategy));
        }

        let details = if offer_details && error.level == ErrorLevel::Critical {
            Some(error.details())
        } else {
            None
        };

        Self {
            severity: NotificationSeverity::from(error.level),
            title: truncate_text(&title, MAX_TITLE_LENGTH),
            body: truncate_text(&body, MAX_BODY_LENGTH),
            details,
        }
    }

    /// Whether the notification offers a "show details" action
    pub fn has_details(&self) -> bool {
        self.details.is_some()
    }
}

/// Delivers notifications to the user
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier that writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification.severity {
            NotificationSeverity::Info => info!("{}: {}", notification.title, notification.body),
            NotificationSeverity::Warning => {
                warn!("{}: {}", notification.title, notification.body)
            }
            NotificationSeverity::Error => {
                error!("{}: {}", notification.title, notification.body)
            }
        }
        Ok(())
    }
}

/// Notifier that keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

/// Truncate text to a maximum byte length, respecting UTF-8 boundaries
pub(crate) fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }

    let mut truncate_at = max_length.saturating_sub(3);
    while truncate_at > 0 && !text.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }
    format!("{}...", &text[..truncate_at])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::ProviderType;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(
            NotificationSeverity::from(ErrorLevel::Info),
            NotificationSeverity::Info
        );
        assert_eq!(
            NotificationSeverity::from(ErrorLevel::Warning),
            NotificationSeverity::Warning
        );
        assert_eq!(
            NotificationSeverity::from(ErrorLevel::Error),
            NotificationSeverity::Error
        );
        assert_eq!(
            NotificationSeverity::from(ErrorLevel::Critical),
            NotificationSeverity::Error
        );
    }

    #[test]
    fn test_critical_errors_offer_details() {
        let error = TaxonomyError::unknown("host crashed").with_level(ErrorLevel::Critical);
        let notification = Notification::from_error(&error, true);
        assert_eq!(notification.severity, NotificationSeverity::Error);
        assert!(notification.has_details());

        let notification = Notification::from_error(&error, false);
        assert!(!notification.has_details());

        let error = TaxonomyError::unknown("plain error");
        let notification = Notification::from_error(&error, true);
        assert!(!notification.has_details());
    }

    #[test]
    fn test_notification_text() {
        let error = TaxonomyError::provider("Decorations failed", ProviderType::Decoration)
            .with_component("decorations")
            .with_operation("render");
        let notification = Notification::from_error(&error, true);

        assert_eq!(notification.title, "Decorations failed (decorations)");
        assert_eq!(
            notification.body,
            "provider error during render. Recovery strategy: retry"
        );
    }

    #[test]
    fn test_truncate_text_respects_char_boundaries() {
        assert_eq!(truncate_text("short", 10), "short");

        let long = "é".repeat(20);
        let truncated = truncate_text(&long, 10);
        assert!(truncated.len() <= 10);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        let error = TaxonomyError::unknown("boom");
        notifier
            .notify(&Notification::from_error(&error, false))
            .unwrap();

        assert_eq!(notifier.count(), 1);
        assert_eq!(notifier.notifications()[0].title, "boom");

        notifier.clear();
        assert_eq!(notifier.count(), 0);
    }

    #[test]
    fn test_mock_notifier() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|n| n.severity == NotificationSeverity::Warning)
            .times(1)
            .returning(|_| Ok(()));

        let error = TaxonomyError::parsing("bad checkbox", None);
        assert!(notifier
            .notify(&Notification::from_error(&error, false))
            .is_ok());
    }
}
