/// Error dispatcher, statistics and user notifications
pub mod dispatcher;
pub mod notifier;
pub mod statistics;

pub use dispatcher::{CategoryTable, ErrorDispatcher, HandleOptions, WeakDispatcher};
pub use notifier::{LogNotifier, Notification, NotificationSeverity, Notifier, RecordingNotifier};
pub use statistics::ErrorStatistics;
