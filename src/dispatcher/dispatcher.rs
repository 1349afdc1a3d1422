use crate::clock::{self, Clock, TimerHandle};
use crate::config::DispatcherConfig;
use crate::dispatcher::notifier::{Notification, Notifier};
use crate::dispatcher::statistics::ErrorStatistics;
use crate::error::RecoveryError;
use crate::recovery::{ErrorHandler, Recoverer};
use crate::taxonomy::{ErrorCategory, ErrorLevel, TaxonomyError};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

/// Per-call options for [`ErrorDispatcher::handle_error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleOptions {
    /// Allow a user notification for this error
    pub notify: bool,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self { notify: true }
    }
}

impl HandleOptions {
    /// Options that suppress the user notification
    pub fn silent() -> Self {
        Self { notify: false }
    }
}

/// One list of entries per error category
///
/// Lookups index directly by category, so routing never inspects error types.
pub struct CategoryTable<T> {
    slots: [Vec<T>; ErrorCategory::ALL.len()],
}

impl<T> Default for CategoryTable<T> {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| Vec::new()),
        }
    }
}

impl<T> CategoryTable<T> {
    pub fn push(&mut self, category: ErrorCategory, entry: T) {
        self.slots[category.index()].push(entry);
    }

    pub fn get(&self, category: ErrorCategory) -> &[T] {
        &self.slots[category.index()]
    }

    pub fn len(&self, category: ErrorCategory) -> usize {
        self.slots[category.index()].len()
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.clear();
        }
    }
}

struct DispatcherState {
    handlers: CategoryTable<Arc<dyn ErrorHandler>>,
    recoverers: CategoryTable<Arc<dyn Recoverer>>,
    statistics: ErrorStatistics,
    /// Debounce timers keyed by error identity
    pending: HashMap<String, TimerHandle>,
    processed: u64,
    disposed: bool,
}

struct Shared {
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<DispatcherState>,
}

/// Central routing service for taxonomy errors
///
/// Every reported error is counted immediately. Processing (logging,
/// notification, handlers, recoverers) happens once the debounce window for
/// the error's identity key closes, so a burst of identical errors produces a
/// single processed outcome.
///
/// The dispatcher is a cheap handle; clones share the same registries.
#[derive(Clone)]
pub struct ErrorDispatcher {
    shared: Arc<Shared>,
}

impl ErrorDispatcher {
    pub fn new(
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                clock,
                notifier,
                state: Mutex::new(DispatcherState {
                    handlers: CategoryTable::default(),
                    recoverers: CategoryTable::default(),
                    statistics: ErrorStatistics::new(),
                    pending: HashMap::new(),
                    processed: 0,
                    disposed: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Non-owning handle, for collaborators the dispatcher itself keeps alive
    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher(Arc::downgrade(&self.shared))
    }

    /// Register a handler for `category`; handlers run in registration order
    pub fn register_handler(&self, category: ErrorCategory, handler: Arc<dyn ErrorHandler>) {
        debug!("Registering handler '{}' for {}", handler.name(), category);
        self.shared.lock().handlers.push(category, handler);
    }

    /// Register a recoverer for `category`; recoverers are tried in registration order
    pub fn register_recoverer(&self, category: ErrorCategory, recoverer: Arc<dyn Recoverer>) {
        debug!("Registering recoverer '{}' for {}", recoverer.name(), category);
        self.shared.lock().recoverers.push(category, recoverer);
    }

    pub fn handler_count(&self, category: ErrorCategory) -> usize {
        self.shared.lock().handlers.len(category)
    }

    pub fn recoverer_count(&self, category: ErrorCategory) -> usize {
        self.shared.lock().recoverers.len(category)
    }

    /// Report an error
    ///
    /// Statistics are updated before this returns. Processing is scheduled on
    /// the clock after the debounce window; reporting an error with the same
    /// identity key before the window closes restarts the window.
    pub fn handle_error(&self, error: TaxonomyError, options: HandleOptions) {
        let key = error.identity_key();
        let mut state = self.shared.lock();
        if state.disposed {
            debug!("Ignoring error after disposal: {}", error.message);
            return;
        }

        state.statistics.record(&error);

        if let Some(previous) = state.pending.remove(&key) {
            self.shared.clock.cancel(previous);
            debug!("Debounced repeated error: {}", key);
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let timer_key = key.clone();
        let handle = self.shared.clock.after(
            self.shared.config.debounce_time(),
            clock::callback(move || async move {
                if let Some(shared) = weak.upgrade() {
                    Shared::process(shared, timer_key, error, options).await;
                }
            }),
        );
        state.pending.insert(key, handle);
    }

    pub fn get_statistics(&self) -> ErrorStatistics {
        self.shared.lock().statistics.clone()
    }

    pub fn reset_statistics(&self) {
        self.shared.lock().statistics.reset();
    }

    /// Number of debounce windows still open
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Number of errors that went through full processing
    pub fn processed_count(&self) -> u64 {
        self.shared.lock().processed
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    /// Cancel every pending timer and clear every registry
    ///
    /// Errors reported afterwards are ignored.
    pub fn dispose(&self) {
        let mut state = self.shared.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        for (_, handle) in state.pending.drain() {
            self.shared.clock.cancel(handle);
        }
        state.handlers.clear();
        state.recoverers.clear();
        state.statistics.reset();
        info!("Error dispatcher disposed");
    }
}

/// Weak reference to an [`ErrorDispatcher`]
#[derive(Clone, Default)]
pub struct WeakDispatcher(Weak<Shared>);

impl WeakDispatcher {
    pub fn upgrade(&self) -> Option<ErrorDispatcher> {
        self.0.upgrade().map(|shared| ErrorDispatcher { shared })
    }

    /// Report through the dispatcher if it is still alive
    pub fn report(&self, error: TaxonomyError, options: HandleOptions) {
        match self.upgrade() {
            Some(dispatcher) => dispatcher.handle_error(error, options),
            None => debug!("Dispatcher gone, dropping error: {}", error.message),
        }
    }
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn process(
        shared: Arc<Shared>,
        key: String,
        error: TaxonomyError,
        options: HandleOptions,
    ) {
        let (handlers, recoverers) = {
            let mut state = shared.lock();
            if state.disposed {
                return;
            }
            state.pending.remove(&key);
            state.processed += 1;
            let category = error.category();
            (
                state.handlers.get(category).to_vec(),
                state.recoverers.get(category).to_vec(),
            )
        };

        shared.log_error(&error);
        shared.notify(&error, options);

        for handler in handlers.into_iter().filter(|h| h.can_handle(&error)) {
            let name = handler.name().to_string();
            let err = error.clone();
            let outcome = isolate(async move { handler.handle_error(&err).await }).await;
            if let Err(e) = outcome {
                warn!("Error handler '{}' failed: {}", name, e);
            }
        }

        if !error.recoverable {
            return;
        }

        for recoverer in recoverers {
            if !recoverer.can_recover(&error) {
                continue;
            }
            let name = recoverer.name().to_string();
            let err = error.clone();
            match isolate(async move { recoverer.recover(&err).await }).await {
                Ok(true) => {
                    info!("Recoverer '{}' recovered from: {}", name, error.message);
                    break;
                }
                Ok(false) => debug!("Recoverer '{}' could not recover", name),
                Err(e) => warn!("Recoverer '{}' failed: {}", name, e),
            }
        }
    }

    fn log_error(&self, error: &TaxonomyError) {
        if !self.config.log_errors || error.level < self.config.log_threshold {
            return;
        }
        match error.level {
            ErrorLevel::Info => info!("{}", error.details()),
            ErrorLevel::Warning => warn!("{}", error.details()),
            ErrorLevel::Error => error!("{}", error.details()),
            ErrorLevel::Critical => error!("CRITICAL {}", error.details()),
        }
    }

    fn notify(&self, error: &TaxonomyError, options: HandleOptions) {
        if !options.notify
            || !self.config.show_notifications
            || error.level < self.config.notification_threshold
        {
            return;
        }
        let notification = Notification::from_error(error, self.config.show_details_on_critical);
        if let Err(e) = self.notifier.notify(&notification) {
            warn!("Failed to deliver notification '{}': {}", notification.title, e);
        }
    }
}

/// Run a handler or recoverer on its own task so a panic cannot escape
async fn isolate<T, F>(future: F) -> Result<T, String>
where
    T: Send + 'static,
    F: Future<Output = Result<T, RecoveryError>> + Send + 'static,
{
    match tokio::spawn(future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err("panicked".to_string()),
        Err(e) => Err(e.to_string()),
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatcher::notifier::RecordingNotifier;
    use quickcheck_macros::quickcheck;
    use std::time::Duration;

    // N identical errors inside the window: N counted, one processed
    #[quickcheck]
    fn prop_debounce_counts_all_processes_one(burst: u8, gap_ms: u16) -> bool {
        let burst = (burst % 20) as u64 + 1;
        let gap = Duration::from_millis(gap_ms as u64 % 999);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let clock = Arc::new(ManualClock::new());
            let notifier = Arc::new(RecordingNotifier::new());
            let dispatcher = ErrorDispatcher::new(
                DispatcherConfig::default(),
                clock.clone(),
                notifier.clone(),
            );

            for _ in 0..burst {
                dispatcher.handle_error(
                    TaxonomyError::file_system("read failed", None).with_component("storage"),
                    HandleOptions::default(),
                );
                clock.advance(gap).await;
            }
            clock.advance(dispatcher.config().debounce_time()).await;

            dispatcher.get_statistics().total == burst
                && dispatcher.processed_count() == 1
                && notifier.count() == 1
        })
    }
}
