use crate::boundary::health::{ComponentHealth, HealthStatus, SystemStatusSummary};
use crate::clock::{self, Clock, TimerHandle};
use crate::config::BoundaryConfig;
use crate::dispatcher::{ErrorDispatcher, HandleOptions, WeakDispatcher};
use crate::error::BoundaryError;
use crate::taxonomy::{ErrorLevel, TaxonomyError};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;

struct ComponentEntry {
    health: ComponentHealth,
    recovery_timer: Option<TimerHandle>,
    degraded_timer: Option<TimerHandle>,
}

impl ComponentEntry {
    fn new(name: &str) -> Self {
        Self {
            health: ComponentHealth::new(name),
            recovery_timer: None,
            degraded_timer: None,
        }
    }
}

#[derive(Default)]
struct BoundaryState {
    components: HashMap<String, ComponentEntry>,
    disposed: bool,
}

struct Inner {
    config: BoundaryConfig,
    clock: Arc<dyn Clock>,
    dispatcher: ErrorDispatcher,
    state: Mutex<BoundaryState>,
}

/// Circuit breaker and degraded-mode controller for named components
///
/// Each component moves between Normal, Degraded and Error as calls through
/// [`execute`](Self::execute) succeed or fail. Once a component reaches
/// `max_consecutive_errors` it is disabled and a recovery timer re-enables it
/// after `recovery_interval`. A successful fallback puts the component in
/// Degraded mode, which expires on its own after `degraded_mode_timeout`.
///
/// Health is updated when a call starts and when it completes, never while
/// the wrapped operation is running. Concurrent calls on the same component
/// therefore apply their bookkeeping in completion order.
#[derive(Clone)]
pub struct ComponentBoundary {
    inner: Arc<Inner>,
}

impl ComponentBoundary {
    pub fn new(config: BoundaryConfig, clock: Arc<dyn Clock>, dispatcher: ErrorDispatcher) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                dispatcher,
                state: Mutex::new(BoundaryState::default()),
            }),
        }
    }

    pub fn config(&self) -> &BoundaryConfig {
        &self.inner.config
    }

    /// Sink for failures that escaped every other handler
    pub fn fatal_sink(&self) -> FatalSink {
        FatalSink::new(&self.inner.dispatcher)
    }

    /// Run `primary` under the component's circuit breaker
    pub async fn execute<T, E, F, Fut>(
        &self,
        component: &str,
        operation: &str,
        primary: F,
    ) -> Result<T, BoundaryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        self.inner.admit(component)?;
        match primary().await {
            Ok(value) => {
                self.inner.on_success(component);
                Ok(value)
            }
            Err(e) => {
                let (error, status) = self.inner.on_failure(component, operation, e.into(), false);
                self.inner.report(&error, status);
                Err(BoundaryError::Failed(error))
            }
        }
    }

    /// Run `primary`, substituting `fallback` when it fails
    ///
    /// A successful fallback puts the component in Degraded mode. If the
    /// fallback fails too, the component goes straight to Error and the
    /// primary's error is returned.
    pub async fn execute_with_fallback<T, E, F, Fut, FE, G, GFut>(
        &self,
        component: &str,
        operation: &str,
        primary: F,
        fallback: G,
    ) -> Result<T, BoundaryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, FE>>,
        FE: Into<anyhow::Error>,
    {
        self.inner.admit(component)?;
        let error = match primary().await {
            Ok(value) => {
                self.inner.on_success(component);
                return Ok(value);
            }
            Err(e) => self.inner.on_failure(component, operation, e.into(), true).0,
        };

        // Dispatch once the final status is known so Error is always surfaced
        match fallback().await {
            Ok(value) => {
                let status = self.inner.on_fallback_success(component);
                self.inner.report(&error, status);
                Ok(value)
            }
            Err(e) => {
                let e: anyhow::Error = e.into();
                warn!("Fallback for {} in {} failed: {}", operation, component, e);
                let status = self.inner.force_error(component);
                self.inner.report(&error, status);
                Err(BoundaryError::Failed(error))
            }
        }
    }

    /// Track `component` with default health; a no-op if already tracked
    pub fn register_component(&self, component: &str) {
        let mut state = self.inner.lock();
        if state.disposed {
            return;
        }
        state
            .components
            .entry(component.to_string())
            .or_insert_with(|| ComponentEntry::new(component));
    }

    /// Stop tracking `component`, cancelling its timers
    pub fn unregister_component(&self, component: &str) -> Option<ComponentHealth> {
        let entry = self.inner.lock().components.remove(component)?;
        self.inner.cancel_timers_of(&entry);
        Some(entry.health)
    }

    /// Re-enable a component immediately
    ///
    /// Returns `false` if the component is not tracked.
    pub fn recover_component(&self, component: &str) -> bool {
        let mut state = self.inner.lock();
        match state.components.get_mut(component) {
            Some(entry) => {
                self.inner.cancel_timers(entry);
                entry.health.restore();
                info!("Component {} recovered manually", component);
                true
            }
            None => false,
        }
    }

    /// Switch a component off until [`recover_component`](Self::recover_component) is called
    pub fn disable_component(&self, component: &str) {
        let mut state = self.inner.lock();
        if state.disposed {
            return;
        }
        let entry = state
            .components
            .entry(component.to_string())
            .or_insert_with(|| ComponentEntry::new(component));
        self.inner.cancel_timers(entry);
        entry.health.disable();
        info!("Component {} disabled", component);
    }

    pub fn get_component_health(&self, component: &str) -> Option<ComponentHealth> {
        self.inner
            .lock()
            .components
            .get(component)
            .map(|entry| entry.health.clone())
    }

    /// Health of every tracked component, sorted by name
    pub fn get_all_component_health(&self) -> Vec<ComponentHealth> {
        let mut all: Vec<ComponentHealth> = self
            .inner
            .lock()
            .components
            .values()
            .map(|entry| entry.health.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn system_status_summary(&self) -> SystemStatusSummary {
        let state = self.inner.lock();
        SystemStatusSummary::from_components(state.components.values().map(|entry| &entry.health))
    }

    /// Reset every component to default health and cancel its timers
    pub fn reset_all(&self) {
        let mut state = self.inner.lock();
        for (name, entry) in state.components.iter_mut() {
            self.inner.cancel_timers(entry);
            entry.health = ComponentHealth::new(name.as_str());
        }
        debug!("Reset {} components", state.components.len());
    }

    /// Cancel every timer and forget every component
    ///
    /// Calls made afterwards fail with [`BoundaryError::Disposed`].
    pub fn dispose(&self) {
        let mut state = self.inner.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        for (_, entry) in state.components.drain() {
            self.inner.cancel_timers_of(&entry);
        }
        info!("Component boundary disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, BoundaryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn admit(&self, component: &str) -> Result<(), BoundaryError> {
        let mut state = self.lock();
        if state.disposed {
            return Err(BoundaryError::Disposed);
        }
        let entry = state
            .components
            .entry(component.to_string())
            .or_insert_with(|| ComponentEntry::new(component));

        if !entry.health.enabled {
            return Err(BoundaryError::Disabled {
                component: component.to_string(),
            });
        }
        if entry.health.status == HealthStatus::Error {
            return Err(BoundaryError::Unavailable {
                component: component.to_string(),
            });
        }
        Ok(())
    }

    fn on_success(&self, component: &str) {
        let mut state = self.lock();
        if let Some(entry) = state.components.get_mut(component) {
            if entry.health.status == HealthStatus::Disabled {
                return;
            }
            if entry.health.status != HealthStatus::Normal {
                debug!("Component {} back to normal", component);
            }
            self.cancel_timers(entry);
            entry.health.restore();
        }
    }

    fn on_failure(
        self: &Arc<Self>,
        component: &str,
        operation: &str,
        cause: anyhow::Error,
        has_fallback: bool,
    ) -> (TaxonomyError, Option<HealthStatus>) {
        let error = TaxonomyError::from_anyhow(cause)
            .with_component(component)
            .with_operation(operation);

        let status = {
            let mut state = self.lock();
            if state.disposed {
                return (error, None);
            }
            let entry = state
                .components
                .entry(component.to_string())
                .or_insert_with(|| ComponentEntry::new(component));
            entry.health.record_failure();

            let consecutive = entry.health.consecutive_errors;
            if consecutive >= self.config.max_consecutive_errors {
                self.trip(component, entry);
            } else if !has_fallback && consecutive > 1 {
                entry.health.enter_degraded();
                self.arm_degraded_timer(component, entry);
            }
            entry.health.status
        };

        debug!(
            "Component {} failed during {} (status {})",
            component, operation, status
        );
        (error, Some(status))
    }

    /// Dispatch a failure, notifying only when it left the component in Error
    ///
    /// `None` means the boundary was disposed and nothing is reported.
    fn report(&self, error: &TaxonomyError, status: Option<HealthStatus>) {
        let Some(status) = status else {
            return;
        };
        let options = HandleOptions {
            notify: status == HealthStatus::Error,
        };
        self.dispatcher.handle_error(error.clone(), options);
    }

    fn on_fallback_success(self: &Arc<Self>, component: &str) -> Option<HealthStatus> {
        let mut state = self.lock();
        if state.disposed {
            return None;
        }
        let entry = state.components.get_mut(component)?;
        if matches!(entry.health.status, HealthStatus::Normal | HealthStatus::Degraded) {
            entry.health.enter_degraded();
            self.arm_degraded_timer(component, entry);
            debug!("Component {} running in degraded mode", component);
        }
        Some(entry.health.status)
    }

    fn force_error(self: &Arc<Self>, component: &str) -> Option<HealthStatus> {
        let mut state = self.lock();
        if state.disposed {
            return None;
        }
        let entry = state.components.get_mut(component)?;
        if !matches!(entry.health.status, HealthStatus::Error | HealthStatus::Disabled) {
            self.trip(component, entry);
        }
        Some(entry.health.status)
    }

    fn trip(self: &Arc<Self>, component: &str, entry: &mut ComponentEntry) {
        if let Some(handle) = entry.degraded_timer.take() {
            self.clock.cancel(handle);
        }
        entry.health.enter_error();
        warn!(
            "Component {} disabled after {} consecutive errors",
            component, entry.health.consecutive_errors
        );

        if let Some(handle) = entry.recovery_timer.take() {
            self.clock.cancel(handle);
        }
        let weak = Arc::downgrade(self);
        let name = component.to_string();
        entry.recovery_timer = Some(self.clock.after(
            self.config.recovery_interval(),
            clock::callback(move || async move {
                Inner::recovery_due(weak, name);
            }),
        ));
    }

    fn arm_degraded_timer(self: &Arc<Self>, component: &str, entry: &mut ComponentEntry) {
        if let Some(handle) = entry.degraded_timer.take() {
            self.clock.cancel(handle);
        }
        let weak = Arc::downgrade(self);
        let name = component.to_string();
        entry.degraded_timer = Some(self.clock.after(
            self.config.degraded_mode_timeout(),
            clock::callback(move || async move {
                Inner::degraded_expired(weak, name);
            }),
        ));
    }

    fn recovery_due(weak: Weak<Inner>, component: String) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut state = inner.lock();
        if let Some(entry) = state.components.get_mut(&component) {
            entry.recovery_timer = None;
            if entry.health.status == HealthStatus::Error {
                entry.health.restore();
                info!("Component {} re-enabled after recovery interval", component);
            }
        }
    }

    fn degraded_expired(weak: Weak<Inner>, component: String) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut state = inner.lock();
        if let Some(entry) = state.components.get_mut(&component) {
            entry.degraded_timer = None;
            if entry.health.status == HealthStatus::Degraded {
                entry.health.leave_degraded();
                info!("Component {} left degraded mode", component);
            }
        }
    }

    fn cancel_timers(&self, entry: &mut ComponentEntry) {
        if let Some(handle) = entry.recovery_timer.take() {
            self.clock.cancel(handle);
        }
        if let Some(handle) = entry.degraded_timer.take() {
            self.clock.cancel(handle);
        }
    }

    fn cancel_timers_of(&self, entry: &ComponentEntry) {
        for handle in [entry.recovery_timer, entry.degraded_timer]
            .into_iter()
            .flatten()
        {
            self.clock.cancel(handle);
        }
    }
}

/// Where an escaped failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalOrigin {
    /// A spawned task finished with an error nobody awaited
    UnhandledRejection,
    /// A task panicked
    UncaughtException,
}

impl FatalOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            FatalOrigin::UnhandledRejection => "unhandled rejection",
            FatalOrigin::UncaughtException => "uncaught exception",
        }
    }

    fn level(&self) -> ErrorLevel {
        match self {
            FatalOrigin::UnhandledRejection => ErrorLevel::Error,
            FatalOrigin::UncaughtException => ErrorLevel::Critical,
        }
    }
}

impl fmt::Display for FatalOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level sink for failures that escaped every other handler
///
/// The host wires its own top-level error handling into [`report`](Self::report),
/// or spawns background work through [`spawn_guarded`](Self::spawn_guarded).
#[derive(Clone)]
pub struct FatalSink {
    dispatcher: WeakDispatcher,
}

impl FatalSink {
    pub fn new(dispatcher: &ErrorDispatcher) -> Self {
        Self {
            dispatcher: dispatcher.downgrade(),
        }
    }

    /// Route an escaped failure through the dispatcher as an unknown error
    pub fn report(&self, error: anyhow::Error, origin: FatalOrigin) {
        let error = TaxonomyError::unknown(format!("{}: {:#}", origin, error))
            .with_level(origin.level())
            .with_operation(origin.as_str())
            .with_recoverable(false);
        self.dispatcher.report(error, HandleOptions::default());
    }

    /// Spawn `future`, reporting an error result or a panic to this sink
    ///
    /// The returned handle yields the task's value, or `None` if it failed.
    pub fn spawn_guarded<T, F>(&self, name: &str, future: F) -> JoinHandle<Option<T>>
    where
        T: Send + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let sink = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            match tokio::spawn(future).await {
                Ok(Ok(value)) => Some(value),
                Ok(Err(e)) => {
                    sink.report(e.context(format!("task '{}'", name)), FatalOrigin::UnhandledRejection);
                    None
                }
                Err(e) if e.is_panic() => {
                    let payload = e.into_panic();
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    sink.report(
                        anyhow::anyhow!("task '{}' panicked: {}", name, message),
                        FatalOrigin::UncaughtException,
                    );
                    None
                }
                Err(e) => {
                    debug!("Task '{}' was cancelled: {}", name, e);
                    None
                }
            }
        })
    }
}
