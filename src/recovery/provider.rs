//! Provider recoverer
//!
//! Tracks health per (provider type, component) pair. Decoration providers
//! degrade by switching decorations off; code lens and file watcher providers
//! are torn down and reinitialized.

use crate::clock::BoxFuture;
use crate::config::ProviderConfig;
use crate::dispatcher::{ErrorDispatcher, HandleOptions, WeakDispatcher};
use crate::error::RecoveryError;
use crate::recovery::{ErrorHandler, Recoverer, RetryTracker, SafeResult};
use crate::taxonomy::{ErrorCategory, ErrorKind, ProviderType, TaxonomyError};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Host-side handle to a provider the recoverer can act on
pub trait ProviderControl: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Switch the provider to reduced functionality
    fn degrade(&self) -> Result<(), RecoveryError>;

    /// Dispose and recreate the provider
    fn reinitialize<'a>(&'a self) -> BoxFuture<'a, Result<(), RecoveryError>>;
}

/// Health record of one provider instance
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderHealth {
    pub provider_type: ProviderType,
    pub component: String,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub last_error_time: Option<DateTime<Utc>>,
    pub last_recovery_time: Option<DateTime<Utc>>,
    /// Running with reduced functionality after a degrade
    pub degraded: bool,
}

impl ProviderHealth {
    fn new(provider_type: ProviderType, component: &str) -> Self {
        Self {
            provider_type,
            component: component.to_string(),
            consecutive_errors: 0,
            total_errors: 0,
            last_error_time: None,
            last_recovery_time: None,
            degraded: false,
        }
    }
}

type ProviderKey = (ProviderType, String);

/// Recoverer for provider errors
pub struct ProviderRecoverer {
    config: ProviderConfig,
    retries: RetryTracker,
    dispatcher: WeakDispatcher,
    providers: Mutex<HashMap<ProviderKey, Arc<dyn ProviderControl>>>,
    health: Mutex<HashMap<ProviderKey, ProviderHealth>>,
}

impl ProviderRecoverer {
    pub fn new(config: ProviderConfig) -> Self {
        let retries = RetryTracker::new(config.max_retries);
        Self {
            config,
            retries,
            dispatcher: WeakDispatcher::default(),
            providers: Mutex::new(HashMap::new()),
            health: Mutex::new(HashMap::new()),
        }
    }

    /// Report unrecovered failures from `safe_execute` to `dispatcher`
    pub fn with_dispatcher(mut self, dispatcher: &ErrorDispatcher) -> Self {
        self.dispatcher = dispatcher.downgrade();
        self
    }

    /// Register as both handler and recoverer for provider errors
    pub fn register(self: &Arc<Self>, dispatcher: &ErrorDispatcher) {
        dispatcher.register_handler(ErrorCategory::Provider, self.clone());
        dispatcher.register_recoverer(ErrorCategory::Provider, self.clone());
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Make a provider instance available for degrade/reinitialize
    pub fn register_provider(&self, component: &str, provider: Arc<dyn ProviderControl>) {
        let key = (provider.provider_type(), component.to_string());
        self.health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_insert_with(|| ProviderHealth::new(key.0, component));
        self.providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, provider);
        debug!("Registered provider for {}", component);
    }

    pub fn provider_health(
        &self,
        provider_type: ProviderType,
        component: &str,
    ) -> Option<ProviderHealth> {
        self.health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(provider_type, component.to_string()))
            .cloned()
    }

    /// Every tracked provider, ordered by type then component
    pub fn all_provider_health(&self) -> Vec<ProviderHealth> {
        let mut all: Vec<ProviderHealth> = self
            .health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            a.provider_type
                .cmp(&b.provider_type)
                .then_with(|| a.component.cmp(&b.component))
        });
        all
    }

    /// Forget every registered provider, its health and retry bookkeeping
    pub fn clear(&self) {
        self.providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.health.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.retries.clear();
    }

    /// Reset the consecutive error count after a successful provider call
    pub fn record_success(&self, provider_type: ProviderType, component: &str) {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = health.get_mut(&(provider_type, component.to_string())) {
            entry.consecutive_errors = 0;
        }
    }

    fn record_failure(&self, provider_type: ProviderType, component: &str) {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        let entry = health
            .entry((provider_type, component.to_string()))
            .or_insert_with(|| ProviderHealth::new(provider_type, component));
        entry.consecutive_errors += 1;
        entry.total_errors += 1;
        entry.last_error_time = Some(Utc::now());
    }

    fn record_recovery(&self, provider_type: ProviderType, component: &str, degraded: bool) {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        let entry = health
            .entry((provider_type, component.to_string()))
            .or_insert_with(|| ProviderHealth::new(provider_type, component));
        entry.consecutive_errors = 0;
        entry.last_recovery_time = Some(Utc::now());
        entry.degraded = degraded;
    }

    fn provider(&self, provider_type: ProviderType, component: &str) -> Option<Arc<dyn ProviderControl>> {
        self.providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(provider_type, component.to_string()))
            .cloned()
    }

    /// Advice for a failed provider operation
    pub fn suggestion(operation: Option<&str>) -> &'static str {
        match operation {
            Some("render") => "Decorations may be incomplete until the document is reopened",
            Some("refresh") => "Reopen the document to refresh its code lenses",
            Some("watch") => "File changes may be missed; reload the window if this persists",
            _ => "Reload the window if the feature stays unavailable",
        }
    }

    fn target(error: &TaxonomyError) -> Option<(ProviderType, String)> {
        match &error.kind {
            ErrorKind::Provider { provider_type } => Some((
                *provider_type,
                error.component().unwrap_or("unknown").to_string(),
            )),
            _ => None,
        }
    }

    fn retry_key(error: &TaxonomyError, provider_type: ProviderType, component: &str) -> String {
        RetryTracker::key(
            error.operation().unwrap_or("provide"),
            &format!("{}:{}", provider_type, component),
        )
    }

    /// Run a provider callback, recovering the provider between attempts
    ///
    /// When every attempt fails and `fallback` is given, it is returned in a
    /// fallback envelope instead of a failure.
    pub async fn safe_execute<T, F, Fut>(
        &self,
        provider_type: ProviderType,
        component: &str,
        operation: &str,
        mut op: F,
        fallback: Option<T>,
    ) -> SafeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut retry_count = 0;
        loop {
            match op().await {
                Ok(value) => {
                    self.record_success(provider_type, component);
                    return SafeResult::ok(value).with_retries(retry_count);
                }
                Err(e) => {
                    self.record_failure(provider_type, component);
                    let error = TaxonomyError::provider(e.to_string(), provider_type)
                        .with_component(component)
                        .with_operation(operation);

                    if retry_count < self.config.max_retries && self.can_recover(&error) {
                        match self.recover(&error).await {
                            Ok(true) => {
                                retry_count += 1;
                                continue;
                            }
                            Ok(false) => {}
                            Err(e) => warn!("Provider recovery failed: {}", e),
                        }
                    }

                    let error = error.with_recoverable(false);
                    return match fallback {
                        Some(value) => {
                            self.dispatcher.report(error.clone(), HandleOptions::silent());
                            SafeResult::fallback(value, error).with_retries(retry_count)
                        }
                        None => {
                            self.dispatcher.report(error.clone(), HandleOptions::default());
                            SafeResult::failed(error).with_retries(retry_count)
                        }
                    };
                }
            }
        }
    }

    async fn reinitialize(
        &self,
        provider: &dyn ProviderControl,
        provider_type: ProviderType,
        component: &str,
    ) -> Result<bool, RecoveryError> {
        tokio::time::sleep(self.config.retry_delay()).await;
        provider.reinitialize().await.map_err(|e| {
            RecoveryError::ProviderFailed(format!(
                "reinitializing {} for {}: {}",
                provider_type, component, e
            ))
        })?;
        self.record_recovery(provider_type, component, false);
        info!("Reinitialized {} provider for {}", provider_type, component);
        Ok(true)
    }
}

impl ErrorHandler for ProviderRecoverer {
    fn name(&self) -> &str {
        "provider"
    }

    fn can_handle(&self, error: &TaxonomyError) -> bool {
        error.category() == ErrorCategory::Provider
    }

    fn handle_error<'a>(
        &'a self,
        error: &'a TaxonomyError,
    ) -> BoxFuture<'a, Result<(), RecoveryError>> {
        Box::pin(async move {
            let provider = match &error.kind {
                ErrorKind::Provider { provider_type } => provider_type.as_str(),
                _ => "unknown",
            };
            warn!(
                "Provider {} failed in {}: {}. {}",
                provider,
                error.component().unwrap_or("unknown"),
                error.message,
                Self::suggestion(error.operation())
            );
            Ok(())
        })
    }
}

impl Recoverer for ProviderRecoverer {
    fn name(&self) -> &str {
        "provider"
    }

    fn can_recover(&self, error: &TaxonomyError) -> bool {
        if !self.config.auto_recovery {
            return false;
        }
        match Self::target(error) {
            Some((provider_type, component)) => self
                .retries
                .can_retry(&Self::retry_key(error, provider_type, &component)),
            None => false,
        }
    }

    fn recover<'a>(
        &'a self,
        error: &'a TaxonomyError,
    ) -> BoxFuture<'a, Result<bool, RecoveryError>> {
        Box::pin(async move {
            let (provider_type, component) = match Self::target(error) {
                Some(target) => target,
                None => return Ok(false),
            };
            let key = Self::retry_key(error, provider_type, &component);
            let attempt = match self.retries.attempt(&key) {
                Some(attempt) => attempt,
                None => return Ok(false),
            };
            let provider = match self.provider(provider_type, &component) {
                Some(provider) => provider,
                None => {
                    debug!("No {} provider registered for {}", provider_type, component);
                    return Ok(false);
                }
            };
            debug!(
                "Recovering {} provider for {} (attempt {})",
                provider_type, component, attempt
            );

            let recovered = match provider_type {
                ProviderType::Decoration => {
                    if !self.config.degraded_mode {
                        return Ok(false);
                    }
                    provider.degrade()?;
                    self.record_recovery(provider_type, &component, true);
                    info!("Decorations disabled for {}", component);
                    true
                }
                ProviderType::CodeLens | ProviderType::FileWatcher => {
                    self.reinitialize(provider.as_ref(), provider_type, &component)
                        .await?
                }
            };
            if recovered {
                self.retries.reset(&key);
            }
            Ok(recovered)
        })
    }
}
