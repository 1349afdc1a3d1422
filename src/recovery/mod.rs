//! Category recoverers
//!
//! A recoverer is registered with the [`ErrorDispatcher`](crate::dispatcher::ErrorDispatcher)
//! twice: once as an [`ErrorHandler`] that emits diagnostics for its category,
//! and once as a [`Recoverer`] that tries to repair the underlying condition.

pub mod filesystem;
pub mod parsing;
pub mod provider;

pub use filesystem::{FileSystemRecoverer, FsOperation};
pub use parsing::{
    FixReport, LineRepair, MarkdownOutline, ParsedContent, ParsingRecoverer, RepairHook,
    TaskExtraction, TaskLine, TaskState,
};
pub use provider::{ProviderControl, ProviderHealth, ProviderRecoverer};

use crate::clock::BoxFuture;
use crate::error::RecoveryError;
use crate::taxonomy::TaxonomyError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Emits diagnostics for errors it recognizes
pub trait ErrorHandler: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, error: &TaxonomyError) -> bool;

    fn handle_error<'a>(
        &'a self,
        error: &'a TaxonomyError,
    ) -> BoxFuture<'a, Result<(), RecoveryError>>;
}

/// Attempts to repair the condition behind an error
pub trait Recoverer: Send + Sync {
    fn name(&self) -> &str;

    fn can_recover(&self, error: &TaxonomyError) -> bool;

    /// Returns `Ok(true)` when the condition was repaired
    fn recover<'a>(&'a self, error: &'a TaxonomyError)
        -> BoxFuture<'a, Result<bool, RecoveryError>>;
}

/// Bounded retry counter keyed by `operation:resource`
#[derive(Debug)]
pub struct RetryTracker {
    max_retries: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(operation: &str, resource: &str) -> String {
        format!("{}:{}", operation, resource)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether another attempt is allowed for `key`
    ///
    /// Once the bound is reached the entry is dropped and `false` is returned.
    pub fn can_retry(&self, key: &str) -> bool {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let used = attempts.get(key).copied().unwrap_or(0);
        if used >= self.max_retries {
            attempts.remove(key);
            false
        } else {
            true
        }
    }

    /// Record an attempt, returning its number, or `None` if the bound is exceeded
    pub fn attempt(&self, key: &str) -> Option<u32> {
        if !self.can_retry(key) {
            return None;
        }
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let used = attempts.entry(key.to_string()).or_insert(0);
        *used += 1;
        Some(*used)
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn reset(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    pub fn clear(&self) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Uniform outcome of the `safe_*` helpers
///
/// Callers never see a raw failure from those helpers, only this envelope.
#[derive(Debug, Clone, Serialize)]
pub struct SafeResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<TaxonomyError>,
    pub used_fallback: bool,
    pub retried: bool,
    pub retry_count: u32,
}

impl<T> SafeResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            used_fallback: false,
            retried: false,
            retry_count: 0,
        }
    }

    pub fn failed(error: TaxonomyError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            used_fallback: false,
            retried: false,
            retry_count: 0,
        }
    }

    /// Successful result produced by a fallback path after `error`
    pub fn fallback(data: T, error: TaxonomyError) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: Some(error),
            used_fallback: true,
            retried: false,
            retry_count: 0,
        }
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self.retried = retry_count > 0;
        self
    }

    pub fn into_result(self) -> Result<T, TaxonomyError> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => Err(TaxonomyError::unknown("operation produced no data")),
        }
    }
}
