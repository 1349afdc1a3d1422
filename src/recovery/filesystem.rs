//! Filesystem recoverer
//!
//! Repairs the usual reasons a storage access fails: a file that was never
//! created, a parent directory that is missing, or a delete of something that
//! is already gone. Permission problems are checked with a throwaway write in
//! the target directory, never by reading ACLs.

use crate::clock::BoxFuture;
use crate::config::FileSystemConfig;
use crate::dispatcher::{ErrorDispatcher, HandleOptions, WeakDispatcher};
use crate::error::RecoveryError;
use crate::recovery::{ErrorHandler, Recoverer, RetryTracker, SafeResult};
use crate::taxonomy::{ErrorCategory, ErrorKind, TaxonomyError};
use log::{debug, info, warn};
use serde::Serialize;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Storage operation that failed
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FsOperation {
    Read,
    Write,
    Create,
    Delete,
    Other,
}

impl FsOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsOperation::Read => "read",
            FsOperation::Write => "write",
            FsOperation::Create => "create",
            FsOperation::Delete => "delete",
            FsOperation::Other => "other",
        }
    }

    /// Interpret the operation name recorded in an error context
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(|n| n.to_lowercase()).as_deref() {
            Some("read") => FsOperation::Read,
            Some("write") => FsOperation::Write,
            Some("create") => FsOperation::Create,
            Some("delete") => FsOperation::Delete,
            _ => FsOperation::Other,
        }
    }

    /// Advice shown alongside a failure of this operation
    pub fn suggestion(&self, io_kind: Option<io::ErrorKind>) -> &'static str {
        if io_kind == Some(io::ErrorKind::PermissionDenied) {
            return "Check the file permissions of the file and its directory";
        }
        match self {
            FsOperation::Read => "Check that the file exists and is readable",
            FsOperation::Write => "Check that the directory exists and is writable",
            FsOperation::Create => "Check that the parent directory exists and is writable",
            FsOperation::Delete => "Check that the file is not in use by another program",
            FsOperation::Other => "Check the path and try again",
        }
    }
}

/// Recoverer for filesystem errors
pub struct FileSystemRecoverer {
    config: FileSystemConfig,
    retries: RetryTracker,
    dispatcher: WeakDispatcher,
}

impl FileSystemRecoverer {
    pub fn new(config: FileSystemConfig) -> Self {
        let retries = RetryTracker::new(config.max_retries);
        Self {
            config,
            retries,
            dispatcher: WeakDispatcher::default(),
        }
    }

    /// Report unrecovered failures from `safe_execute` to `dispatcher`
    pub fn with_dispatcher(mut self, dispatcher: &ErrorDispatcher) -> Self {
        self.dispatcher = dispatcher.downgrade();
        self
    }

    /// Register as both handler and recoverer for filesystem errors
    pub fn register(self: &Arc<Self>, dispatcher: &ErrorDispatcher) {
        dispatcher.register_handler(ErrorCategory::FileSystem, self.clone());
        dispatcher.register_recoverer(ErrorCategory::FileSystem, self.clone());
    }

    pub fn config(&self) -> &FileSystemConfig {
        &self.config
    }

    pub fn retry_tracker(&self) -> &RetryTracker {
        &self.retries
    }

    fn target(error: &TaxonomyError) -> Option<(PathBuf, Option<io::ErrorKind>)> {
        match &error.kind {
            ErrorKind::FileSystem {
                path: Some(path),
                io_kind,
            } => Some((path.clone(), *io_kind)),
            ErrorKind::FileSystem { path: None, io_kind } => error
                .context
                .location
                .as_ref()
                .map(|location| (PathBuf::from(&location.resource), *io_kind)),
            _ => None,
        }
    }

    fn retry_key(error: &TaxonomyError, path: &Path) -> String {
        RetryTracker::key(
            FsOperation::from_name(error.operation()).as_str(),
            &path.display().to_string(),
        )
    }

    /// Run `op`, repairing and retrying on recoverable failures
    ///
    /// Failures that cannot be repaired are reported to the dispatcher and
    /// returned inside the envelope.
    pub async fn safe_execute<T, F, Fut>(
        &self,
        operation: FsOperation,
        path: &Path,
        component: &str,
        mut op: F,
    ) -> SafeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let mut retry_count = 0;
        loop {
            match op().await {
                Ok(value) => {
                    self.retries
                        .reset(&RetryTracker::key(operation.as_str(), &path.display().to_string()));
                    return SafeResult::ok(value).with_retries(retry_count);
                }
                Err(e) => {
                    let error = TaxonomyError::from_io_error(e, Some(path.to_path_buf()))
                        .with_component(component)
                        .with_operation(operation.as_str());

                    if self.config.auto_recovery
                        && retry_count < self.config.max_retries
                        && self.can_recover(&error)
                    {
                        match self.recover(&error).await {
                            Ok(true) => {
                                retry_count += 1;
                                debug!(
                                    "Retrying {} on {} (attempt {})",
                                    operation.as_str(),
                                    path.display(),
                                    retry_count
                                );
                                continue;
                            }
                            Ok(false) => {}
                            Err(e) => warn!("Filesystem recovery failed: {}", e),
                        }
                    }

                    // Local recovery was already attempted
                    let error = error.with_recoverable(false);
                    self.dispatcher.report(error.clone(), HandleOptions::default());
                    return SafeResult::failed(error).with_retries(retry_count);
                }
            }
        }
    }

    /// Read a file as UTF-8 text
    pub async fn read_file(&self, path: &Path, component: &str) -> SafeResult<String> {
        self.safe_execute(FsOperation::Read, path, component, || {
            tokio::fs::read_to_string(path)
        })
        .await
    }

    /// Write `contents` to a file, replacing it
    pub async fn write_file(&self, path: &Path, contents: &str, component: &str) -> SafeResult<()> {
        self.safe_execute(FsOperation::Write, path, component, || {
            tokio::fs::write(path, contents.as_bytes())
        })
        .await
    }

    /// Delete a file; a file that is already gone counts as deleted
    pub async fn delete_file(&self, path: &Path, component: &str) -> SafeResult<()> {
        self.safe_execute(FsOperation::Delete, path, component, || async move {
            match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        })
        .await
    }

    async fn create_empty_file(&self, path: &Path) -> Result<bool, RecoveryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !exists(parent).await {
                if !self.config.auto_create_directory {
                    return Ok(false);
                }
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // Never truncate: the file may have appeared since the failure
        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await;
        match created {
            Ok(_) => {
                info!("Created missing file {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_parent_directory(&self, path: &Path) -> Result<bool, RecoveryError> {
        let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent,
            None => return Ok(false),
        };
        if exists(parent).await {
            return Ok(probe_writable(parent).await);
        }
        tokio::fs::create_dir_all(parent).await?;
        info!("Created missing directory {}", parent.display());
        Ok(probe_writable(parent).await)
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Check write access by creating and removing a throwaway file in `dir`
async fn probe_writable(dir: &Path) -> bool {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let probe = dir.join(format!(".sentinel-probe-{}-{}", std::process::id(), nanos));

    if let Err(e) = tokio::fs::write(&probe, b"").await {
        debug!("Write probe failed in {}: {}", dir.display(), e);
        return false;
    }
    if let Err(e) = tokio::fs::remove_file(&probe).await {
        debug!("Delete probe failed in {}: {}", dir.display(), e);
        return false;
    }
    true
}

impl ErrorHandler for FileSystemRecoverer {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn can_handle(&self, error: &TaxonomyError) -> bool {
        error.category() == ErrorCategory::FileSystem
    }

    fn handle_error<'a>(
        &'a self,
        error: &'a TaxonomyError,
    ) -> BoxFuture<'a, Result<(), RecoveryError>> {
        Box::pin(async move {
            let operation = FsOperation::from_name(error.operation());
            let (path, io_kind) = match Self::target(error) {
                Some((path, kind)) => (path.display().to_string(), kind),
                None => ("<unknown path>".to_string(), None),
            };
            warn!(
                "Filesystem {} failed for {}: {}. {}",
                operation.as_str(),
                path,
                error.message,
                operation.suggestion(io_kind)
            );
            Ok(())
        })
    }
}

impl Recoverer for FileSystemRecoverer {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn can_recover(&self, error: &TaxonomyError) -> bool {
        if !self.config.auto_recovery || error.category() != ErrorCategory::FileSystem {
            return false;
        }
        match Self::target(error) {
            Some((path, _)) => self.retries.can_retry(&Self::retry_key(error, &path)),
            None => false,
        }
    }

    fn recover<'a>(
        &'a self,
        error: &'a TaxonomyError,
    ) -> BoxFuture<'a, Result<bool, RecoveryError>> {
        Box::pin(async move {
            let (path, io_kind) = match Self::target(error) {
                Some(target) => target,
                None => return Ok(false),
            };
            let operation = FsOperation::from_name(error.operation());
            let key = Self::retry_key(error, &path);

            let attempt = match self.retries.attempt(&key) {
                Some(attempt) => attempt,
                None => {
                    debug!("Retries exhausted for {}", key);
                    return Ok(false);
                }
            };
            debug!(
                "Filesystem recovery attempt {}/{} for {}",
                attempt,
                self.retries.max_retries(),
                key
            );
            tokio::time::sleep(self.config.retry_interval()).await;

            let present = exists(&path).await;
            let recovered = match (operation, io_kind) {
                (FsOperation::Delete, _) if !present => true,
                (_, Some(io::ErrorKind::PermissionDenied)) => {
                    let is_dir = tokio::fs::metadata(&path)
                        .await
                        .map(|m| m.is_dir())
                        .unwrap_or(false);
                    let dir = if is_dir {
                        path.as_path()
                    } else {
                        path.parent().unwrap_or(Path::new("."))
                    };
                    probe_writable(dir).await
                }
                (FsOperation::Read, Some(io::ErrorKind::NotFound)) if present => true,
                (FsOperation::Read, Some(io::ErrorKind::NotFound)) => {
                    self.config.auto_create_file && self.create_empty_file(&path).await?
                }
                (FsOperation::Write | FsOperation::Create, Some(io::ErrorKind::NotFound)) => {
                    self.config.auto_create_directory
                        && self.create_parent_directory(&path).await?
                }
                _ => false,
            };

            if recovered {
                self.retries.reset(&key);
            }
            Ok(recovered)
        })
    }
}
