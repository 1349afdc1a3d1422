//! Error taxonomy for the resilience framework
//!
//! Every failure that crosses a component boundary is expressed as a
//! [`TaxonomyError`]: a message plus a level, a category, a recovery strategy
//! and structured context. Category-specific data lives in [`ErrorKind`], so a
//! specialization can never disagree with the category it reports.
//!
//! Constructing an error is a pure value operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared, cloneable handle to a wrapped inner error
pub type InnerError = Arc<dyn StdError + Send + Sync + 'static>;

/// Severity level of an error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorLevel {
    pub const ALL: [ErrorLevel; 4] = [
        ErrorLevel::Info,
        ErrorLevel::Warning,
        ErrorLevel::Error,
        ErrorLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorLevel::Info => "info",
            ErrorLevel::Warning => "warning",
            ErrorLevel::Error => "error",
            ErrorLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad failure category, used to route errors to handlers and recoverers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    FileSystem,
    Parsing,
    Provider,
    Command,
    Configuration,
    Network,
    Unknown,
}

impl ErrorCategory {
    /// Every category, in declaration order
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::FileSystem,
        ErrorCategory::Parsing,
        ErrorCategory::Provider,
        ErrorCategory::Command,
        ErrorCategory::Configuration,
        ErrorCategory::Network,
        ErrorCategory::Unknown,
    ];

    /// Dense index of this category, stable for the lifetime of the crate
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::FileSystem => "filesystem",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Provider => "provider",
            ErrorCategory::Command => "command",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Network => "network",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Default level for errors of this category
    pub fn default_level(&self) -> ErrorLevel {
        match self {
            ErrorCategory::FileSystem => ErrorLevel::Error,
            ErrorCategory::Parsing => ErrorLevel::Warning,
            ErrorCategory::Provider => ErrorLevel::Warning,
            ErrorCategory::Command => ErrorLevel::Error,
            ErrorCategory::Configuration => ErrorLevel::Warning,
            ErrorCategory::Network => ErrorLevel::Warning,
            ErrorCategory::Unknown => ErrorLevel::Error,
        }
    }

    /// Default recovery strategy for errors of this category
    pub fn default_strategy(&self) -> RecoveryStrategy {
        match self {
            ErrorCategory::FileSystem => RecoveryStrategy::Fallback,
            ErrorCategory::Parsing => RecoveryStrategy::Fallback,
            ErrorCategory::Provider => RecoveryStrategy::Retry,
            ErrorCategory::Command => RecoveryStrategy::Skip,
            ErrorCategory::Configuration => RecoveryStrategy::Fallback,
            ErrorCategory::Network => RecoveryStrategy::Retry,
            ErrorCategory::Unknown => RecoveryStrategy::None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the framework should try to get past an error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStrategy {
    None,
    Retry,
    Fallback,
    Skip,
    Degrade,
    Reinitialize,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::None => "none",
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::Skip => "skip",
            RecoveryStrategy::Degrade => "degrade",
            RecoveryStrategy::Reinitialize => "reinitialize",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of UI provider that can fail inside the host
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Visual decorations rendered over a document
    Decoration,
    /// Inline actionable lenses
    CodeLens,
    /// Watches files for changes
    FileWatcher,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Decoration => "decoration",
            ProviderType::CodeLens => "codelens",
            ProviderType::FileWatcher => "filewatcher",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of the failure inside a resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorLocation {
    /// Identifier of the resource, typically a file path or URI
    pub resource: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl ErrorLocation {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(resource: impl Into<String>, line: u32, column: Option<u32>) -> Self {
        Self {
            resource: resource.into(),
            line: Some(line),
            column,
        }
    }
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        Ok(())
    }
}

/// Structured context attached to every error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorContext {
    pub timestamp: DateTime<Utc>,
    pub location: Option<ErrorLocation>,
    pub component: Option<String>,
    pub operation: Option<String>,
    /// Free-form auxiliary data
    pub data: Option<serde_json::Value>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            location: None,
            component: None,
            operation: None,
            data: None,
        }
    }
}

/// Category-specific payload of a [`TaxonomyError`]
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum ErrorKind {
    FileSystem {
        path: Option<PathBuf>,
        #[serde(serialize_with = "serialize_io_kind")]
        io_kind: Option<std::io::ErrorKind>,
    },
    Parsing {
        /// Text of the offending line, when known
        line_text: Option<String>,
    },
    Provider {
        provider_type: ProviderType,
    },
    Command {
        command: String,
    },
    Configuration {
        key: String,
    },
    Network {
        url: String,
        status: Option<u16>,
    },
    Unknown,
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::FileSystem { .. } => ErrorCategory::FileSystem,
            ErrorKind::Parsing { .. } => ErrorCategory::Parsing,
            ErrorKind::Provider { .. } => ErrorCategory::Provider,
            ErrorKind::Command { .. } => ErrorCategory::Command,
            ErrorKind::Configuration { .. } => ErrorCategory::Configuration,
            ErrorKind::Network { .. } => ErrorCategory::Network,
            ErrorKind::Unknown => ErrorCategory::Unknown,
        }
    }
}

fn serialize_io_kind<S>(kind: &Option<std::io::ErrorKind>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match kind {
        Some(kind) => serializer.serialize_some(&format!("{:?}", kind)),
        None => serializer.serialize_none(),
    }
}

fn serialize_inner<S>(inner: &Option<InnerError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match inner {
        Some(inner) => serializer.serialize_some(&inner.to_string()),
        None => serializer.serialize_none(),
    }
}

/// A leveled, categorized error with structured context
#[derive(Debug, Clone, Serialize)]
pub struct TaxonomyError {
    pub message: String,
    pub level: ErrorLevel,
    #[serde(flatten)]
    pub kind: ErrorKind,
    pub context: ErrorContext,
    pub strategy: RecoveryStrategy,
    pub recoverable: bool,
    #[serde(rename = "cause", serialize_with = "serialize_inner")]
    inner: Option<InnerError>,
}

impl TaxonomyError {
    /// Create an error of the given kind with the category defaults applied
    pub fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        let category = kind.category();
        let strategy = category.default_strategy();
        Self {
            message: message.into(),
            level: category.default_level(),
            kind,
            context: ErrorContext::default(),
            strategy,
            recoverable: strategy != RecoveryStrategy::None,
            inner: None,
        }
    }

    pub fn file_system(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        let location = path
            .as_ref()
            .map(|p| ErrorLocation::new(p.display().to_string()));
        let mut error = Self::new(
            message,
            ErrorKind::FileSystem {
                path,
                io_kind: None,
            },
        );
        error.context.location = location;
        error
    }

    pub fn parsing(message: impl Into<String>, line_text: Option<String>) -> Self {
        Self::new(message, ErrorKind::Parsing { line_text })
    }

    pub fn provider(message: impl Into<String>, provider_type: ProviderType) -> Self {
        Self::new(message, ErrorKind::Provider { provider_type })
    }

    pub fn command(message: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            message,
            ErrorKind::Command {
                command: command.into(),
            },
        )
    }

    pub fn configuration(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Configuration { key: key.into() })
    }

    pub fn network(message: impl Into<String>, url: impl Into<String>, status: Option<u16>) -> Self {
        Self::new(
            message,
            ErrorKind::Network {
                url: url.into(),
                status,
            },
        )
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Unknown)
    }

    /// Wrap an IO error raised while touching `path`
    pub fn from_io_error(error: std::io::Error, path: Option<PathBuf>) -> Self {
        let io_kind = error.kind();
        let message = match &path {
            Some(p) => format!("{} ({})", error, p.display()),
            None => error.to_string(),
        };
        let mut wrapped = Self::file_system(message, path);
        if let ErrorKind::FileSystem { io_kind: kind, .. } = &mut wrapped.kind {
            *kind = Some(io_kind);
        }
        wrapped.with_source(error)
    }

    /// Convert an arbitrary error, keeping a `TaxonomyError` carried inside
    pub fn from_anyhow(error: anyhow::Error) -> Self {
        match error.downcast::<TaxonomyError>() {
            Ok(taxonomy) => taxonomy,
            Err(error) => match error.downcast::<std::io::Error>() {
                Ok(io) => Self::from_io_error(io, None),
                Err(error) => {
                    let message = error.to_string();
                    let boxed: Box<dyn StdError + Send + Sync + 'static> = error.into();
                    let mut wrapped = Self::unknown(message);
                    wrapped.inner = Some(Arc::from(boxed));
                    wrapped
                }
            },
        }
    }

    pub fn with_level(mut self, level: ErrorLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_strategy(mut self, strategy: RecoveryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.context.component = Some(component.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    pub fn with_location(mut self, location: ErrorLocation) -> Self {
        self.context.location = Some(location);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.context.data = Some(data);
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.inner = Some(Arc::new(source));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn component(&self) -> Option<&str> {
        self.context.component.as_deref()
    }

    pub fn operation(&self) -> Option<&str> {
        self.context.operation.as_deref()
    }

    /// Resource identifier from the location, or the path of a filesystem error
    pub fn resource(&self) -> Option<String> {
        if let Some(location) = &self.context.location {
            return Some(location.resource.clone());
        }
        match &self.kind {
            ErrorKind::FileSystem { path: Some(p), .. } => Some(p.display().to_string()),
            ErrorKind::Network { url, .. } => Some(url.clone()),
            _ => None,
        }
    }

    pub fn inner(&self) -> Option<&InnerError> {
        self.inner.as_ref()
    }

    /// Key identifying "the same" error for debouncing purposes
    pub fn identity_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.category(),
            self.message,
            self.component().unwrap_or(""),
            self.operation().unwrap_or("")
        )
    }

    /// Human-readable dump of every context field
    ///
    /// The output is deterministic for a given error value.
    pub fn details(&self) -> String {
        let mut out = format!(
            "[{}] {} error: {}\n",
            self.level.as_str().to_uppercase(),
            self.category(),
            self.message
        );
        out.push_str(&format!(
            "  Strategy: {} ({})\n",
            self.strategy,
            if self.recoverable {
                "recoverable"
            } else {
                "not recoverable"
            }
        ));
        out.push_str(&format!(
            "  Timestamp: {}\n",
            self.context.timestamp.to_rfc3339()
        ));
        if let Some(location) = &self.context.location {
            out.push_str(&format!("  Location: {}\n", location));
        }
        if let Some(component) = &self.context.component {
            out.push_str(&format!("  Component: {}\n", component));
        }
        if let Some(operation) = &self.context.operation {
            out.push_str(&format!("  Operation: {}\n", operation));
        }
        match &self.kind {
            ErrorKind::FileSystem { path, io_kind } => {
                if let Some(path) = path {
                    out.push_str(&format!("  Path: {}\n", path.display()));
                }
                if let Some(kind) = io_kind {
                    out.push_str(&format!("  IO kind: {:?}\n", kind));
                }
            }
            ErrorKind::Parsing { line_text } => {
                if let Some(line) = line_text {
                    out.push_str(&format!("  Line text: {}\n", line));
                }
            }
            ErrorKind::Provider { provider_type } => {
                out.push_str(&format!("  Provider: {}\n", provider_type));
            }
            ErrorKind::Command { command } => {
                out.push_str(&format!("  Command: {}\n", command));
            }
            ErrorKind::Configuration { key } => {
                out.push_str(&format!("  Configuration key: {}\n", key));
            }
            ErrorKind::Network { url, status } => {
                out.push_str(&format!("  URL: {}\n", url));
                if let Some(status) = status {
                    out.push_str(&format!("  Status: {}\n", status));
                }
            }
            ErrorKind::Unknown => {}
        }
        if let Some(data) = &self.context.data {
            out.push_str(&format!("  Data: {}\n", data));
        }
        if let Some(inner) = &self.inner {
            out.push_str(&format!("  Caused by: {}\n", inner));
        }
        out.trim_end().to_string()
    }

    /// Structured serialization of the error
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "message": self.message,
                "category": self.category(),
                "serialization_error": e.to_string(),
            })
        })
    }
}

impl fmt::Display for TaxonomyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for TaxonomyError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .as_deref()
            .map(|inner| inner as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_category_defaults() {
        let cases = [
            (ErrorCategory::FileSystem, ErrorLevel::Error, RecoveryStrategy::Fallback),
            (ErrorCategory::Parsing, ErrorLevel::Warning, RecoveryStrategy::Fallback),
            (ErrorCategory::Provider, ErrorLevel::Warning, RecoveryStrategy::Retry),
            (ErrorCategory::Command, ErrorLevel::Error, RecoveryStrategy::Skip),
            (ErrorCategory::Configuration, ErrorLevel::Warning, RecoveryStrategy::Fallback),
            (ErrorCategory::Network, ErrorLevel::Warning, RecoveryStrategy::Retry),
            (ErrorCategory::Unknown, ErrorLevel::Error, RecoveryStrategy::None),
        ];

        for (category, level, strategy) in cases {
            assert_eq!(category.default_level(), level);
            assert_eq!(category.default_strategy(), strategy);
        }
    }

    #[test]
    fn test_specializations_keep_their_category() {
        assert_eq!(
            TaxonomyError::file_system("x", None).category(),
            ErrorCategory::FileSystem
        );
        assert_eq!(
            TaxonomyError::parsing("x", None).category(),
            ErrorCategory::Parsing
        );
        assert_eq!(
            TaxonomyError::provider("x", ProviderType::CodeLens).category(),
            ErrorCategory::Provider
        );
        assert_eq!(
            TaxonomyError::command("x", "refresh").category(),
            ErrorCategory::Command
        );
        assert_eq!(
            TaxonomyError::configuration("x", "debounce").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            TaxonomyError::network("x", "https://example.com", Some(503)).category(),
            ErrorCategory::Network
        );
        assert_eq!(TaxonomyError::unknown("x").category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_unknown_is_not_recoverable_by_default() {
        let error = TaxonomyError::unknown("boom");
        assert!(!error.recoverable);

        let error = TaxonomyError::provider("boom", ProviderType::Decoration);
        assert!(error.recoverable);
    }

    #[test]
    fn test_overrides() {
        let error = TaxonomyError::parsing("bad heading", None)
            .with_level(ErrorLevel::Critical)
            .with_strategy(RecoveryStrategy::Skip)
            .with_recoverable(false);

        assert_eq!(error.level, ErrorLevel::Critical);
        assert_eq!(error.strategy, RecoveryStrategy::Skip);
        assert!(!error.recoverable);
        assert_eq!(error.category(), ErrorCategory::Parsing);
    }

    #[test]
    fn test_from_io_error_keeps_kind_and_source() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let error = TaxonomyError::from_io_error(io_error, Some(PathBuf::from("/tmp/a.md")));

        assert_eq!(error.category(), ErrorCategory::FileSystem);
        match &error.kind {
            ErrorKind::FileSystem { path, io_kind } => {
                assert_eq!(path.as_deref(), Some(std::path::Path::new("/tmp/a.md")));
                assert_eq!(*io_kind, Some(io::ErrorKind::NotFound));
            }
            _ => panic!("Expected filesystem kind"),
        }
        assert!(error.source().is_some());
        assert_eq!(error.resource().as_deref(), Some("/tmp/a.md"));
    }

    #[test]
    fn test_from_anyhow_keeps_embedded_taxonomy_error() {
        let original = TaxonomyError::network("timeout", "https://sink", None);
        let converted = TaxonomyError::from_anyhow(anyhow::Error::new(original.clone()));
        assert_eq!(converted.category(), ErrorCategory::Network);
        assert_eq!(converted.message, "timeout");

        let converted = TaxonomyError::from_anyhow(anyhow::anyhow!("plain failure"));
        assert_eq!(converted.category(), ErrorCategory::Unknown);
        assert_eq!(converted.message, "plain failure");
        assert!(converted.inner().is_some());
    }

    #[test]
    fn test_identity_key() {
        let a = TaxonomyError::parsing("bad", None)
            .with_component("parser")
            .with_operation("parse");
        let b = TaxonomyError::parsing("bad", None)
            .with_component("parser")
            .with_operation("parse");
        let c = TaxonomyError::parsing("bad", None)
            .with_component("parser")
            .with_operation("reparse");

        assert_eq!(a.identity_key(), b.identity_key());
        assert_ne!(a.identity_key(), c.identity_key());
        assert_eq!(a.identity_key(), "parsing|bad|parser|parse");
    }

    #[test]
    fn test_details_is_deterministic_and_complete() {
        let error = TaxonomyError::parsing("unexpected token", Some("- [?] task".to_string()))
            .with_component("todo-parser")
            .with_operation("parse")
            .with_location(ErrorLocation::at("notes.md", 12, Some(3)))
            .with_data(serde_json::json!({"attempt": 2}));

        let details = error.details();
        assert_eq!(details, error.details());
        assert!(details.starts_with("[WARNING] parsing error: unexpected token"));
        assert!(details.contains("Location: notes.md:12:3"));
        assert!(details.contains("Component: todo-parser"));
        assert!(details.contains("Operation: parse"));
        assert!(details.contains("Line text: - [?] task"));
        assert!(details.contains("Data: {\"attempt\":2}"));
    }

    #[test]
    fn test_to_json() {
        let error = TaxonomyError::provider("render failed", ProviderType::Decoration)
            .with_component("decorations");
        let json = error.to_json();

        assert_eq!(json["category"], "provider");
        assert_eq!(json["provider_type"], "decoration");
        assert_eq!(json["level"], "warning");
        assert_eq!(json["strategy"], "retry");
        assert_eq!(json["recoverable"], true);
        assert_eq!(json["context"]["component"], "decorations");
    }

    #[test]
    fn test_level_ordering() {
        assert!(ErrorLevel::Info < ErrorLevel::Warning);
        assert!(ErrorLevel::Warning < ErrorLevel::Error);
        assert!(ErrorLevel::Error < ErrorLevel::Critical);
    }

    #[test]
    fn test_category_index_is_dense() {
        for (i, category) in ErrorCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }
}
