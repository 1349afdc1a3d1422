/// Typed, leveled and categorized error values
pub mod errors;

pub use errors::{
    ErrorCategory, ErrorContext, ErrorKind, ErrorLevel, ErrorLocation, ProviderType,
    RecoveryStrategy, TaxonomyError,
};
