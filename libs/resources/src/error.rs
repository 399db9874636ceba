//! Error types for resource parsing.

use thiserror::Error;

/// Errors that can occur when parsing a resource vector.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A resource entry is missing the `name:value` separator.
    #[error("resource entry '{0}' is missing the ':' separator")]
    MissingSeparator(String),

    /// A resource entry has an empty name.
    #[error("resource entry '{0}' has an empty name")]
    EmptyName(String),

    /// A scalar value failed to parse or was negative.
    #[error("invalid scalar value '{0}'")]
    InvalidScalar(String),

    /// A range list failed to parse.
    #[error("invalid range '{0}'")]
    InvalidRange(String),
}
