//! Error types for local validation of API objects.

use thiserror::Error;

/// Errors raised when an API object fails a local sanity check.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The control plane returned a node without an identity.
    #[error("node identity is empty")]
    MissingIdentity,

    /// A label entry is not of the form `key=value`.
    #[error("invalid label '{entry}': expected key=value")]
    InvalidLabel { entry: String },

    /// A label key is empty.
    #[error("label key cannot be empty")]
    EmptyLabelKey,
}

impl ApiError {
    /// Returns true if this error concerns label parsing.
    pub fn is_label_error(&self) -> bool {
        matches!(self, ApiError::InvalidLabel { .. } | ApiError::EmptyLabelKey)
    }
}
