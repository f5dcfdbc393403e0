//! Error types for image coordinate validation.

use thiserror::Error;

/// Errors that can occur when building image coordinates or URLs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// One of the coordinate components is empty.
    #[error("image coordinate {field} cannot be empty")]
    EmptyComponent { field: &'static str },

    /// The mirror base URL is not an http(s) URL.
    #[error("invalid mirror URL '{0}': expected http:// or https://")]
    InvalidMirror(String),
}
