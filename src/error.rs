//! Error handling for store and index operations.
//!
//! All public APIs return [`Result<T>`]. Optimistic commit conflicts are an
//! expected outcome under contention and are therefore reported through
//! [`crate::tx::Commit`] rather than as an error variant.

use std::io;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, QuireError>;

/// Errors that can occur while touching the page store or an index built
/// on top of it.
#[derive(Debug, Error)]
pub enum QuireError {
    /// I/O error from the underlying page file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk state failed validation (bad magic, truncated frame,
    /// checksum mismatch).
    #[error("corruption detected: {0}")]
    Corruption(&'static str),

    /// Invalid argument or page id.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),

    /// The allocator cannot satisfy a page request.
    #[error("out of space: {0}")]
    OutOfSpace(&'static str),

    /// An index structure could not be decoded from its pages.
    #[error("index structure error: {0}")]
    Index(&'static str),
}
