use std::{error::Error, fmt, io};

use snafu::{Backtrace, prelude::*};

/// Errors produced by a storage backend.
///
/// Backend-specific failures are wrapped here so higher layers can map them
/// into [`StorageError`] variants with path or prefix context.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
    /// An error reported by the `object_store` crate (S3 or local store).
    ObjectStore(object_store::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
            BackendError::ObjectStore(e) => write!(f, "object store error: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
            BackendError::ObjectStore(e) => Some(e),
        }
    }
}

/// Errors that can occur while resolving a source location or listing it.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The location string could not be interpreted.
    #[snafu(display("Invalid source location '{input}': {reason}"))]
    InvalidLocation {
        /// The location as given by the user.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The object store client could not be constructed.
    #[snafu(display("Failed to configure object store for {location}: {source}"))]
    BuildStore {
        /// Human-readable form of the location.
        location: String,
        /// Underlying backend error.
        source: BackendError,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// Listing a prefix failed part-way.
    #[snafu(display("Failed to list objects under '{prefix}': {source}"))]
    List {
        /// The prefix that was being listed.
        prefix: String,
        /// Underlying backend error.
        source: BackendError,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// A local root could not be turned into an absolute `file://` URL.
    #[snafu(display("Local path cannot be used as a URL root: {path}"))]
    LocalPath {
        /// The offending path.
        path: String,
        /// Underlying I/O error, if resolving the path failed.
        source: BackendError,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },
}
