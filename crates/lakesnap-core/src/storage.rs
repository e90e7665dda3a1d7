//! Source locations, object-store access, and key-to-URI mapping.
//!
//! A dataset lives under a prefix of some backend: an S3 bucket or a local
//! directory. This module turns a user-facing location string into a
//! [`SourceLocation`], builds an [`ObjectStore`] client for it, and maps the
//! keys returned by a listing back to fully-qualified URIs the query engine
//! can fetch.
//!
//! Credentials are never handled here directly: the S3 client is built with
//! [`AmazonS3Builder::from_env`], so `AWS_ACCESS_KEY_ID`,
//! `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` and friends are honoured the
//! same way every other `object_store` consumer honours them.

mod error;
mod listing;

pub use error::{BackendError, StorageError};
pub(crate) use error::{BuildStoreSnafu, InvalidLocationSnafu, ListSnafu, LocalPathSnafu};
pub use listing::{ObjectLister, ObjectStoreLister};

use std::{fmt, path::PathBuf, sync::Arc};

use object_store::{ObjectStore, aws::AmazonS3Builder, local::LocalFileSystem};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use snafu::{IntoError, prelude::*};
use url::Url;

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Characters left unescaped in object keys: alphanumerics plus `/ - _ . ~`.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode an object key for use in a URI path.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Where the part files of a dataset are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// An S3 (or S3-compatible) bucket.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Region; falls back to the environment, then `us-east-1`.
        region: Option<String>,
        /// Custom endpoint, e.g. a MinIO or LocalStack URL.
        endpoint: Option<String>,
        /// Permit plain-HTTP endpoints.
        allow_http: bool,
    },
    /// A directory on the local filesystem.
    Local {
        /// Directory that object keys are relative to.
        root: PathBuf,
    },
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::S3 { bucket, .. } => write!(f, "s3://{bucket}"),
            SourceLocation::Local { root } => write!(f, "{}", root.display()),
        }
    }
}

impl SourceLocation {
    /// S3 bucket with default settings.
    pub fn s3(bucket: impl Into<String>) -> Self {
        SourceLocation::S3 {
            bucket: bucket.into(),
            region: None,
            endpoint: None,
            allow_http: false,
        }
    }

    /// Local directory.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        SourceLocation::Local { root: root.into() }
    }

    /// Parse a user-facing location string.
    ///
    /// Accepts `s3://<bucket>`, `file:///<dir>`, or a plain filesystem path.
    /// The key prefix is configured separately, so a path after the bucket
    /// name is rejected rather than silently merged.
    pub fn parse(input: &str) -> StorageResult<Self> {
        let trimmed = input.trim();
        ensure!(
            !trimmed.is_empty(),
            InvalidLocationSnafu {
                input,
                reason: "location is empty",
            }
        );

        if let Some(rest) = trimmed.strip_prefix("s3://") {
            let rest = rest.trim_end_matches('/');
            ensure!(
                !rest.is_empty(),
                InvalidLocationSnafu {
                    input,
                    reason: "missing bucket name",
                }
            );
            ensure!(
                !rest.contains('/'),
                InvalidLocationSnafu {
                    input,
                    reason: "put the key prefix in `prefix`, not in the location",
                }
            );
            return Ok(SourceLocation::s3(rest));
        }

        if trimmed.starts_with("file://") {
            let url = Url::parse(trimmed).map_err(|e| {
                InvalidLocationSnafu {
                    input,
                    reason: e.to_string(),
                }
                .build()
            })?;
            let root = url.to_file_path().map_err(|_| {
                InvalidLocationSnafu {
                    input,
                    reason: "not a local file URL",
                }
                .build()
            })?;
            return Ok(SourceLocation::local(root));
        }

        if let Some((scheme, _)) = trimmed.split_once("://") {
            return InvalidLocationSnafu {
                input,
                reason: format!("unsupported scheme '{scheme}'"),
            }
            .fail();
        }

        Ok(SourceLocation::local(trimmed))
    }

    /// Set the S3 region. No effect on local locations.
    pub fn with_region(mut self, value: Option<String>) -> Self {
        if let SourceLocation::S3 { region, .. } = &mut self {
            *region = value;
        }
        self
    }

    /// Set a custom S3 endpoint. No effect on local locations.
    pub fn with_endpoint(mut self, value: Option<String>) -> Self {
        if let SourceLocation::S3 {
            endpoint,
            allow_http,
            ..
        } = &mut self
        {
            if value.as_deref().is_some_and(|e| e.starts_with("http://")) {
                *allow_http = true;
            }
            *endpoint = value;
        }
        self
    }

    /// Allow plain-HTTP S3 endpoints. No effect on local locations.
    pub fn with_allow_http(mut self, value: bool) -> Self {
        if let SourceLocation::S3 { allow_http, .. } = &mut self {
            *allow_http = *allow_http || value;
        }
        self
    }

    /// Build an object store client rooted at this location.
    ///
    /// Keys listed through the returned store are relative to the bucket
    /// (S3) or to the root directory (local).
    pub fn build_store(&self) -> StorageResult<Arc<dyn ObjectStore>> {
        match self {
            SourceLocation::S3 {
                bucket,
                region,
                endpoint,
                allow_http,
            } => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if *allow_http {
                    builder = builder.with_allow_http(true);
                }

                let store = builder
                    .build()
                    .map_err(BackendError::ObjectStore)
                    .context(BuildStoreSnafu {
                        location: self.to_string(),
                    })?;
                Ok(Arc::new(store))
            }
            SourceLocation::Local { root } => {
                let store = LocalFileSystem::new_with_prefix(root)
                    .map_err(BackendError::ObjectStore)
                    .context(BuildStoreSnafu {
                        location: self.to_string(),
                    })?;
                Ok(Arc::new(store))
            }
        }
    }

    /// URL under which the store is addressed, without a trailing slash:
    /// `s3://<bucket>` or `file:///<canonical root>`.
    pub fn base_url(&self) -> StorageResult<String> {
        match self {
            SourceLocation::S3 { bucket, .. } => Ok(format!("s3://{bucket}")),
            SourceLocation::Local { root } => {
                let path_str = root.display().to_string();
                let abs = std::fs::canonicalize(root)
                    .map_err(BackendError::Local)
                    .context(LocalPathSnafu {
                        path: path_str.clone(),
                    })?;
                let url = Url::from_directory_path(&abs).map_err(|_| {
                    LocalPathSnafu { path: path_str }.into_error(BackendError::Local(
                        std::io::Error::other("path is not absolute"),
                    ))
                })?;
                Ok(url.as_str().trim_end_matches('/').to_string())
            }
        }
    }

    /// Fetchable URI for `key`: the base URL joined with the percent-encoded
    /// key.
    pub fn object_uri(&self, key: &str) -> StorageResult<String> {
        Ok(format!(
            "{}/{}",
            self.base_url()?,
            encode_key(key.trim_start_matches('/'))
        ))
    }
}
