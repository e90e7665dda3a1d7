//! Resolve the latest snapshot of a dataset.
//!
//! A snapshot is the outcome of one listing pass: the keys chosen by
//! [`LatestSelector`] together with the fully-qualified URIs a query engine
//! should read. Nothing is cached; calling [`SnapshotResolver::resolve`]
//! again lists the prefix again.

use snafu::prelude::*;

use crate::{
    config::{ConfigError, LoaderConfig},
    selection::{LatestSelector, SelectError, Selection},
    storage::{ObjectLister, SourceLocation, StorageError},
};

/// Result alias for snapshot resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Errors raised while resolving a snapshot.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ResolveError {
    /// Listing the prefix failed.
    #[snafu(display("{source}"))]
    Listing {
        /// Underlying storage error.
        source: StorageError,
    },

    /// Selection over the listing failed (including an empty result).
    #[snafu(display("{source}"))]
    Select {
        /// Underlying selection error.
        source: SelectError,
    },

    /// A kept key could not be turned into a URI.
    #[snafu(display("Cannot build URI for '{key}': {source}"))]
    ObjectUri {
        /// The key in question.
        key: String,
        /// Underlying storage error.
        source: StorageError,
    },
}

impl ResolveError {
    /// True when the prefix held no matching objects.
    pub fn is_empty_result(&self) -> bool {
        matches!(
            self,
            ResolveError::Select {
                source: SelectError::EmptyResult { .. }
            }
        )
    }
}

/// One resolved snapshot: the selection and the URIs of its kept objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSnapshot {
    /// Full selection outcome.
    pub selection: Selection,
    /// `uris[i]` addresses `selection.kept[i]`.
    pub uris: Vec<String>,
}

impl ResolvedSnapshot {
    /// Kept keys, newest first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.selection.keys()
    }

    /// True when both snapshots keep exactly the same keys, in the same order.
    pub fn same_keys(&self, other: &ResolvedSnapshot) -> bool {
        self.keys().eq(other.keys())
    }
}

/// Lists a prefix of a [`SourceLocation`] and selects the latest copies.
#[derive(Debug, Clone)]
pub struct SnapshotResolver {
    location: SourceLocation,
    prefix: String,
    selector: LatestSelector,
}

impl SnapshotResolver {
    /// Create a resolver over `prefix` of `location`.
    pub fn new(location: SourceLocation, prefix: impl Into<String>, selector: LatestSelector) -> Self {
        Self {
            location,
            prefix: prefix.into(),
            selector,
        }
    }

    /// Build a resolver from configuration.
    pub fn from_config(config: &LoaderConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.source.source_location()?,
            config.source.prefix.clone(),
            config.selector()?,
        ))
    }

    /// The location being listed.
    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    /// The key prefix being listed.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The selector applied to each listing.
    pub fn selector(&self) -> &LatestSelector {
        &self.selector
    }

    /// List the prefix through `lister`, select, and build URIs.
    pub async fn resolve(&self, lister: &dyn ObjectLister) -> ResolveResult<ResolvedSnapshot> {
        let records = lister
            .list_records(&self.prefix)
            .await
            .context(ListingSnafu)?;
        let listed = records.len();

        let selection = self.selector.select(&records).context(SelectSnafu)?;

        let uris = selection
            .kept
            .iter()
            .map(|obj| {
                self.location
                    .object_uri(&obj.record.key)
                    .context(ObjectUriSnafu {
                        key: obj.record.key.clone(),
                    })
            })
            .collect::<ResolveResult<Vec<_>>>()?;

        log::info!(
            "resolved {} of {listed} objects under {}/{} ({} superseded, {} ignored)",
            selection.kept.len(),
            self.location,
            self.prefix.trim_start_matches('/'),
            selection.superseded,
            selection.ignored,
        );

        Ok(ResolvedSnapshot { selection, uris })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{DateTime, TimeZone, Utc};
    use snafu::IntoError;

    use super::*;
    use crate::{
        partition::PartitionKeyRule,
        selection::ObjectRecord,
        storage::{BackendError, StorageResult},
    };

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    struct FixedLister {
        records: Mutex<Vec<ObjectRecord>>,
    }

    impl FixedLister {
        fn new(records: Vec<ObjectRecord>) -> Self {
            Self {
                records: Mutex::new(records),
            }
        }

        fn replace(&self, records: Vec<ObjectRecord>) {
            *self.records.lock().unwrap() = records;
        }
    }

    #[async_trait::async_trait]
    impl ObjectLister for FixedLister {
        async fn list_records(&self, prefix: &str) -> StorageResult<Vec<ObjectRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.key.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    struct FailingLister;

    #[async_trait::async_trait]
    impl ObjectLister for FailingLister {
        async fn list_records(&self, prefix: &str) -> StorageResult<Vec<ObjectRecord>> {
            Err(crate::storage::ListSnafu { prefix }.into_error(BackendError::Local(
                std::io::Error::other("connection reset"),
            )))
        }
    }

    fn resolver() -> SnapshotResolver {
        SnapshotResolver::new(
            SourceLocation::s3("lake"),
            "delta/storm_events/",
            LatestSelector::new(".parquet").with_rule(PartitionKeyRule::default()),
        )
    }

    #[tokio::test]
    async fn resolves_uris_for_newest_copies() -> TestResult {
        let lister = FixedLister::new(vec![
            ObjectRecord::new("delta/storm_events/part-00000-old.parquet", ts(100)),
            ObjectRecord::new("delta/storm_events/part-00000-new.parquet", ts(200)),
            ObjectRecord::new("delta/storm_events/part-00001-a.parquet", ts(150)),
            ObjectRecord::new("delta/storm_events/_delta_log/0.json", ts(300)),
        ]);

        let snapshot = resolver().resolve(&lister).await?;

        assert_eq!(
            snapshot.uris,
            vec![
                "s3://lake/delta/storm_events/part-00000-new.parquet",
                "s3://lake/delta/storm_events/part-00001-a.parquet",
            ]
        );
        assert_eq!(snapshot.uris.len(), snapshot.selection.kept.len());
        assert_eq!(snapshot.selection.superseded, 1);
        assert_eq!(snapshot.selection.ignored, 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_prefix_is_reported() {
        let lister = FixedLister::new(vec![ObjectRecord::new(
            "delta/storm_events/_delta_log/0.json",
            ts(1),
        )]);

        let err = resolver().resolve(&lister).await.unwrap_err();
        assert!(err.is_empty_result());
        assert!(err.to_string().contains("No objects ending with '.parquet'"));
    }

    #[tokio::test]
    async fn listing_failure_propagates() {
        let err = resolver().resolve(&FailingLister).await.unwrap_err();
        assert!(matches!(err, ResolveError::Listing { .. }));
        assert!(!err.is_empty_result());
    }

    #[tokio::test]
    async fn each_resolve_lists_again() -> TestResult {
        let lister = FixedLister::new(vec![ObjectRecord::new(
            "delta/storm_events/part-00000-a.parquet",
            ts(1),
        )]);
        let resolver = resolver();

        let first = resolver.resolve(&lister).await?;

        lister.replace(vec![
            ObjectRecord::new("delta/storm_events/part-00000-a.parquet", ts(1)),
            ObjectRecord::new("delta/storm_events/part-00000-b.parquet", ts(2)),
        ]);
        let second = resolver.resolve(&lister).await?;

        assert!(!first.same_keys(&second));
        assert_eq!(
            second.keys().collect::<Vec<_>>(),
            vec!["delta/storm_events/part-00000-b.parquet"]
        );

        let third = resolver.resolve(&lister).await?;
        assert!(second.same_keys(&third));
        Ok(())
    }

    #[test]
    fn from_config_applies_sections() -> TestResult {
        let cfg = LoaderConfig::from_toml_str(
            "[source]\nlocation = \"s3://lake\"\nprefix = \"delta/t/\"\nsuffix = \".pq\"\n",
        )?;
        let resolver = SnapshotResolver::from_config(&cfg)?;
        assert_eq!(resolver.location(), &SourceLocation::s3("lake"));
        assert_eq!(resolver.prefix(), "delta/t/");
        assert_eq!(resolver.selector().suffix(), ".pq");
        Ok(())
    }
}
