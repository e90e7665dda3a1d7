//! Latest-version selection over a flat object listing.
//!
//! An append-only dataset that gets rewritten leaves several physical copies
//! of the same logical part in storage. Given the full listing, the selector
//! keeps exactly one key per [`PartitionId`]: the most recently modified one.
//!
//! Ordering contract:
//! - candidates are sorted by `last_modified`, newest first, with a stable
//!   sort, so among equal timestamps the record listed first wins;
//! - the kept keys come back in that newest-first order, but callers should
//!   treat them as a set.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::prelude::*;

use crate::partition::{PartitionId, PartitionKeyError, PartitionKeyRule};

/// Result alias for selection.
pub type SelectResult<T> = Result<T, SelectError>;

/// One entry of an object listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    /// Full object key, `/`-separated.
    pub key: String,
    /// Last modification time reported by the store.
    pub last_modified: DateTime<Utc>,
}

impl ObjectRecord {
    /// Convenience constructor.
    pub fn new(key: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            last_modified,
        }
    }
}

/// Errors from [`LatestSelector::select`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SelectError {
    /// Nothing in the listing ends with the filter suffix. Callers must not
    /// continue with zero source objects.
    #[snafu(display("No objects ending with '{suffix}' found ({listed} listed)"))]
    EmptyResult {
        /// The suffix that was applied.
        suffix: String,
        /// Size of the listing before filtering.
        listed: usize,
    },

    /// A key did not match the partition naming convention (strict mode only).
    #[snafu(display("Cannot derive partition for '{key}': {source}"))]
    MalformedKey {
        /// The object key that failed.
        key: String,
        /// What was wrong with its filename.
        source: PartitionKeyError,
    },
}

/// A kept object together with the partition it represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedObject {
    /// Partition identity of the record.
    #[serde(serialize_with = "serialize_partition")]
    pub partition: PartitionId,
    /// The newest record for that partition.
    #[serde(flatten)]
    pub record: ObjectRecord,
}

fn serialize_partition<S: serde::Serializer>(id: &PartitionId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(id.as_str())
}

/// Outcome of a selection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// One object per partition, newest first.
    pub kept: Vec<SelectedObject>,
    /// Matching records dropped because a newer copy of the same partition exists.
    pub superseded: usize,
    /// Records dropped by the suffix filter.
    pub ignored: usize,
}

impl Selection {
    /// Kept keys in emission order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.kept.iter().map(|o| o.record.key.as_str())
    }

    /// Owned copy of the kept keys.
    pub fn into_keys(self) -> Vec<String> {
        self.kept.into_iter().map(|o| o.record.key).collect()
    }

    /// Number of kept objects.
    pub fn len(&self) -> usize {
        self.kept.len()
    }

    /// `true` when nothing was kept. A successful selection is never empty.
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

/// Configurable latest-version selector.
#[derive(Debug, Clone)]
pub struct LatestSelector {
    suffix: String,
    rule: PartitionKeyRule,
}

impl LatestSelector {
    /// Selector over keys ending with `suffix`, using the default
    /// [`PartitionKeyRule`].
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            rule: PartitionKeyRule::default(),
        }
    }

    /// Replace the partition key rule.
    pub fn with_rule(mut self, rule: PartitionKeyRule) -> Self {
        self.rule = rule;
        self
    }

    /// The suffix filter.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Keep the newest record of every partition among `records` whose key
    /// ends with the configured suffix.
    ///
    /// # Errors
    ///
    /// - [`SelectError::EmptyResult`] if no record passes the suffix filter.
    /// - [`SelectError::MalformedKey`] if the rule is strict and a matching
    ///   key does not follow the naming convention.
    pub fn select(&self, records: &[ObjectRecord]) -> SelectResult<Selection> {
        let mut candidates: Vec<&ObjectRecord> = records
            .iter()
            .filter(|r| r.key.ends_with(self.suffix.as_str()))
            .collect();

        ensure!(
            !candidates.is_empty(),
            EmptyResultSnafu {
                suffix: self.suffix.clone(),
                listed: records.len(),
            }
        );

        let ignored = records.len() - candidates.len();

        // `sort_by` is stable: equal timestamps keep listing order.
        candidates.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

        let mut seen: HashSet<PartitionId> = HashSet::with_capacity(candidates.len());
        let mut kept = Vec::new();
        let mut superseded = 0usize;

        for record in candidates {
            let partition = self
                .rule
                .extract(&record.key)
                .context(MalformedKeySnafu {
                    key: record.key.clone(),
                })?;

            if seen.contains(&partition) {
                log::debug!(
                    "skipping older copy {} of {partition} ({})",
                    record.key,
                    record.last_modified
                );
                superseded += 1;
                continue;
            }

            seen.insert(partition.clone());
            kept.push(SelectedObject {
                partition,
                record: record.clone(),
            });
        }

        Ok(Selection {
            kept,
            superseded,
            ignored,
        })
    }
}

/// Keys of the newest copy of every partition among `records` ending with
/// `filter_suffix`, newest first, using the default partition rule.
///
/// # Errors
///
/// [`SelectError::EmptyResult`] when no key ends with `filter_suffix`.
pub fn select_latest(records: &[ObjectRecord], filter_suffix: &str) -> SelectResult<Vec<String>> {
    LatestSelector::new(filter_suffix)
        .select(records)
        .map(Selection::into_keys)
}
