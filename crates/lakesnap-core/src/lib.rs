//! Core pieces for loading the latest state of an append-only Parquet
//! dataset.
//!
//! A dataset directory (an S3 prefix or a local directory) accumulates
//! several physical copies of each logical part as it gets rewritten. This
//! crate lists the directory, keeps the newest copy of every part, and hands
//! back fully-qualified URIs for a query engine to read:
//!
//! - `partition`: how a filename maps to a logical part (`PartitionKeyRule`).
//! - `selection`: the latest-version selection itself (`LatestSelector`,
//!   `select_latest`).
//! - `storage`: source locations, `object_store` clients, and listing.
//! - `snapshot`: listing + selection + URI building in one call.
//! - `config`: TOML configuration for all of the above.
//!
//! Query-engine integration lives in `lakesnap-datafusion`; the interactive
//! surface lives in `lakesnap-cli`.
#![deny(missing_docs)]
pub mod config;
pub mod partition;
pub mod selection;
pub mod snapshot;
pub mod storage;

pub use config::LoaderConfig;
pub use partition::{KeyMode, PartitionId, PartitionKeyRule};
pub use selection::{LatestSelector, ObjectRecord, Selection, select_latest};
pub use snapshot::{ResolvedSnapshot, SnapshotResolver};
