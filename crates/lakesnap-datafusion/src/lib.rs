//! DataFusion integration for `lakesnap-core`.
//!
//! This crate keeps all DataFusion types out of `lakesnap-core`. A
//! [`ResolvedSnapshot`] is turned into a table by reading exactly the kept
//! URIs with the Parquet reader, so superseded copies sitting next to them in
//! storage are never scanned.

use std::sync::Arc;

use datafusion::{
    common::TableReference,
    error::{DataFusionError, Result},
    prelude::{ParquetReadOptions, SessionContext},
};
use lakesnap_core::{
    snapshot::{ResolvedSnapshot, SnapshotResolver},
    storage::{ObjectStoreLister, SourceLocation},
};
use object_store::ObjectStore;
use url::Url;

/// Make `store` reachable from `ctx` under the location's base URL.
///
/// Local locations need nothing: `file://` URIs are absolute and served by
/// the session's built-in local store.
pub fn register_location_store(
    ctx: &SessionContext,
    location: &SourceLocation,
    store: Arc<dyn ObjectStore>,
) -> Result<()> {
    if let SourceLocation::S3 { .. } = location {
        let base = location
            .base_url()
            .map_err(|e| DataFusionError::External(Box::new(e)))?;
        let url = Url::parse(&base).map_err(|e| DataFusionError::External(Box::new(e)))?;
        ctx.register_object_store(&url, store);
        log::debug!("registered object store for {url}");
    }
    Ok(())
}

/// Register `snapshot` as table `table_name` in `ctx`.
///
/// Any table already registered under that name is replaced, so calling this
/// again after a refresh swaps the table in place.
pub async fn register_snapshot(
    ctx: &SessionContext,
    table_name: &str,
    resolver: &SnapshotResolver,
    store: Arc<dyn ObjectStore>,
    snapshot: &ResolvedSnapshot,
) -> Result<()> {
    register_location_store(ctx, resolver.location(), store)?;

    let options = ParquetReadOptions {
        file_extension: resolver.selector().suffix(),
        ..Default::default()
    };
    let df = ctx.read_parquet(snapshot.uris.clone(), options).await?;

    let table = TableReference::bare(table_name);
    ctx.deregister_table(table.clone())?;
    ctx.register_table(table, df.into_view())?;

    log::info!(
        "registered table '{table_name}' over {} files",
        snapshot.uris.len()
    );
    Ok(())
}

/// List, select and register in one step.
///
/// Resolution errors (including an empty prefix) are returned as
/// [`DataFusionError::External`] wrapping the original
/// [`lakesnap_core::snapshot::ResolveError`].
pub async fn load_latest(
    ctx: &SessionContext,
    table_name: &str,
    resolver: &SnapshotResolver,
    store: Arc<dyn ObjectStore>,
) -> Result<ResolvedSnapshot> {
    let lister = ObjectStoreLister::new(Arc::clone(&store));
    let snapshot = resolver
        .resolve(&lister)
        .await
        .map_err(|e| DataFusionError::External(Box::new(e)))?;

    register_snapshot(ctx, table_name, resolver, store, &snapshot).await?;
    Ok(snapshot)
}
