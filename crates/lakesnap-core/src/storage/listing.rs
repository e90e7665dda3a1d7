use std::sync::Arc;

use futures::TryStreamExt;
use object_store::{ObjectMeta, ObjectStore, path::Path as ObjectPath};
use snafu::ResultExt;

use crate::{
    selection::ObjectRecord,
    storage::{BackendError, ListSnafu, StorageResult},
};

/// Source of `(key, last_modified)` listings.
///
/// Implementations must return the complete listing for `prefix`, with every
/// page consumed. Order is unspecified.
#[async_trait::async_trait]
pub trait ObjectLister: Send + Sync {
    /// List every object under `prefix`.
    async fn list_records(&self, prefix: &str) -> StorageResult<Vec<ObjectRecord>>;
}

/// [`ObjectLister`] backed by any [`ObjectStore`].
///
/// The `object_store` list stream follows continuation tokens itself, so
/// collecting it yields the full listing.
#[derive(Debug, Clone)]
pub struct ObjectStoreLister {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreLister {
    /// Wrap a store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

fn prefix_path(prefix: &str) -> Option<ObjectPath> {
    let trimmed = prefix.trim_matches('/');
    (!trimmed.is_empty()).then(|| ObjectPath::from(trimmed))
}

#[async_trait::async_trait]
impl ObjectLister for ObjectStoreLister {
    async fn list_records(&self, prefix: &str) -> StorageResult<Vec<ObjectRecord>> {
        let path = prefix_path(prefix);

        let metas: Vec<ObjectMeta> = self
            .store
            .list(path.as_ref())
            .try_collect()
            .await
            .map_err(BackendError::ObjectStore)
            .context(ListSnafu { prefix })?;

        log::debug!("listed {} objects under '{prefix}'", metas.len());

        Ok(metas
            .into_iter()
            .map(|meta| ObjectRecord::new(meta.location.to_string(), meta.last_modified))
            .collect())
    }
}
