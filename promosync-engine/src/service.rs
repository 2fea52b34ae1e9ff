//! Application-facing facade over the read path and the loader.

use std::path::Path;
use std::sync::Arc;

use promosync_core::{Promotion, StorageError, SyncResult};
use promosync_storage::CacheAside;

use crate::loader::{IngestionLoader, LoadReport, RecordSink};

/// What the HTTP layer talks to.
#[derive(Clone)]
pub struct PromotionService {
    reader: CacheAside,
    loader: IngestionLoader,
    sink: Arc<dyn RecordSink>,
}

impl PromotionService {
    pub fn new(reader: CacheAside, loader: IngestionLoader, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            reader,
            loader,
            sink,
        }
    }

    /// Look up a promotion in the live replica, through the cache.
    pub async fn get_promotion(&self, id: &str) -> SyncResult<Promotion> {
        self.reader.get(id).await?.ok_or_else(|| {
            StorageError::NotFound { id: id.to_string() }.into()
        })
    }

    /// Replace the primary with the contents of `path` and announce it.
    pub async fn process_file(&self, path: impl AsRef<Path>) -> SyncResult<LoadReport> {
        self.loader.load_file(path, self.sink.clone()).await
    }
}
