//! Per-request batching of single-row lookups.
//!
//! Resolving a to-one relation on every row of a list would naively issue one query per row. A
//! [`BatchCache`] coalesces the lookups made by sibling resolvers within the same resolution tick
//! into a single query per target (up to a maximum batch size), and remembers the results for the
//! rest of the request.
//!
//! A fresh cache is created for each request and attached to it as request data, so no state is
//! ever shared between requests. Batches are flushed by detached tasks; once the cache is dropped
//! with its request, any batch still pending is discarded without touching the data source.

use super::{
    backend::{BatchKey, DataSource, EntityRow},
    descriptor::{Catalog, Target},
};
use async_graphql::dataloader::{DataLoader, HashMapCache, Loader};
use async_std::sync::Mutex;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

/// How long a loader waits for more keys before issuing a batch.
const BATCH_DELAY: Duration = Duration::from_millis(1);

/// The default maximum number of keys in one batched query.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

type TargetDataLoader<D> = DataLoader<TargetLoader<D>, HashMapCache>;

/// Request-scoped batching loaders, one per target, created lazily on first use.
pub struct BatchCache<D: DataSource> {
    catalog: Arc<Catalog>,
    source: Arc<D>,
    max_batch_size: usize,
    loaders: Mutex<HashMap<Target, Arc<TargetDataLoader<D>>>>,
    live: Arc<AtomicBool>,
}

impl<D: DataSource> BatchCache<D> {
    pub fn new(catalog: Arc<Catalog>, source: Arc<D>, max_batch_size: usize) -> Self {
        Self {
            catalog,
            source,
            max_batch_size: max_batch_size.max(1),
            loaders: Default::default(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Load the row of `target` identified by `key`.
    ///
    /// A key which matches no row yields [`None`]. If several rows match, one of them is chosen
    /// arbitrarily.
    pub async fn load(
        &self,
        target: Target,
        key: BatchKey,
    ) -> Result<Option<EntityRow>, Arc<D::Error>> {
        let loader = self.loader(target).await;
        loader.load_one(key).await
    }

    async fn loader(&self, target: Target) -> Arc<TargetDataLoader<D>> {
        let mut loaders = self.loaders.lock().await;
        loaders
            .entry(target)
            .or_insert_with(|| {
                tracing::debug!(?target, "creating batch loader");
                let loader = TargetLoader {
                    catalog: self.catalog.clone(),
                    source: self.source.clone(),
                    target,
                    live: self.live.clone(),
                };
                Arc::new(
                    DataLoader::with_cache(loader, async_std::task::spawn, HashMapCache::new())
                        .max_batch_size(self.max_batch_size)
                        .delay(BATCH_DELAY),
                )
            })
            .clone()
    }
}

impl<D: DataSource> Drop for BatchCache<D> {
    fn drop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Batched lookups of rows of a single target.
pub struct TargetLoader<D> {
    catalog: Arc<Catalog>,
    source: Arc<D>,
    target: Target,
    /// Cleared when the owning request goes away.
    live: Arc<AtomicBool>,
}

impl<D: DataSource> Loader<BatchKey> for TargetLoader<D> {
    type Value = EntityRow;
    type Error = Arc<D::Error>;

    async fn load(&self, keys: &[BatchKey]) -> Result<HashMap<BatchKey, EntityRow>, Self::Error> {
        if !self.live.load(Ordering::SeqCst) {
            tracing::debug!(
                target = ?self.target,
                keys = keys.len(),
                "discarding batch for finished request"
            );
            return Ok(HashMap::new());
        }
        tracing::debug!(target = ?self.target, keys = keys.len(), "loading batch");
        let rows = self
            .source
            .load(&self.catalog, self.target, keys)
            .await
            .map_err(Arc::new)?;

        // Keys for the same target may constrain different sets of columns (e.g. a primary key for
        // a singular query and a foreign key for a relation). Index the rows once per column set.
        let mut indices: HashMap<Vec<&str>, HashMap<BatchKey, &EntityRow>> = HashMap::new();
        let mut results = HashMap::new();
        for key in keys {
            let columns = key.column_names().collect::<Vec<_>>();
            let index = indices.entry(columns.clone()).or_insert_with(|| {
                let mut index = HashMap::new();
                for row in &rows {
                    if let Some(row_key) = row.key(columns.iter().copied()) {
                        index.entry(row_key).or_insert(row);
                    }
                }
                index
            });
            if let Some(row) = index.get(key) {
                results.insert(key.clone(), (*row).clone());
            }
        }
        Ok(results)
    }
}
