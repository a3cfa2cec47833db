//! MongoDB to MongoDB: per collection, drop the target, replicate indexes and
//! copy documents in batches. Collections are processed one at a time and the
//! first collection failure aborts the run.

use super::TransferSummary;
use crate::config::{DatabaseConfig, EngineType, TransferOptions};
use crate::drivers::mongo::{DocumentStore, IndexSpec, MongoStore, ID_INDEX};
use crate::error::{Result, TransferError};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connects both endpoints and runs a [`DocumentClone`].
pub struct DocumentTransfer {
    source: DatabaseConfig,
    target: DatabaseConfig,
    options: TransferOptions,
}

impl DocumentTransfer {
    pub fn new(source: DatabaseConfig, target: DatabaseConfig, options: TransferOptions) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<TransferSummary> {
        let source = MongoStore::connect(&self.source, "source").await?;
        let target = MongoStore::connect(&self.target, "target").await?;

        let clone = DocumentClone::new(source, target, self.options.clone());
        let result = clone.run(cancel).await;

        let (source, target) = clone.into_stores();
        source.shutdown().await;
        target.shutdown().await;
        result
    }
}

/// Clones every collection of a source store into a target store.
pub struct DocumentClone<S, T> {
    source: S,
    target: T,
    options: TransferOptions,
}

impl<S: DocumentStore, T: DocumentStore> DocumentClone<S, T> {
    pub fn new(source: S, target: T, options: TransferOptions) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    pub fn into_stores(self) -> (S, T) {
        (self.source, self.target)
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<TransferSummary> {
        let mut summary = TransferSummary::begin(&EngineType::Mongo);

        let copy_indexes = !self.options.data_only;
        let copy_data = !self.options.schema_only;
        if !copy_indexes && !copy_data {
            warn!("Both schema-only and data-only are set; nothing to do for MongoDB");
            return Ok(summary.finish());
        }

        let mut collections: Vec<String> = self
            .source
            .list_collection_names()
            .await
            .map_err(|e| TransferError::store("source", "list collections", e))?
            .into_iter()
            .filter(|name| {
                let system = name.starts_with("system.");
                if system {
                    debug!("Skipping system collection {}", name);
                }
                !system
            })
            .collect();
        collections.sort();
        summary.tables_total = collections.len();

        for name in &collections {
            if cancel.is_cancelled() {
                warn!("Transfer cancelled before collection {}", name);
                return Err(TransferError::Cancelled);
            }

            info!("Transferring collection {}...", name);
            let copied = self.clone_collection(name, copy_indexes, copy_data).await?;
            summary.rows_transferred += copied;
            summary.tables_succeeded += 1;
        }

        info!(
            "MongoDB transfer finished: {} collections, {} documents",
            summary.tables_succeeded, summary.rows_transferred
        );
        Ok(summary.finish())
    }

    async fn clone_collection(&self, name: &str, copy_indexes: bool, copy_data: bool) -> Result<u64> {
        self.target
            .drop_collection(name)
            .await
            .map_err(|e| TransferError::collection(name, "drop target collection", e))?;

        if copy_indexes {
            self.clone_indexes(name)
                .await
                .map_err(|e| TransferError::collection(name, "clone indexes", e))?;
        }

        if !copy_data {
            return Ok(0);
        }

        self.copy_documents(name)
            .await
            .map_err(|e| TransferError::collection(name, "copy documents", e))
    }

    async fn clone_indexes(&self, name: &str) -> Result<()> {
        let indexes: Vec<IndexSpec> = self
            .source
            .list_indexes(name)
            .await?
            .into_iter()
            .filter(|index| index.name != ID_INDEX)
            .collect();

        if indexes.is_empty() {
            return Ok(());
        }
        debug!("{}: creating {} indexes", name, indexes.len());
        self.target.create_indexes(name, &indexes).await
    }

    async fn copy_documents(&self, name: &str) -> Result<u64> {
        let batch_size = self.options.batch_size.max(1);
        let progress = &self.options.progress;

        let total = self.source.estimated_count(name).await?;
        progress.begin(name, total);

        let mut cursor = self
            .source
            .open_cursor(name, u32::try_from(batch_size).unwrap_or(u32::MAX))
            .await?;

        let mut batch = Vec::with_capacity(batch_size);
        let mut inserted = 0u64;
        let mut rejected = 0u64;

        while let Some(document) = cursor.next().await {
            batch.push(document?);
            if batch.len() >= batch_size {
                let attempted = batch.len() as u64;
                let outcome = self
                    .target
                    .insert_unordered(name, std::mem::take(&mut batch))
                    .await?;
                inserted += outcome.inserted;
                rejected += outcome.rejected;
                progress.increment(attempted);
            }
        }

        if !batch.is_empty() {
            let attempted = batch.len() as u64;
            let outcome = self.target.insert_unordered(name, batch).await?;
            inserted += outcome.inserted;
            rejected += outcome.rejected;
            progress.increment(attempted);
        }
        progress.finish();

        if rejected > 0 {
            warn!("{}: {} documents inserted, {} rejected", name, inserted, rejected);
        } else {
            info!("{}: {} documents inserted", name, inserted);
        }
        Ok(inserted)
    }
}
