//! MongoDB driver: the document store operations used by collection cloning.

use crate::config::DatabaseConfig;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use bson::{doc, Document};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use mongodb::error::ErrorKind;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Server error code for a missing namespace.
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Name of the index the server creates for `_id`.
pub const ID_INDEX: &str = "_id_";

/// Portable description of a secondary index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
    pub sparse: bool,
    /// TTL (`expireAfterSeconds`).
    pub expire_after: Option<Duration>,
}

impl IndexSpec {
    fn from_model(model: IndexModel) -> Self {
        let options = model.options.unwrap_or_default();
        let name = options.name.unwrap_or_default();
        Self {
            name,
            keys: model.keys,
            unique: options.unique.unwrap_or(false),
            sparse: options.sparse.unwrap_or(false),
            expire_after: options.expire_after,
        }
    }

    fn to_model(&self) -> IndexModel {
        let mut options = IndexOptions::default();
        options.name = Some(self.name.clone());
        if self.unique {
            options.unique = Some(true);
        }
        if self.sparse {
            options.sparse = Some(true);
        }
        options.expire_after = self.expire_after;

        IndexModel::builder()
            .keys(self.keys.clone())
            .options(options)
            .build()
    }
}

/// Result of an unordered bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: u64,
    /// Documents rejected individually (e.g. duplicate `_id`).
    pub rejected: u64,
}

/// Stream of documents from a source collection.
pub type DocumentStream = BoxStream<'static, Result<Document>>;

/// Operations the clone pipeline needs from a document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_collection_names(&self) -> Result<Vec<String>>;

    /// Drop a collection. A missing collection is not an error.
    async fn drop_collection(&self, collection: &str) -> Result<()>;

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>>;

    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()>;

    /// Document count used to size progress. May be an estimate.
    async fn estimated_count(&self, collection: &str) -> Result<u64>;

    async fn open_cursor(&self, collection: &str, batch_size: u32) -> Result<DocumentStream>;

    /// Insert without ordering. Per-document write errors are reported in the
    /// outcome; any other failure is an error.
    async fn insert_unordered(&self, collection: &str, documents: Vec<Document>)
        -> Result<InsertOutcome>;
}

/// A connected MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    /// Connect to the configured database and ping it.
    ///
    /// `endpoint` names the side ("source" or "target") in errors and logs.
    pub async fn connect(config: &DatabaseConfig, endpoint: &str) -> Result<Self> {
        let uri = config.mongo_uri()?;
        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| TransferError::connection(endpoint, e))?;
        let database = client.database(&config.database);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| TransferError::connection(endpoint, e))?;

        info!(
            "Connected to {} MongoDB database '{}'",
            endpoint, config.database
        );
        Ok(Self { client, database })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }

    /// Close the client's connections.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

fn is_namespace_not_found(err: &mongodb::error::Error) -> bool {
    matches!(&*err.kind, ErrorKind::Command(cmd) if cmd.code == NAMESPACE_NOT_FOUND)
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn list_collection_names(&self) -> Result<Vec<String>> {
        Ok(self.database.list_collection_names().await?)
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        match self.collection(collection).drop().await {
            Ok(()) => Ok(()),
            Err(e) if is_namespace_not_found(&e) => {
                debug!("collection {} did not exist on target", collection);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        let models: Vec<IndexModel> = self
            .collection(collection)
            .list_indexes()
            .await?
            .try_collect()
            .await?;
        Ok(models.into_iter().map(IndexSpec::from_model).collect())
    }

    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()> {
        if indexes.is_empty() {
            return Ok(());
        }
        let models: Vec<IndexModel> = indexes.iter().map(IndexSpec::to_model).collect();
        self.collection(collection).create_indexes(models).await?;
        Ok(())
    }

    async fn estimated_count(&self, collection: &str) -> Result<u64> {
        Ok(self
            .collection(collection)
            .estimated_document_count()
            .await?)
    }

    async fn open_cursor(&self, collection: &str, batch_size: u32) -> Result<DocumentStream> {
        let cursor = self
            .collection(collection)
            .find(doc! {})
            .batch_size(batch_size)
            .await?;
        Ok(cursor.map_err(TransferError::from).boxed())
    }

    async fn insert_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome> {
        let attempted = documents.len() as u64;
        if attempted == 0 {
            return Ok(InsertOutcome::default());
        }

        match self
            .collection(collection)
            .insert_many(documents)
            .ordered(false)
            .await
        {
            Ok(result) => Ok(InsertOutcome {
                inserted: result.inserted_ids.len() as u64,
                rejected: 0,
            }),
            Err(e) => match &*e.kind {
                ErrorKind::InsertMany(failure) if failure.write_concern_error.is_none() => {
                    let write_errors = failure.write_errors.as_deref().unwrap_or_default();
                    if write_errors.is_empty() {
                        return Err(e.into());
                    }
                    if let Some(first) = write_errors.first() {
                        warn!(
                            "{}: {} documents rejected (first: code {} {})",
                            collection,
                            write_errors.len(),
                            first.code,
                            first.message
                        );
                    }
                    let rejected = write_errors.len() as u64;
                    Ok(InsertOutcome {
                        inserted: attempted.saturating_sub(rejected),
                        rejected,
                    })
                }
                _ => Err(e.into()),
            },
        }
    }
}
