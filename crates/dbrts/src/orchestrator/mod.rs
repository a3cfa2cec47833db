//! Transfer service: validates the endpoint pair and runs the matching orchestrator.

mod document;
mod relational;

pub use document::{DocumentClone, DocumentTransfer};
pub use relational::{
    apply_schema, constrainable, run_copy_jobs, schema_stages, sequence_sync_sql,
    CopyPhaseOutcome, RelationalTransfer, SchemaStage,
};

use crate::config::{DatabaseConfig, EngineType, TransferOptions};
use crate::drivers::{mongo::MongoStore, postgres};
use crate::error::{Result, TransferError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A table whose copy job failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFailure {
    pub table: String,
    /// Rows committed before the failure.
    pub rows_copied: u64,
    pub error: String,
}

/// Result of a transfer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// Engine both endpoints use.
    pub engine: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    /// Tables or collections found on the source.
    pub tables_total: usize,

    /// Tables or collections processed without error.
    pub tables_succeeded: usize,

    /// Relational tables whose copy failed. The run still completes.
    pub failed_tables: Vec<TableFailure>,

    /// Rows or documents written.
    pub rows_transferred: u64,

    /// Indexes that could not be created and were skipped.
    pub indexes_skipped: usize,

    #[serde(skip)]
    clock: Option<Instant>,
}

impl TransferSummary {
    pub fn begin(engine: &EngineType) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            engine: engine.to_string(),
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            tables_total: 0,
            tables_succeeded: 0,
            failed_tables: Vec::new(),
            rows_transferred: 0,
            indexes_skipped: 0,
            clock: Some(Instant::now()),
        }
    }

    /// Stamp completion time and duration.
    pub fn finish(mut self) -> Self {
        self.completed_at = Utc::now();
        self.duration_seconds = self
            .clock
            .map(|c| c.elapsed().as_secs_f64())
            .unwrap_or_default();
        self
    }

    /// True when no table failed.
    pub fn is_success(&self) -> bool {
        self.failed_tables.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// The orchestrator chosen for an endpoint pair.
pub enum TransferEngine {
    Relational(RelationalTransfer),
    Document(DocumentTransfer),
}

/// Entry point: refuses mismatched engines, then delegates.
pub struct TransferService {
    engine: TransferEngine,
    engine_type: EngineType,
}

impl TransferService {
    /// Validate the endpoint pair and build the matching orchestrator.
    ///
    /// Opens no connections.
    pub fn new(
        source: DatabaseConfig,
        target: DatabaseConfig,
        options: TransferOptions,
    ) -> Result<Self> {
        if source.r#type != target.r#type {
            return Err(TransferError::CrossEngine {
                source_type: source.r#type.to_string(),
                target_type: target.r#type.to_string(),
            });
        }
        options.validate()?;

        let engine_type = source.r#type.clone();
        let engine = match &engine_type {
            EngineType::Postgres => {
                TransferEngine::Relational(RelationalTransfer::new(source, target, options))
            }
            EngineType::Mongo => {
                TransferEngine::Document(DocumentTransfer::new(source, target, options))
            }
            EngineType::Other(name) => return Err(TransferError::UnsupportedEngine(name.clone())),
        };

        Ok(Self {
            engine,
            engine_type,
        })
    }

    pub fn engine_type(&self) -> &EngineType {
        &self.engine_type
    }

    /// Run the transfer. Errors from the orchestrator surface unchanged.
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<TransferSummary> {
        info!("Starting {} transfer", self.engine_type);
        match &self.engine {
            TransferEngine::Relational(engine) => engine.run(cancel).await,
            TransferEngine::Document(engine) => engine.run(cancel).await,
        }
    }
}

/// Open and ping one endpoint.
pub async fn health_check(config: &DatabaseConfig, endpoint: &str) -> Result<()> {
    match &config.r#type {
        EngineType::Postgres => {
            let pool = postgres::connect(config, 1, endpoint).await?;
            pool.close();
            Ok(())
        }
        EngineType::Mongo => {
            let store = MongoStore::connect(config, endpoint).await?;
            store.shutdown().await;
            Ok(())
        }
        EngineType::Other(name) => Err(TransferError::UnsupportedEngine(name.clone())),
    }
}
