//! PostgreSQL to PostgreSQL: extract once, recreate structure, copy tables in
//! parallel, then add foreign keys.

use super::{TableFailure, TransferSummary};
use crate::config::{DatabaseConfig, EngineType, Phases, TransferOptions};
use crate::drivers::postgres::{self, PgPageReader, PgPageWriter};
use crate::error::{Result, TransferError};
use crate::schema::{
    quote_ident, Column, CreationReport, SchemaCreator, SchemaExtractor, SequenceRef,
    StatementExecutor, Table,
};
use crate::transfer::{BatchCopyJob, Job, WorkerPool};
use deadpool_postgres::Pool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Relational transfer orchestrator, built per invocation.
pub struct RelationalTransfer {
    source: DatabaseConfig,
    target: DatabaseConfig,
    options: TransferOptions,
}

impl RelationalTransfer {
    pub fn new(source: DatabaseConfig, target: DatabaseConfig, options: TransferOptions) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    /// Run the schema and/or data phases.
    ///
    /// Connection, extraction and schema creation failures are fatal. Table
    /// copy failures are recorded in the summary and the run completes.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<TransferSummary> {
        let mut summary = TransferSummary::begin(&EngineType::Postgres);
        let workers = self.options.get_workers();

        // One connection per worker plus one for metadata.
        let source_pool = postgres::connect(&self.source, workers + 1, "source").await?;
        let target_pool = postgres::connect(&self.target, workers + 1, "target").await?;

        let tables = SchemaExtractor::new(&source_pool)
            .extract_tables(self.source.schema.as_deref())
            .await?;
        summary.tables_total = tables.len();

        if self.options.schema_only && self.options.data_only {
            info!("Both schema-only and data-only set; running a full transfer");
        }
        let phases = self.options.phases();

        let (before_copy, after_copy) = schema_stages(phases);

        if let Some(stage) = before_copy {
            info!("Creating schema on target ({} tables)", tables.len());
            let report = create_schema(&target_pool, &tables, stage).await?;
            summary.indexes_skipped = report.indexes_skipped.len();
        }

        if !phases.data {
            summary.tables_succeeded = tables.len();
            info!("Schema-only transfer finished");
            return Ok(summary.finish());
        }

        let shared: Vec<Arc<Table>> = tables.iter().cloned().map(Arc::new).collect();
        let mut to_copy: Vec<Arc<Table>> = shared
            .iter()
            .filter(|t| t.row_count > 0)
            .cloned()
            .collect();
        to_copy.sort_by(|a, b| b.row_count.cmp(&a.row_count));

        let total_rows: u64 = to_copy.iter().map(|t| t.row_count).sum();
        info!(
            "Copying {} rows from {} tables with {} workers",
            total_rows,
            to_copy.len(),
            workers
        );

        let progress = self.options.progress.clone();
        progress.begin("rows", total_rows);

        let batch_size = self.options.batch_size as u64;
        let jobs: Vec<_> = to_copy
            .iter()
            .map(|table| {
                BatchCopyJob::new(
                    table.full_name(),
                    table.row_count,
                    batch_size,
                    PgPageReader::new(source_pool.clone(), table.clone(), self.options.pagination),
                    PgPageWriter::new(target_pool.clone(), table.clone()),
                    progress.clone(),
                )
            })
            .collect();

        let outcome = run_copy_jobs(jobs, workers, cancel).await;
        progress.finish();

        summary.rows_transferred = outcome.rows;
        summary.tables_succeeded = tables.len() - outcome.failed.len();
        summary.failed_tables = outcome.failed;

        if outcome.cancelled {
            warn!("Transfer cancelled; {} rows were committed", summary.rows_transferred);
            return Err(TransferError::Cancelled);
        }

        sync_sequences(&target_pool, &shared).await;

        if let Some(stage) = after_copy {
            let failed: HashSet<String> =
                summary.failed_tables.iter().map(|f| f.table.clone()).collect();
            let constrained = constrainable(&tables, &failed);
            create_schema(&target_pool, &constrained, stage).await?;
        }

        if summary.failed_tables.is_empty() {
            info!("Transfer finished: {} rows", summary.rows_transferred);
        } else {
            warn!(
                "Transfer finished with {} failed tables: {} rows",
                summary.failed_tables.len(),
                summary.rows_transferred
            );
        }
        Ok(summary.finish())
    }
}

/// Which creation passes run in one target transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStage {
    /// Tables, indexes and foreign keys.
    Full,
    /// Tables and indexes.
    Structure,
    /// Foreign keys only.
    ForeignKeys,
}

/// Creation stages to run before and after the copy phase.
///
/// When rows are copied, foreign keys are added only after every table job
/// has finished so child rows never wait on their parents.
pub fn schema_stages(phases: Phases) -> (Option<SchemaStage>, Option<SchemaStage>) {
    match (phases.schema, phases.data) {
        (true, true) => (Some(SchemaStage::Structure), Some(SchemaStage::ForeignKeys)),
        (true, false) => (Some(SchemaStage::Full), None),
        (false, _) => (None, None),
    }
}

/// Run one creation stage through `exec`.
pub async fn apply_schema<E>(
    exec: &mut E,
    tables: &[Table],
    stage: SchemaStage,
) -> Result<CreationReport>
where
    E: StatementExecutor + ?Sized,
{
    let creator = SchemaCreator::new();
    match stage {
        SchemaStage::Full => creator.create_tables(exec, tables).await,
        SchemaStage::Structure => creator.create_structure(exec, tables).await,
        SchemaStage::ForeignKeys => {
            let foreign_keys_created = creator.create_foreign_keys(exec, tables).await?;
            Ok(CreationReport {
                foreign_keys_created,
                ..CreationReport::default()
            })
        }
    }
}

/// Run one creation stage in its own transaction and commit once.
async fn create_schema(
    pool: &Pool,
    tables: &[Table],
    stage: SchemaStage,
) -> Result<CreationReport> {
    let mut client = pool
        .get()
        .await
        .map_err(|e| TransferError::pool(e, "getting connection for schema creation"))?;

    let mut tx = client.transaction().await?;
    // Dropping the transaction on error rolls it back.
    let report = apply_schema(&mut tx, tables, stage).await?;
    tx.commit().await?;
    Ok(report)
}

/// Tables with the foreign keys that can still be added: those whose own
/// table and referenced table both copied completely.
pub fn constrainable(tables: &[Table], failed: &HashSet<String>) -> Vec<Table> {
    tables
        .iter()
        .map(|table| {
            let mut table = table.clone();
            let name = table.full_name();
            table.foreign_keys.retain(|fk| {
                let referenced = format!("{}.{}", fk.ref_schema, fk.ref_table);
                let keep = !failed.contains(&name) && !failed.contains(&referenced);
                if !keep {
                    warn!(
                        "Skipping foreign key {} on {}: {} did not copy completely",
                        fk.name,
                        name,
                        if failed.contains(&name) { &name } else { &referenced }
                    );
                }
                keep
            });
            table
        })
        .collect()
}

/// Fan-in result of the copy phase.
#[derive(Debug, Default)]
pub struct CopyPhaseOutcome {
    pub rows: u64,
    pub succeeded: Vec<String>,
    pub failed: Vec<TableFailure>,
    /// Submission stopped because the run was cancelled.
    pub cancelled: bool,
}

/// Submit one job per table to a pool of `workers` and wait for all of them.
///
/// A failing job is logged and recorded; it never stops its siblings.
pub async fn run_copy_jobs<J>(
    jobs: Vec<J>,
    workers: usize,
    cancel: &CancellationToken,
) -> CopyPhaseOutcome
where
    J: Job<Output = u64>,
{
    let pool = WorkerPool::new(workers);
    let mut outcome = CopyPhaseOutcome::default();
    let mut handles = Vec::with_capacity(jobs.len());

    let mut pending = jobs.into_iter();
    for job in pending.by_ref() {
        match pool.submit(job, cancel).await {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                warn!("Stopped submitting copy jobs: {}", e);
                outcome.cancelled = true;
                break;
            }
        }
    }
    for job in pending {
        debug!("{}: not started", job.label());
    }

    for handle in handles {
        let table = handle.label().to_string();
        match handle.await {
            Ok(rows) => {
                outcome.rows += rows;
                outcome.succeeded.push(table);
            }
            Err(e) => {
                error!("Table {} failed: {}", table, e);
                let rows_copied = e.rows_copied().unwrap_or(0);
                outcome.rows += rows_copied;
                outcome.failed.push(TableFailure {
                    table,
                    rows_copied,
                    error: e.to_string(),
                });
            }
        }
    }

    pool.shutdown().await;
    outcome
}

/// SQL and text parameters that move a column's sequence past `MAX(column)`.
pub fn sequence_sync_sql(table: &Table, column: &Column, sequence: &SequenceRef) -> (String, Vec<String>) {
    let next = format!(
        "COALESCE((SELECT MAX({}) FROM {}), 0) + 1",
        quote_ident(&column.name),
        table.qualified_ident()
    );
    match sequence {
        SequenceRef::Named(name) => (
            format!("SELECT setval($1::text::regclass, {}, false)", next),
            vec![name.clone()],
        ),
        SequenceRef::Owned => (
            format!("SELECT setval(pg_get_serial_sequence($1, $2), {}, false)", next),
            vec![table.qualified_ident(), column.name.clone()],
        ),
    }
}

/// Move target sequences past copied values. Failures are warnings.
async fn sync_sequences(pool: &Pool, tables: &[Arc<Table>]) {
    let client = match pool.get().await {
        Ok(client) => client,
        Err(e) => {
            warn!("Skipping sequence sync: {}", e);
            return;
        }
    };

    for table in tables {
        for (column, sequence) in table.sequence_columns() {
            let (sql, params) = sequence_sync_sql(table, column, &sequence);
            let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = params
                .iter()
                .map(|p| p as &(dyn tokio_postgres::types::ToSql + Sync))
                .collect();
            match client.query(sql.as_str(), &refs).await {
                Ok(_) => debug!("{}.{}: sequence synced", table.full_name(), column.name),
                Err(e) => warn!(
                    "Failed to sync sequence for {}.{}: {}",
                    table.full_name(),
                    column.name,
                    e
                ),
            }
        }
    }
}
