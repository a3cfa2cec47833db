//! Batch copy of one table in fixed-size pages.

use super::pool::Job;
use crate::drivers::postgres::SqlValue;
use crate::error::{Result, TransferError};
use crate::progress::ProgressSink;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// One row, in select-list order.
pub type Row = Vec<SqlValue>;

/// Reads pages from a source table.
#[async_trait]
pub trait PageReader: Send {
    /// Read up to `limit` rows. `offset` counts rows already read by this job.
    async fn read_page(&mut self, offset: u64, limit: u64) -> Result<Vec<Row>>;
}

/// Writes pages into a target table.
#[async_trait]
pub trait PageWriter: Send {
    /// Write all rows of one page atomically.
    async fn write_page(&mut self, rows: Vec<Row>) -> Result<()>;
}

/// Number of pages needed for `rows` rows at `batch_size` per page.
pub fn page_count(rows: u64, batch_size: u64) -> u64 {
    if batch_size == 0 {
        return 0;
    }
    rows.div_ceil(batch_size)
}

/// Copies one table's rows in `ceil(R/B)` sequential pages.
pub struct BatchCopyJob<R, W> {
    table: String,
    row_count: u64,
    batch_size: u64,
    reader: R,
    writer: W,
    progress: Arc<dyn ProgressSink>,
}

impl<R: PageReader, W: PageWriter> BatchCopyJob<R, W> {
    pub fn new(
        table: impl Into<String>,
        row_count: u64,
        batch_size: u64,
        reader: R,
        writer: W,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            table: table.into(),
            row_count,
            batch_size: batch_size.max(1),
            reader,
            writer,
            progress,
        }
    }

    /// Copy all pages, returning the number of rows committed.
    ///
    /// A failed page stops the job. Pages committed before it stay, and the
    /// error carries the table name and rows committed so far.
    pub async fn copy(mut self) -> Result<u64> {
        let started = Instant::now();
        let pages = page_count(self.row_count, self.batch_size);
        let mut offset = 0u64;
        let mut copied = 0u64;

        for page in 0..pages {
            let limit = self.batch_size.min(self.row_count - offset);

            let rows = match self.reader.read_page(offset, limit).await {
                Ok(rows) => rows,
                Err(e) => return Err(TransferError::table_copy(&self.table, copied, e)),
            };
            let n = rows.len() as u64;
            if n == 0 {
                debug!(
                    "{}: source returned no rows at offset {}, stopping early",
                    self.table, offset
                );
                break;
            }

            if let Err(e) = self.writer.write_page(rows).await {
                return Err(TransferError::table_copy(&self.table, copied, e));
            }

            copied += n;
            offset += limit;
            self.progress.increment(n);
            debug!(
                "{}: page {}/{} committed ({} rows)",
                self.table,
                page + 1,
                pages,
                n
            );
        }

        info!(
            "{}: copied {} rows in {:.1}s",
            self.table,
            copied,
            started.elapsed().as_secs_f64()
        );
        Ok(copied)
    }
}

#[async_trait]
impl<R, W> Job for BatchCopyJob<R, W>
where
    R: PageReader + 'static,
    W: PageWriter + 'static,
{
    type Output = u64;

    fn label(&self) -> String {
        self.table.clone()
    }

    async fn run(self) -> Result<u64> {
        self.copy().await
    }
}
