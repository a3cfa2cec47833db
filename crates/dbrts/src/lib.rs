//! # dbrts
//!
//! Same-engine database transfer.
//!
//! Copies schema and data between two databases of the same engine:
//!
//! - **PostgreSQL to PostgreSQL**: tables, columns, primary keys, indexes and
//!   foreign keys are recreated on the target, then rows are copied in
//!   batches by a bounded worker pool
//! - **MongoDB to MongoDB**: every collection is dropped on the target,
//!   its secondary indexes are replicated and documents are streamed in
//!   unordered batches
//!
//! Cross-engine pairs are refused before any connection is opened.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbrts::{Config, TransferOptions, TransferService};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> dbrts::Result<()> {
//!     let source = Config::load("source.yaml")?.database;
//!     let target = Config::load("target.yaml")?.database;
//!     let options = TransferOptions::default().with_workers(4);
//!
//!     let service = TransferService::new(source, target, options)?;
//!     let summary = service.execute(&CancellationToken::new()).await?;
//!     println!("Transferred {} rows", summary.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod schema;
pub mod transfer;

pub use config::{Config, DatabaseConfig, EngineType, Pagination, TransferOptions};
pub use error::{Result, TransferError};
pub use orchestrator::{health_check, TableFailure, TransferService, TransferSummary};
pub use progress::{LogProgress, NoProgress, ProgressCounter, ProgressSink, ProgressSnapshot};
