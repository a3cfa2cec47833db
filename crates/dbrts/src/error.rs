//! Error types for the transfer library.

use thiserror::Error;

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Configuration error (invalid YAML, missing fields, bad option values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source and target declare different engines.
    #[error("cross-engine transfers are not supported between {source_type} and {target_type}")]
    CrossEngine {
        source_type: String,
        target_type: String,
    },

    /// The declared engine has no orchestrator.
    #[error("unsupported database type: {0}")]
    UnsupportedEngine(String),

    /// Opening or pinging an endpoint failed.
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {}", postgres_message(.0))]
    Postgres(#[from] tokio_postgres::Error),

    /// MongoDB driver error
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// Schema extraction failed for a table (or for the table listing).
    #[error("Schema extraction failed for {table}: {source}")]
    SchemaExtraction {
        table: String,
        #[source]
        source: Box<TransferError>,
    },

    /// A fatal schema creation pass failed; the whole transaction was discarded.
    #[error("Schema creation failed in {pass} pass for {object}: {source}")]
    SchemaCreation {
        pass: String,
        object: String,
        #[source]
        source: Box<TransferError>,
    },

    /// A table's batch copy job stopped. Pages committed before the failure remain.
    #[error("Copy failed for table {table} after {rows_copied} rows: {source}")]
    TableCopy {
        table: String,
        rows_copied: u64,
        #[source]
        source: Box<TransferError>,
    },

    /// Cloning a document collection failed.
    #[error("Failed to {stage} for collection {collection}: {source}")]
    Collection {
        collection: String,
        stage: String,
        #[source]
        source: Box<TransferError>,
    },

    /// A document store operation outside any single collection failed.
    #[error("Failed to {operation} on {endpoint}: {source}")]
    Store {
        endpoint: String,
        operation: String,
        #[source]
        source: Box<TransferError>,
    },

    /// A row value could not be decoded or bound.
    #[error("Value conversion error: {0}")]
    Value(String),

    /// A queued job was lost before reporting a result.
    #[error("Worker pool error: {0}")]
    Worker(String),

    /// The transfer was cancelled before the job could be submitted.
    #[error("Transfer cancelled")]
    Cancelled,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransferError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        TransferError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Connection error for a named endpoint ("source" or "target").
    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        TransferError::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a SchemaExtraction error
    pub fn extraction(table: impl Into<String>, source: impl Into<TransferError>) -> Self {
        TransferError::SchemaExtraction {
            table: table.into(),
            source: Box::new(source.into()),
        }
    }

    /// Create a SchemaCreation error
    pub fn creation(
        pass: impl Into<String>,
        object: impl Into<String>,
        source: impl Into<TransferError>,
    ) -> Self {
        TransferError::SchemaCreation {
            pass: pass.into(),
            object: object.into(),
            source: Box::new(source.into()),
        }
    }

    /// Wrap a store-level failure with the endpoint and operation.
    pub fn store(
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        source: TransferError,
    ) -> Self {
        TransferError::Store {
            endpoint: endpoint.into(),
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error as a table copy failure.
    pub fn table_copy(table: impl Into<String>, rows_copied: u64, source: TransferError) -> Self {
        TransferError::TableCopy {
            table: table.into(),
            rows_copied,
            source: Box::new(source),
        }
    }

    /// Wrap an error as a collection clone failure.
    pub fn collection(
        collection: impl Into<String>,
        stage: impl Into<String>,
        source: TransferError,
    ) -> Self {
        TransferError::Collection {
            collection: collection.into(),
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Rows committed before a table copy failure, if this is one.
    pub fn rows_copied(&self) -> Option<u64> {
        match self {
            TransferError::TableCopy { rows_copied, .. } => Some(*rows_copied),
            _ => None,
        }
    }

    /// Process exit code for the command-line binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            TransferError::Config(_)
            | TransferError::CrossEngine { .. }
            | TransferError::UnsupportedEngine(_)
            | TransferError::Yaml(_) => 2,
            TransferError::Connection { .. } | TransferError::Pool { .. } => 3,
            TransferError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Server message for database errors; the driver's own text ("db error")
/// says nothing about the cause.
fn postgres_message(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => {
            let mut message = format!("{}: {}", db.severity(), db.message());
            if let Some(detail) = db.detail() {
                message.push_str(&format!(" ({})", detail));
            }
            message
        }
        None => err.to_string(),
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
