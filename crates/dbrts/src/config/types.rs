//! Configuration type definitions with auto-tuning based on system resources.

use crate::progress::{NoProgress, ProgressSink};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use sysinfo::System;
use tracing::info;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len();

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Database engine declared by an endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EngineType {
    #[default]
    Postgres,
    Mongo,
    /// Any other declared engine, kept verbatim so it can be reported.
    Other(String),
}

impl EngineType {
    /// Normalize a declared type name. An empty name means PostgreSQL.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "" | "postgres" | "postgresql" => EngineType::Postgres,
            "mongo" | "mongodb" => EngineType::Mongo,
            other => EngineType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EngineType::Postgres => "postgres",
            EngineType::Mongo => "mongo",
            EngineType::Other(name) => name,
        }
    }

    /// Default port for the engine, if it has one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            EngineType::Postgres => Some(5432),
            EngineType::Mongo => Some(27017),
            EngineType::Other(_) => None,
        }
    }
}

impl From<String> for EngineType {
    fn from(value: String) -> Self {
        EngineType::parse(&value)
    }
}

impl From<EngineType> for String {
    fn from(value: EngineType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root of an endpoint configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings for one database endpoint.
    pub database: DatabaseConfig,
}

/// Connection settings for one endpoint (source or target).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Engine type: "postgres" or "mongo" (aliases "postgresql", "mongodb").
    #[serde(default)]
    pub r#type: EngineType,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Port (0 means the engine default).
    #[serde(default)]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default, alias = "user")]
    pub username: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// PostgreSQL SSL mode (default: "disable").
    #[serde(default, rename = "sslmode", alias = "ssl_mode")]
    pub ssl_mode: String,

    /// Full MongoDB connection URI. Overrides host/port/credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// MongoDB authentication database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_database: Option<String>,

    /// Relational schema filter for extraction. All user schemas when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl DatabaseConfig {
    /// Fill in engine-specific defaults.
    pub fn normalize(&mut self) {
        if self.port == 0 {
            if let Some(port) = self.r#type.default_port() {
                self.port = port;
            }
        }
        if self.r#type == EngineType::Postgres && self.ssl_mode.trim().is_empty() {
            self.ssl_mode = "disable".to_string();
        }
        if self.r#type == EngineType::Mongo && self.host.trim().is_empty() {
            self.host = "localhost".to_string();
        }
    }

    /// Human-readable endpoint description without credentials.
    pub fn describe(&self) -> String {
        format!(
            "{} {}:{}/{}",
            self.r#type, self.host, self.port, self.database
        )
    }
}

/// Row pagination strategy for relational batch copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pagination {
    /// `ORDER BY ... OFFSET o LIMIT b`. Assumes a static source.
    #[default]
    Offset,

    /// Seek past the last primary key seen. Tables without a primary key fall back to offset.
    Keyset,
}

impl FromStr for Pagination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "offset" => Ok(Pagination::Offset),
            "keyset" => Ok(Pagination::Keyset),
            other => Err(format!(
                "invalid pagination '{}': expected 'offset' or 'keyset'",
                other
            )),
        }
    }
}

/// Which phases a transfer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub schema: bool,
    pub data: bool,
}

/// Options shared by both orchestrators.
#[derive(Clone)]
pub struct TransferOptions {
    /// Only recreate structure.
    pub schema_only: bool,

    /// Only copy rows/documents.
    pub data_only: bool,

    /// Concurrent table jobs. Auto-tuned based on CPU cores if not set.
    pub workers: Option<usize>,

    /// Rows or documents per page.
    pub batch_size: usize,

    /// Relational pagination strategy.
    pub pagination: Pagination,

    /// Progress collaborator.
    pub progress: Arc<dyn ProgressSink>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            schema_only: false,
            data_only: false,
            workers: None,
            batch_size: DEFAULT_BATCH_SIZE,
            pagination: Pagination::Offset,
            progress: Arc::new(NoProgress),
        }
    }
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("schema_only", &self.schema_only)
            .field("data_only", &self.data_only)
            .field("workers", &self.workers)
            .field("batch_size", &self.batch_size)
            .field("pagination", &self.pagination)
            .finish_non_exhaustive()
    }
}

/// Default rows or documents per batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

impl TransferOptions {
    pub fn with_schema_only(mut self, schema_only: bool) -> Self {
        self.schema_only = schema_only;
        self
    }

    pub fn with_data_only(mut self, data_only: bool) -> Self {
        self.data_only = data_only;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Fill in the worker count from detected CPU cores when not set.
    pub fn with_auto_tuning(mut self) -> Self {
        if self.workers.is_none() {
            let resources = SystemResources::detect();
            resources.log();
            // cores - 2, but at least 2 and at most 16
            let workers = resources.cpu_cores.saturating_sub(2).clamp(2, 16);
            info!("Auto-tuned workers={}", workers);
            self.workers = Some(workers);
        }
        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(4)
    }

    /// Phases for the relational path. Both flags set means a full transfer.
    pub fn phases(&self) -> Phases {
        if self.schema_only && self.data_only {
            return Phases {
                schema: true,
                data: true,
            };
        }
        Phases {
            schema: !self.data_only,
            data: !self.schema_only,
        }
    }
}
