//! PostgreSQL driver: pooled connections, row values and paged copy.

mod pages;
mod value;

pub use pages::{
    insert_sql, select_keyset_sql, select_page_sql, KeysetCursor, PgPageReader, PgPageWriter,
};
pub use value::{decode_row, ColumnKind, SqlValue};

use crate::config::DatabaseConfig;
use crate::drivers::common::SslMode;
use crate::error::{Result, TransferError};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tokio_postgres::Config as PgConfig;
use tracing::{info, warn};

/// Open a pool for one endpoint and ping it with `SELECT 1`.
///
/// `endpoint` names the side ("source" or "target") in errors and logs.
pub async fn connect(config: &DatabaseConfig, max_size: usize, endpoint: &str) -> Result<Pool> {
    let ssl_mode = SslMode::parse(&config.ssl_mode)?;

    let mut pg_config = PgConfig::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .dbname(&config.database)
        .user(&config.username)
        .password(&config.password)
        .application_name("dbrts")
        .connect_timeout(Duration::from_secs(15))
        .ssl_mode(ssl_mode.driver_mode());

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = match ssl_mode.connector()? {
        Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
        None => {
            warn!(
                "{}: PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.",
                endpoint
            );
            Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
        }
    };

    let pool = Pool::builder(mgr)
        .max_size(max_size.max(1))
        .build()
        .map_err(|e| TransferError::pool(e, format!("creating {} pool", endpoint)))?;

    ping(&pool)
        .await
        .map_err(|e| TransferError::connection(endpoint, e))?;

    info!("Connected to {} PostgreSQL: {}", endpoint, config.describe());
    Ok(pool)
}

/// Check out a connection and run a trivial query.
pub async fn ping(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .map_err(|e| TransferError::pool(e, "checking out connection for ping"))?;
    client.simple_query("SELECT 1").await?;
    Ok(())
}
