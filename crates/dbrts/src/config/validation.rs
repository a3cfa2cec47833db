//! Configuration validation.

use super::{DatabaseConfig, EngineType, TransferOptions};
use crate::error::{Result, TransferError};

/// Validate one endpoint configuration.
pub fn validate_database(db: &DatabaseConfig) -> Result<()> {
    match db.r#type {
        EngineType::Postgres => {
            if db.host.is_empty() {
                return Err(TransferError::Config("database.host is required".into()));
            }
            if db.database.is_empty() {
                return Err(TransferError::Config(
                    "database.database is required".into(),
                ));
            }
            if db.username.is_empty() {
                return Err(TransferError::Config(
                    "database.username is required".into(),
                ));
            }
        }
        EngineType::Mongo => {
            let has_uri = db.uri.as_deref().is_some_and(|u| !u.trim().is_empty());
            if !has_uri && db.host.is_empty() {
                return Err(TransferError::Config(
                    "database.host or database.uri is required".into(),
                ));
            }
            if db.database.is_empty() {
                return Err(TransferError::Config(
                    "database.database is required for MongoDB transfers".into(),
                ));
            }
        }
        // Unsupported engines are reported by the transfer service, after the
        // cross-engine check.
        EngineType::Other(_) => {}
    }

    Ok(())
}

/// Validate transfer options.
pub fn validate_options(opts: &TransferOptions) -> Result<()> {
    if let Some(0) = opts.workers {
        return Err(TransferError::Config("workers must be at least 1".into()));
    }
    if opts.batch_size == 0 {
        return Err(TransferError::Config(
            "batch_size must be at least 1".into(),
        ));
    }
    Ok(())
}
