// SPDX-License-Identifier: GPL-3.0-or-later
//! Catalog store failure kinds. Only `DatabaseBusy` is meant to
//! be retried by callers; everything else is terminal for the transaction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("database busy")]
    DatabaseBusy,
    #[error("storage error: {0}")]
    StorageError(#[from] anyhow::Error),
    #[error("not found")]
    NotFound,
}

pub type CatalogResult<T> = Result<T, CatalogError>;

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                // SQLITE_BUSY = 5, SQLITE_LOCKED = 6.
                if code == "5" || code == "6" {
                    return CatalogError::DatabaseBusy;
                }
            }
            if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                return CatalogError::ConstraintViolation(db_err.message().to_string());
            }
        }
        if matches!(err, sqlx::Error::RowNotFound) {
            return CatalogError::NotFound;
        }
        CatalogError::StorageError(err.into())
    }
}

/// Retries a fallible database operation on `DatabaseBusy` with exponential
/// backoff: 3 attempts, 0.1s → 0.2s → 0.4s.
pub async fn retry_on_busy<T, F, Fut>(mut op: F) -> CatalogResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CatalogResult<T>>,
{
    let delays_ms = [100u64, 200, 400];
    let mut last_err = None;
    for delay_ms in delays_ms {
        match op().await {
            Ok(v) => return Ok(v),
            Err(CatalogError::DatabaseBusy) => {
                last_err = Some(CatalogError::DatabaseBusy);
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err.unwrap_or(CatalogError::DatabaseBusy))
}
