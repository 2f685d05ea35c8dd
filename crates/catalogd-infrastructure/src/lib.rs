// SPDX-License-Identifier: GPL-3.0-or-later
pub mod error;
pub mod queue;
pub mod repositories;
pub mod sqlite_adapters;

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use catalogd_config::AppConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

pub use error::{CatalogError, CatalogResult};

/// Connects to the configured SQLite database and runs pending migrations.
/// Returns the pool so callers (repositories, queue, CLI) share one writer.
pub async fn init_database(config: &AppConfig) -> Result<sqlx::SqlitePool> {
    info!(target: "infrastructure", "initializing database");

    let db_url = normalize_sqlite_url(&config.database.url)?;
    info!(target: "infrastructure", db_url = %db_url, "connecting to database");

    let connect_options = SqliteConnectOptions::from_str(&db_url)?
    .create_if_missing(true)
    .busy_timeout(std::time::Duration::from_millis(
            config.database.busy_timeout_ms,
    ));

    let pool = SqlitePoolOptions::new()
    .max_connections(config.database.pool_max_size)
    .connect_with(connect_options)
    .await?;

    // SQLite enforces a single writer regardless of pool size; WAL lets
    // readers proceed concurrently with that one writer.
    sqlx::query("PRAGMA journal_mode = WAL")
    .execute(&pool)
    .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
    .execute(&pool)
    .await?;

    info!(target: "infrastructure", "running migrations");
    sqlx::migrate!("../../migrations").run(&pool).await?;

    info!(target: "infrastructure", "database initialized successfully");
    Ok(pool)
}

fn normalize_sqlite_url(url: &str) -> Result<String> {
    if !url.starts_with("sqlite://") || url.starts_with("sqlite://:memory:") {
        return Ok(url.to_string());
    }
    let db_path = url.trim_start_matches("sqlite://");
    let path = Path::new(db_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let path_str = absolute_path.to_string_lossy().replace('\\', "/");
    Ok(format!("sqlite://{}?mode=rwc", path_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_leaves_memory_url_untouched() {
        assert_eq!(
            normalize_sqlite_url("sqlite://:memory:").unwrap(),
            "sqlite://:memory:"
        );
    }

    #[test]
    fn normalize_adds_rwc_mode() {
        let normalized = normalize_sqlite_url("sqlite://data/catalogd.db").unwrap();
        assert!(normalized.starts_with("sqlite://"));
        assert!(normalized.ends_with("?mode=rwc"));
    }
}
