// SPDX-License-Identifier: GPL-3.0-or-later
use catalogd_config::AppConfig;

pub mod download_clients;
pub mod embedded_tags;
pub mod tasks;

pub use download_clients::YtDlpExtractor;
pub use embedded_tags::LoftyTagEmbedder;
pub use tasks::{
    download_lyrics, download_track, import_album, sync_artist, HandlerOutcome, TaskContext,
};

use sqlx::SqlitePool;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pool: SqlitePool,
}

impl AppState {
    pub fn new(config: AppConfig, pool: SqlitePool) -> Self {
        Self { config, pool }
    }

    pub fn on_start(&self) {
        info!(target: "application", "application state initialized");
    }
}
