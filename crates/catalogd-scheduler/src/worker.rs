// SPDX-License-Identifier: GPL-3.0-or-later
//! The DB-backed reserve loop. Each worker repeatedly calls
//! `reserve`, dispatches to the matching task handler in
//! `catalogd_application::tasks`, and translates the handler's
//! [`HandlerOutcome`] back into `mark_done`/`mark_failed`.

use std::sync::Arc;
use std::time::Duration;

use catalogd_application::tasks::{self, HandlerOutcome, TaskContext};
use catalogd_config::WorkerConfig;
use catalogd_domain::JobType;
use catalogd_infrastructure::queue::{mark_done, mark_failed, reserve};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{debug, error, info};

pub struct Worker {
    name: String,
    pool: SqlitePool,
    ctx: Arc<TaskContext>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(name: impl Into<String>, pool: SqlitePool, ctx: Arc<TaskContext>, config: WorkerConfig) -> Self {
        Self {
            name: name.into(),
            pool,
            ctx,
            config,
        }
    }

    /// Runs until `stop` is set to `true`, finishing any in-flight job first.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(target: "worker", worker = %self.name, "worker started");
        let mut jobs_processed: u64 = 0;

        loop {
            if *stop.borrow() {
                break;
            }
            if let Some(max) = self.config.max_jobs {
                if jobs_processed >= max {
                    info!(target: "worker", worker = %self.name, jobs_processed, "reached max job count, stopping");
                    break;
                }
            }

            let job = match reserve(&self.pool, &self.name).await {
                Ok(job) => job,
                Err(e) => {
                    error!(target: "worker", worker = %self.name, error = %e, "reserve failed");
                    if wait_or_stop(&mut stop, Duration::from_millis(self.config.idle_error_sleep_ms)).await {
                        break;
                    }
                    continue;
                }
            };

            let Some(job) = job else {
                if wait_or_stop(&mut stop, Duration::from_millis(self.config.poll_interval_ms)).await {
                    break;
                }
                continue;
            };

            let job_id = job.id;
            let job_type = job.job_type;
            let payload = job.payload.clone();
            let ctx = self.ctx.clone();

            debug!(target: "worker", worker = %self.name, job_id, job_type = %job_type, "dispatched job");

            let handle = tokio::spawn(async move { dispatch(&ctx, job_type, &payload).await });

            match handle.await {
                Ok(outcome) => apply_outcome(&self.pool, job_id, outcome).await,
                Err(join_error) => {
                    error!(target: "worker", worker = %self.name, job_id, error = %join_error, "job handler panicked");
                    if let Err(e) = mark_failed(&self.pool, job_id, "job handler panicked", None).await {
                        error!(target: "worker", worker = %self.name, job_id, error = %e, "mark_failed after panic also failed");
                    }
                }
            }

            jobs_processed += 1;
        }

        info!(target: "worker", worker = %self.name, jobs_processed, "worker stopped");
    }
}

/// Sleeps for `duration` unless the stop flag flips first. Returns `true` if
/// the caller should stop.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *stop.borrow(),
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

#[derive(Deserialize, Default)]
struct SyncArtistArgs {
    artist_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct ImportAlbumArgs {
    browse_id: Option<String>,
    artist_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct DownloadTrackArgs {
    track_id: Option<String>,
    album_id: Option<String>,
    artist_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct DownloadLyricsArgs {
    track_id: Option<String>,
}

/// Looks up the handler for `job_type`, spreads `payload` as its named
/// arguments, and returns its outcome. Structurally incompatible payloads
/// (missing required fields) fail with no retry, matching an unknown job
/// type.
async fn dispatch(ctx: &TaskContext, job_type: JobType, payload: &serde_json::Value) -> HandlerOutcome {
    match job_type {
        JobType::SyncArtist => {
            let args: SyncArtistArgs = serde_json::from_value(payload.clone()).unwrap_or_default();
            match args.artist_id {
                Some(artist_id) => tasks::sync_artist(ctx, &artist_id).await,
                None => invalid_args(),
            }
        }
        JobType::ImportAlbum => {
            let args: ImportAlbumArgs = serde_json::from_value(payload.clone()).unwrap_or_default();
            match args.browse_id {
                Some(browse_id) => tasks::import_album(ctx, &browse_id, args.artist_id.as_deref()).await,
                None => invalid_args(),
            }
        }
        JobType::DownloadTrack => {
            let args: DownloadTrackArgs = serde_json::from_value(payload.clone()).unwrap_or_default();
            match args.track_id {
                Some(track_id) => {
                    tasks::download_track(ctx, &track_id, args.album_id.as_deref(), args.artist_id.as_deref())
                    .await
                }
                None => invalid_args(),
            }
        }
        JobType::DownloadLyrics => {
            let args: DownloadLyricsArgs = serde_json::from_value(payload.clone()).unwrap_or_default();
            match args.track_id {
                Some(track_id) => tasks::download_lyrics(ctx, &track_id).await,
                None => invalid_args(),
            }
        }
    }
}

fn invalid_args() -> HandlerOutcome {
    HandlerOutcome::fail("invalid task arguments", None)
}

async fn apply_outcome(pool: &SqlitePool, job_id: i64, outcome: HandlerOutcome) {
    let result = if outcome.ok {
        mark_done(pool, job_id, None).await
    } else {
        let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
        mark_failed(pool, job_id, &error, outcome.retry_delay_seconds).await
    };
    if let Err(e) = result {
        error!(target: "worker", job_id, error = %e, "failed to record job outcome");
    }
}
