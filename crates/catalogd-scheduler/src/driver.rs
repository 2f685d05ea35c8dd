// SPDX-License-Identifier: GPL-3.0-or-later
//! The periodic driver: one cooperative task carrying the three
//! independent cadences (artist sync, job cleanup, token cleanup) plus a
//! settings-refresh cadence of its own. Checks its clock once a minute and
//! fires each cadence when `now - last_fired >= interval`.

use std::time::Duration;

use catalogd_domain::JobType;
use catalogd_infrastructure::queue::{cleanup_old, enqueue, EnqueueRequest};
use catalogd_infrastructure::sqlite_adapters::{artists_needing_sync, get_setting_int};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The three cadences plus settings refresh, read from `Setting` rows and
/// overridable at runtime without a restart.
#[derive(Debug, Clone)]
struct Cadences {
    sync_interval_hours: i64,
    job_cleanup_days: i64,
    token_cleanup_days: i64,
}

pub struct Scheduler {
    pool: SqlitePool,
    tick: Duration,
    settings_refresh: Duration,
    defaults: Cadences,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, config: &catalogd_config::SchedulerConfig) -> Self {
        Self {
            pool,
            tick: Duration::from_secs(config.tick_seconds),
            settings_refresh: Duration::from_secs(config.settings_refresh_seconds),
            defaults: Cadences {
                sync_interval_hours: config.sync_interval_hours,
                job_cleanup_days: config.job_cleanup_days,
                token_cleanup_days: config.token_cleanup_days,
            },
        }
    }

    /// Runs until `stop` flips to `true`. Blocks first until the database
    /// responds to a trivial query, so a slow-starting container doesn't
    /// spin the cadence checks against a not-yet-ready pool.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        self.wait_for_database().await;

        let mut cadences = self.defaults.clone();
        let mut last_sync = Utc::now();
        let mut last_job_cleanup = Utc::now();
        let mut last_token_cleanup = Utc::now();
        let mut last_settings_refresh = Utc::now();

        info!(target: "scheduler", "scheduler started");

        loop {
            if *stop.borrow() {
                break;
            }

            let now = Utc::now();

            if (now - last_settings_refresh).num_seconds() >= self.settings_refresh.as_secs() as i64 {
                cadences = self.refresh_cadences().await.unwrap_or(cadences);
                last_settings_refresh = now;
            }

            if hours_since(last_sync, now) >= cadences.sync_interval_hours {
                self.run_artist_sync(cadences.sync_interval_hours).await;
                last_sync = now;
            }

            if hours_since(last_job_cleanup, now) >= cadences.job_cleanup_days * 24 {
                self.run_job_cleanup(cadences.job_cleanup_days).await;
                last_job_cleanup = now;
            }

            if hours_since(last_token_cleanup, now) >= cadences.token_cleanup_days * 24 {
                self.run_token_cleanup().await;
                last_token_cleanup = now;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!(target: "scheduler", "scheduler stopped");
    }

    async fn wait_for_database(&self) {
        loop {
            if sqlx::query("SELECT 1").fetch_optional(&self.pool).await.is_ok() {
                return;
            }
            warn!(target: "scheduler", "database not yet reachable, retrying");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn refresh_cadences(&self) -> Option<Cadences> {
        let sync_interval_hours =
        get_setting_int(&self.pool, "scheduler.sync_interval_hours", self.defaults.sync_interval_hours)
        .await
        .ok()?;
        let job_cleanup_days =
        get_setting_int(&self.pool, "scheduler.job_cleanup_days", self.defaults.job_cleanup_days)
        .await
        .ok()?;
        let token_cleanup_days =
        get_setting_int(&self.pool, "scheduler.token_cleanup_days", self.defaults.token_cleanup_days)
        .await
        .ok()?;
        debug!(
            target: "scheduler",
            sync_interval_hours, job_cleanup_days, token_cleanup_days,
            "refreshed cadence settings"
        );
        Some(Cadences {
                sync_interval_hours,
                job_cleanup_days,
                token_cleanup_days,
        })
    }

    async fn run_artist_sync(&self, interval_hours: i64) {
        let due = match artists_needing_sync(&self.pool, interval_hours).await {
            Ok(artists) => artists,
            Err(e) => {
                warn!(target: "scheduler", error = %e, "artists_needing_sync failed");
                return;
            }
        };
        info!(target: "scheduler", count = due.len(), "enqueuing due artist syncs");
        for artist in due {
            let payload = serde_json::json!({ "artist_id": artist.artist_id });
            let req = EnqueueRequest::new(JobType::SyncArtist, payload).with_priority(5);
            if let Err(e) = enqueue(&self.pool, req).await {
                warn!(target: "scheduler", artist_id = %artist.artist_id, error = %e, "failed to enqueue sync_artist");
            }
        }
    }

    async fn run_job_cleanup(&self, days_old: i64) {
        match cleanup_old(&self.pool, days_old, true).await {
            Ok(deleted) => info!(target: "scheduler", deleted, "job cleanup ran"),
            Err(e) => warn!(target: "scheduler", error = %e, "job cleanup failed"),
        }
    }

    /// Session-token expiry lives in the HTTP layer's own store, which is an
    /// out-of-scope external collaborator here; this cadence fires on
    /// schedule but has nothing local to delete.
    async fn run_token_cleanup(&self) {
        debug!(target: "scheduler", "token cleanup cadence fired (no local session store)");
    }
}

fn hours_since(last: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - last).num_hours()
}
