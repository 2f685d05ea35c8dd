// SPDX-License-Identifier: GPL-3.0-or-later
//! Durable job queue (C2): five transactional operations over the `jobs`
//! table. Retry policy is the task handler's call — the queue only applies
//! the `retry_delay_seconds` it is given.

use catalogd_domain::{Job, JobStatus, JobType, DEFAULT_MAX_ATTEMPTS};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::error::{retry_on_busy, CatalogError, CatalogResult};
use crate::repositories::Tx;

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> CatalogResult<Job> {
    let job_type: String = row.try_get("job_type")?;
    let status: String = row.try_get("status")?;
    let payload: String = row.try_get("payload")?;
    let result: Option<String> = row.try_get("result")?;
    Ok(Job {
            id: row.try_get("id")?,
            job_type: job_type
            .parse()
            .map_err(|e: String| CatalogError::StorageError(anyhow::anyhow!(e)))?,
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            status: status
            .parse()
            .map_err(|e: String| CatalogError::StorageError(anyhow::anyhow!(e)))?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            priority: row.try_get("priority")?,
            scheduled_at: parse_ts_opt(row.try_get("scheduled_at")?)?,
            started_at: parse_ts_opt(row.try_get("started_at")?)?,
            finished_at: parse_ts_opt(row.try_get("finished_at")?)?,
            reserved_by: row.try_get("reserved_by")?,
            last_error: row.try_get("last_error")?,
            result: result.and_then(|r| serde_json::from_str(&r).ok()),
            created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
            user_id: row.try_get("user_id")?,
    })
}

fn parse_ts(s: &str) -> CatalogResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow::anyhow!("bad timestamp {s}: {e}"))?
        .with_timezone(&Utc))
}

fn parse_ts_opt(s: Option<String>) -> CatalogResult<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}

/// Parameters for [`enqueue`] / [`enqueue_tx`]. `priority` defaults to 0,
/// `max_attempts` to [`DEFAULT_MAX_ATTEMPTS`].
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub priority: i32,
    pub max_attempts: i32,
    pub user_id: Option<String>,
}

impl EnqueueRequest {
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            job_type,
            payload,
            scheduled_at: None,
            priority: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            user_id: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Commits immediately after inserting — the common case. Retried on
/// `DatabaseBusy` per the catalog store's busy-retry policy.
pub async fn enqueue(pool: &SqlitePool, req: EnqueueRequest) -> CatalogResult<i64> {
    retry_on_busy(|| async {
        let mut tx = pool.begin().await?;
        let id = enqueue_tx(&mut tx, &req).await?;
        tx.commit().await?;
        Ok(id)
    })
    .await
}

/// Inserts the row within a transaction the caller already holds open,
/// without committing — the deferred-commit mode used when a handler
/// enqueues several jobs as part of one larger checkpoint (e.g. the bulk
/// "follow artist" flow enqueuing one `import_album` per release).
pub async fn enqueue_tx(tx: &mut Tx<'_>, req: &EnqueueRequest) -> CatalogResult<i64> {
    debug!(target: "queue", job_type = %req.job_type, priority = req.priority, "enqueuing job");
    let row = sqlx::query(
        r#"
        INSERT INTO jobs (
            job_type, payload, status, attempts, max_attempts, priority,
            scheduled_at, user_id, created_at
        ) VALUES (?, ?, 'queued', 0, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(req.job_type.as_str())
    .bind(req.payload.to_string())
    .bind(req.max_attempts)
    .bind(req.priority)
    .bind(req.scheduled_at.map(|t| t.to_rfc3339()))
    .bind(&req.user_id)
    .bind(Utc::now().to_rfc3339())
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.try_get("id")?)
}

/// Atomically selects and claims the single most-eligible queued job.
/// Two workers calling this concurrently claim different rows: the
/// `SELECT... LIMIT 1` and conditional `UPDATE... WHERE status='queued'`
/// run inside one transaction against SQLite's single writer, so the second
/// writer's `UPDATE` either sees a row already flipped to `reserved` (zero
/// rows affected, retried) or is serialized behind the first's commit.
pub async fn reserve(pool: &SqlitePool, worker_name: &str) -> CatalogResult<Option<Job>> {
    retry_on_busy(|| async {
        let mut tx = pool.begin().await?;

        let candidate = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE status = 'queued'
            AND attempts < max_attempts
            AND (scheduled_at IS NULL OR scheduled_at <= ?)
            ORDER BY priority DESC, created_at ASC
            LIMIT 1
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&mut *tx)
        .await?;

        let candidate_id: i64 = match candidate {
            Some(row) => row.try_get("id")?,
            None => {
                tx.rollback().await.ok();
                return Ok(None);
            }
        };

        let now = Utc::now().to_rfc3339();
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET status = 'reserved', attempts = attempts + 1,
            reserved_by = ?, started_at = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(worker_name)
        .bind(&now)
        .bind(candidate_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Lost the race to another reserver between SELECT and UPDATE.
            tx.rollback().await.ok();
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
        .bind(candidate_id)
        .fetch_one(&mut *tx)
        .await?;

        let job = match row_to_job(&row) {
            Ok(job) => job,
            Err(e) => {
                // The row is already flipped to `reserved` in this transaction;
                // failing it here (rather than propagating and rolling back)
                // is what keeps an unparseable row from jamming every future
                // reserve() against the same candidate.
                warn!(target: "queue", job_id = candidate_id, worker = worker_name, error = %e, "unknown job type, failing job terminally");
                sqlx::query(
                    r#"
                    UPDATE jobs SET status = 'failed', finished_at = ?, last_error = ?
                    WHERE id = ? AND status = 'reserved'
                    "#,
                )
                .bind(Utc::now().to_rfc3339())
                .bind("unknown job type")
                .bind(candidate_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                return Ok(None);
            }
        };

        tx.commit().await?;
        debug!(target: "queue", job_id = job.id, worker = worker_name, job_type = %job.job_type, "reserved job");
        Ok(Some(job))
    })
    .await
}

pub async fn get_job(pool: &SqlitePool, job_id: i64) -> CatalogResult<Option<Job>> {
    let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_job).transpose()
}

/// Requires the job currently be `reserved`; no-ops (but still `Ok`) if it
/// has moved on (e.g. cancelled out from under a running task, per S5).
pub async fn mark_done(
    pool: &SqlitePool,
    job_id: i64,
    result: Option<serde_json::Value>,
) -> CatalogResult<()> {
    let r = sqlx::query(
        r#"
        UPDATE jobs SET status = 'done', finished_at = ?, result = ?, last_error = NULL
        WHERE id = ? AND status = 'reserved'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(result.map(|v| v.to_string()))
    .bind(job_id)
    .execute(pool)
    .await?;
    if r.rows_affected() == 0 {
        warn!(target: "queue", job_id, "mark_done: job not reserved, ignored");
    }
    Ok(())
}

/// Requeues with `retry_delay_seconds` if attempts remain, else fails the
/// job terminally. A no-op if the job is no longer `reserved`.
pub async fn mark_failed(
    pool: &SqlitePool,
    job_id: i64,
    error_message: &str,
    retry_delay_seconds: Option<i64>,
) -> CatalogResult<()> {
    let job = match get_job(pool, job_id).await? {
        Some(j) => j,
        None => return Ok(()),
    };
    if job.status != JobStatus::Reserved {
        warn!(target: "queue", job_id, "mark_failed: job not reserved, ignored");
        return Ok(());
    }

    if let Some(delay) = retry_delay_seconds {
        if job.attempts < job.max_attempts {
            let scheduled_at = Utc::now() + chrono::Duration::seconds(delay);
            sqlx::query(
                r#"
                UPDATE jobs SET status = 'queued', scheduled_at = ?, reserved_by = NULL,
                last_error = ?
                WHERE id = ? AND status = 'reserved'
                "#,
            )
            .bind(scheduled_at.to_rfc3339())
            .bind(error_message)
            .bind(job_id)
            .execute(pool)
            .await?;
            return Ok(());
        }
    }

    sqlx::query(
        r#"
        UPDATE jobs SET status = 'failed', finished_at = ?, last_error = ?
        WHERE id = ? AND status = 'reserved'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(error_message)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fails if the job is already terminal; otherwise marks it cancelled.
pub async fn cancel(pool: &SqlitePool, job_id: i64, reason: Option<&str>) -> CatalogResult<bool> {
    let job = match get_job(pool, job_id).await? {
        Some(j) => j,
        None => return Ok(false),
    };
    if matches!(
        job.status,
        JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled
    ) {
        return Ok(false);
    }
    let marker = reason.unwrap_or("cancelled").to_string();
    let r = sqlx::query(
        r#"
        UPDATE jobs SET status = 'cancelled', finished_at = ?, last_error = ?
        WHERE id = ? AND status NOT IN ('done', 'failed', 'cancelled')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(marker)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(r.rows_affected() > 0)
}

/// Deletes finished rows older than `days_old`; if `keep_failed`, only
/// `done` rows are eligible.
pub async fn cleanup_old(pool: &SqlitePool, days_old: i64, keep_failed: bool) -> CatalogResult<u64> {
    let cutoff = format!("-{days_old} days");
    let query = if keep_failed {
        sqlx::query("DELETE FROM jobs WHERE finished_at IS NOT NULL AND datetime(finished_at) < datetime('now', ?) AND status = 'done'")
        .bind(cutoff)
    } else {
        sqlx::query("DELETE FROM jobs WHERE finished_at IS NOT NULL AND datetime(finished_at) < datetime('now', ?)")
        .bind(cutoff)
    };
    let r = query.execute(pool).await?;
    Ok(r.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalogd_config::AppConfig;

    async fn memory_pool() -> SqlitePool {
        let mut cfg = AppConfig::default();
        cfg.database.url = "sqlite://:memory:".into();
        cfg.database.pool_max_size = 1;
        crate::init_database(&cfg).await.unwrap()
    }

    /// A single `:memory:` connection can't be shared across concurrent
    /// reservers (each connection would get its own database), so
    /// concurrency tests need a real file-backed pool with more than one
    /// connection.
    async fn file_pool() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.database.url = format!("sqlite://{}", dir.path().join("queue-test.db").display());
        cfg.database.pool_max_size = 8;
        let pool = crate::init_database(&cfg).await.unwrap();
        (pool, dir)
    }

    #[tokio::test]
    async fn reserve_claims_highest_priority_first() {
        let pool = memory_pool().await;
        enqueue(&pool, EnqueueRequest::new(JobType::SyncArtist, serde_json::json!({})).with_priority(1))
        .await
        .unwrap();
        let high_id = enqueue(
            &pool,
            EnqueueRequest::new(JobType::ImportAlbum, serde_json::json!({})).with_priority(5),
        )
        .await
        .unwrap();

        let job = reserve(&pool, "worker-1").await.unwrap().unwrap();
        assert_eq!(job.id, high_id);
        assert_eq!(job.status, JobStatus::Reserved);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.reserved_by.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn reserve_returns_none_when_queue_empty() {
        let pool = memory_pool().await;
        assert!(reserve(&pool, "worker-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reserve_skips_future_scheduled_jobs() {
        let pool = memory_pool().await;
        enqueue(
            &pool,
            EnqueueRequest::new(JobType::SyncArtist, serde_json::json!({}))
            .with_scheduled_at(Utc::now() + chrono::Duration::hours(1)),
        )
        .await
        .unwrap();
        assert!(reserve(&pool, "worker-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_done_requires_reserved_status() {
        let pool = memory_pool().await;
        let id = enqueue(&pool, EnqueueRequest::new(JobType::SyncArtist, serde_json::json!({})))
        .await
        .unwrap();
        // Still queued, not reserved: mark_done should be a no-op.
        mark_done(&pool, id, None).await.unwrap();
        let job = get_job(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn mark_failed_requeues_with_retry_delay() {
        let pool = memory_pool().await;
        let id = enqueue(&pool, EnqueueRequest::new(JobType::DownloadTrack, serde_json::json!({})))
        .await
        .unwrap();
        reserve(&pool, "worker-1").await.unwrap();
        mark_failed(&pool, id, "rate limited", Some(300)).await.unwrap();
        let job = get_job(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
        assert!(job.reserved_by.is_none());
        assert!(job.scheduled_at.is_some());
    }

    #[tokio::test]
    async fn mark_failed_without_retry_delay_is_terminal() {
        let pool = memory_pool().await;
        let id = enqueue(&pool, EnqueueRequest::new(JobType::DownloadTrack, serde_json::json!({})))
        .await
        .unwrap();
        reserve(&pool, "worker-1").await.unwrap();
        mark_failed(&pool, id, "unknown job type", None).await.unwrap();
        let job = get_job(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn mark_failed_exhausted_attempts_goes_terminal_even_with_delay() {
        let pool = memory_pool().await;
        let id = enqueue(
            &pool,
            EnqueueRequest {
                max_attempts: 1,
                ..EnqueueRequest::new(JobType::DownloadTrack, serde_json::json!({}))
            },
        )
        .await
        .unwrap();
        reserve(&pool, "worker-1").await.unwrap();
        mark_failed(&pool, id, "still broken", Some(60)).await.unwrap();
        let job = get_job(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_reserved_job_then_mark_done_is_noop() {
        let pool = memory_pool().await;
        let id = enqueue(&pool, EnqueueRequest::new(JobType::DownloadTrack, serde_json::json!({})))
        .await
        .unwrap();
        reserve(&pool, "worker-1").await.unwrap();
        assert!(cancel(&pool, id, Some("user requested")).await.unwrap());

        mark_done(&pool, id, None).await.unwrap();
        let job = get_job(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_terminal_job_fails() {
        let pool = memory_pool().await;
        let id = enqueue(&pool, EnqueueRequest::new(JobType::DownloadTrack, serde_json::json!({})))
        .await
        .unwrap();
        reserve(&pool, "worker-1").await.unwrap();
        mark_done(&pool, id, None).await.unwrap();
        assert!(!cancel(&pool, id, None).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_old_respects_keep_failed() {
        let pool = memory_pool().await;
        let done_id = enqueue(&pool, EnqueueRequest::new(JobType::SyncArtist, serde_json::json!({})))
        .await
        .unwrap();
        let failed_id = enqueue(&pool, EnqueueRequest::new(JobType::SyncArtist, serde_json::json!({})))
        .await
        .unwrap();
        reserve(&pool, "w").await.unwrap();
        reserve(&pool, "w").await.unwrap();
        mark_done(&pool, done_id, None).await.unwrap();
        mark_failed(&pool, failed_id, "boom", None).await.unwrap();

        let old_ts = (Utc::now() - chrono::Duration::days(10)).to_rfc3339();
        sqlx::query("UPDATE jobs SET finished_at = ? WHERE id IN (?, ?)")
        .bind(&old_ts)
        .bind(done_id)
        .bind(failed_id)
        .execute(&pool)
        .await
        .unwrap();

        let removed = cleanup_old(&pool, 3, true).await.unwrap();
        assert_eq!(removed, 1);
        assert!(get_job(&pool, done_id).await.unwrap().is_none());
        assert!(get_job(&pool, failed_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deferred_commit_enqueue_rolled_back_is_invisible() {
        let pool = memory_pool().await;
        let mut tx = pool.begin().await.unwrap();
        let id = enqueue_tx(
            &mut tx,
            &EnqueueRequest::new(JobType::ImportAlbum, serde_json::json!({})),
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();
        assert!(get_job(&pool, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deferred_commit_enqueue_visible_after_commit() {
        let pool = memory_pool().await;
        let mut tx = pool.begin().await.unwrap();
        let id = enqueue_tx(
            &mut tx,
            &EnqueueRequest::new(JobType::ImportAlbum, serde_json::json!({})),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert!(get_job(&pool, id).await.unwrap().is_some());
    }

    /// P1: two concurrent workers can never both reserve the same job.
    /// Spawns several real reservers racing over one seeded row on a
    /// multi-connection pool; exactly one must win.
    #[tokio::test]
    async fn concurrent_reservers_claim_the_job_exactly_once() {
        let (pool, _dir) = file_pool().await;
        let id = enqueue(&pool, EnqueueRequest::new(JobType::SyncArtist, serde_json::json!({})))
        .await
        .unwrap();

        let reservers = 8;
        let mut handles = Vec::with_capacity(reservers);
        for i in 0..reservers {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                reserve(&pool, &format!("worker-{i}")).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().map(|job| job.id == id).unwrap_or(false) {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        let job = get_job(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Reserved);
        assert_eq!(job.attempts, 1);
    }
}
