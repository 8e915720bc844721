// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job queries.
//!
//! Status transitions are conditional updates (`WHERE status = ...`) so a
//! caller holding a stale view of a job can never move it backwards. Every
//! multi-statement operation runs in one transaction on the writer thread.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use outpost_core::types::{format_timestamp, parse_timestamp};
use outpost_core::{
    EnqueueReceipt, Job, JobStatus, NewJob, OutpostError, Priority, QueueStats, RetryOutcome,
    RetryPolicy,
};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};

const JOB_COLUMNS: &str = "id, message_id, chat_id, body, formatted_recipient, original_recipient,
     priority, status, attempts, max_attempts, next_retry, delay_ms, progress, result,
     failed_reason, last_error, created_at, updated_at, processed_at, completed_at,
     failed_at, stalled_at";

/// Claim order: priority first, then age, then insertion order.
const CLAIM_ORDER: &str = "priority DESC, created_at ASC, rowid ASC";

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_err(idx, e))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let priority_rank: i64 = row.get(6)?;
    let priority = Priority::from_rank(priority_rank).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(6, priority_rank)
    })?;
    let status_raw: String = row.get(7)?;
    let status = JobStatus::from_str(&status_raw).map_err(|e| conversion_err(7, e))?;
    let result: Option<String> = row.get(13)?;
    let result = result
        .map(|s| serde_json::from_str(&s).map_err(|e| conversion_err(13, e)))
        .transpose()?;
    let progress: i64 = row.get(12)?;
    let delay_ms: i64 = row.get(11)?;

    Ok(Job {
        id: row.get(0)?,
        message_id: row.get(1)?,
        chat_id: row.get(2)?,
        body: row.get(3)?,
        formatted_recipient: row.get(4)?,
        original_recipient: row.get(5)?,
        priority,
        status,
        attempts: row.get(8)?,
        max_attempts: row.get(9)?,
        next_retry: ts_col(row, 10)?,
        delay_ms: delay_ms.max(0) as u64,
        progress: progress.clamp(0, 100) as u8,
        result,
        failed_reason: row.get(14)?,
        last_error: row.get(15)?,
        created_at: ts_col(row, 16)?,
        updated_at: ts_col(row, 17)?,
        processed_at: opt_ts_col(row, 18)?,
        completed_at: opt_ts_col(row, 19)?,
        failed_at: opt_ts_col(row, 20)?,
        stalled_at: opt_ts_col(row, 21)?,
    })
}

fn select_job(conn: &rusqlite::Connection, job_id: &str) -> rusqlite::Result<Option<Job>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM message_jobs WHERE id = ?1"),
        params![job_id],
        row_to_job,
    )
    .optional()
}

enum Inserted {
    Receipt(EnqueueReceipt),
    Duplicate(String),
}

/// Inserts a new job. `delay_ms > 0` makes it `delayed` until due.
pub async fn insert_job(db: &Database, job: NewJob) -> Result<EnqueueReceipt, OutpostError> {
    job.validate()?;

    let outcome = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let message_id = job
                .message_id
                .clone()
                .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4()));

            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM message_jobs WHERE message_id = ?1)",
                params![message_id],
                |row| row.get(0),
            )?;
            if taken {
                return Ok(Inserted::Duplicate(message_id));
            }

            let now = Utc::now();
            let next_retry = now + chrono::Duration::milliseconds(job.delay_ms as i64);
            let status = if job.delay_ms > 0 {
                JobStatus::Delayed
            } else {
                JobStatus::Waiting
            };
            let id = format!("job_{}", uuid::Uuid::new_v4());
            let now_s = format_timestamp(now);

            tx.execute(
                "INSERT INTO message_jobs (id, message_id, chat_id, body, formatted_recipient,
                     original_recipient, priority, status, attempts, max_attempts, next_retry,
                     delay_ms, progress, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, 0, ?12, ?12)",
                params![
                    id,
                    message_id,
                    job.chat_id,
                    job.body,
                    job.formatted_recipient,
                    job.original_recipient,
                    job.priority.rank(),
                    status.to_string(),
                    job.max_attempts,
                    format_timestamp(next_retry),
                    job.delay_ms as i64,
                    now_s,
                ],
            )?;
            tx.commit()?;

            Ok(Inserted::Receipt(EnqueueReceipt {
                job_id: id,
                message_id,
                status,
                priority: job.priority,
            }))
        })
        .await
        .map_err(map_tr_err)?;

    match outcome {
        Inserted::Receipt(receipt) => Ok(receipt),
        Inserted::Duplicate(message_id) => Err(OutpostError::DuplicateMessage { message_id }),
    }
}

/// Promotes due `delayed` jobs, then atomically claims up to `limit` ready
/// jobs and marks them `active` with `processed_at = now`.
pub async fn claim_ready(db: &Database, limit: usize) -> Result<Vec<Job>, OutpostError> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let now = format_timestamp(Utc::now());

            tx.execute(
                "UPDATE message_jobs SET status = 'waiting', updated_at = ?1
                 WHERE status = 'delayed' AND next_retry <= ?1",
                params![now],
            )?;

            let ids: Vec<String> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT id FROM message_jobs
                     WHERE status = 'waiting' AND next_retry <= ?1
                     ORDER BY {CLAIM_ORDER}
                     LIMIT ?2"
                ))?;
                stmt.query_map(params![now, limit as i64], |row| row.get(0))?
                    .collect::<Result<_, _>>()?
            };

            let mut claimed = Vec::with_capacity(ids.len());
            for id in &ids {
                let changed = tx.execute(
                    "UPDATE message_jobs
                     SET status = 'active', processed_at = ?2, updated_at = ?2, progress = 0
                     WHERE id = ?1 AND status = 'waiting'",
                    params![id, now],
                )?;
                if changed == 1
                    && let Some(job) = select_job(&tx, id)?
                {
                    claimed.push(job);
                }
            }
            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn mark_active(db: &Database, job_id: &str) -> Result<bool, OutpostError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            let now = format_timestamp(Utc::now());
            let changed = conn.execute(
                "UPDATE message_jobs
                 SET status = 'active', processed_at = ?2, updated_at = ?2, progress = 0
                 WHERE id = ?1 AND status = 'waiting'",
                params![job_id, now],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Completes any non-terminal job.
pub async fn mark_completed(
    db: &Database,
    job_id: &str,
    result: serde_json::Value,
) -> Result<bool, OutpostError> {
    let job_id = job_id.to_string();
    let result = result.to_string();
    db.connection()
        .call(move |conn| {
            let now = format_timestamp(Utc::now());
            let changed = conn.execute(
                "UPDATE message_jobs
                 SET status = 'completed', result = ?2, progress = 100,
                     completed_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
                params![job_id, result, now],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Fails any non-terminal job without consuming an attempt.
pub async fn mark_failed(db: &Database, job_id: &str, reason: &str) -> Result<bool, OutpostError> {
    let job_id = job_id.to_string();
    let reason = reason.to_string();
    db.connection()
        .call(move |conn| {
            let now = format_timestamp(Utc::now());
            let changed = conn.execute(
                "UPDATE message_jobs
                 SET status = 'failed', failed_reason = ?2, last_error = ?2,
                     failed_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
                params![job_id, reason, now],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Applies a retryable failure to an `active` job.
///
/// With `stalled_before` set, the job must also have been claimed before that
/// instant, and `stalled_at` is recorded. Returns `None` when the guard does
/// not match.
pub async fn record_retryable_failure(
    db: &Database,
    job_id: &str,
    error: &str,
    policy: RetryPolicy,
    stalled_before: Option<DateTime<Utc>>,
) -> Result<Option<RetryOutcome>, OutpostError> {
    let job_id = job_id.to_string();
    let error = error.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let now_s = format_timestamp(now);

            let row: Option<(u32, u32, String)> = match stalled_before {
                Some(cutoff) => tx
                    .query_row(
                        "SELECT attempts, max_attempts, created_at FROM message_jobs
                         WHERE id = ?1 AND status = 'active' AND processed_at < ?2",
                        params![job_id, format_timestamp(cutoff)],
                        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                    )
                    .optional()?,
                None => tx
                    .query_row(
                        "SELECT attempts, max_attempts, created_at FROM message_jobs
                         WHERE id = ?1 AND status = 'active'",
                        params![job_id],
                        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                    )
                    .optional()?,
            };
            let Some((attempts, max_attempts, created_at)) = row else {
                return Ok(None);
            };

            let stalled_at = stalled_before.map(|_| now_s.clone());
            let attempts = (attempts + 1).min(max_attempts);
            let created_at = parse_timestamp(&created_at).map_err(|e| conversion_err(2, e))?;
            let past_ceiling = policy.retry_ceiling.is_some_and(|ceiling| {
                now.signed_duration_since(created_at).to_std().unwrap_or_default() >= ceiling
            });

            let outcome = if past_ceiling || attempts >= max_attempts {
                let reason = if past_ceiling {
                    format!("retry ceiling exceeded: {error}")
                } else {
                    error.clone()
                };
                tx.execute(
                    "UPDATE message_jobs
                     SET status = 'failed', attempts = ?2, failed_reason = ?3, last_error = ?4,
                         failed_at = ?5, updated_at = ?5, stalled_at = COALESCE(?6, stalled_at)
                     WHERE id = ?1",
                    params![job_id, attempts, reason, error, now_s, stalled_at],
                )?;
                RetryOutcome::Failed { attempts, reason }
            } else {
                let delay = policy.backoff.delay(attempts);
                let next_retry = now
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(1));
                tx.execute(
                    "UPDATE message_jobs
                     SET status = 'waiting', attempts = ?2, last_error = ?3, next_retry = ?4,
                         updated_at = ?5, stalled_at = COALESCE(?6, stalled_at)
                     WHERE id = ?1",
                    params![
                        job_id,
                        attempts,
                        error,
                        format_timestamp(next_retry),
                        now_s,
                        stalled_at
                    ],
                )?;
                RetryOutcome::Rescheduled {
                    attempts,
                    next_retry,
                }
            };
            tx.commit()?;
            Ok(Some(outcome))
        })
        .await
        .map_err(map_tr_err)
}

/// Sets progress, clamped to `[0, 100]`. Terminal jobs are left untouched.
pub async fn update_progress(db: &Database, job_id: &str, progress: i64) -> Result<(), OutpostError> {
    let job_id = job_id.to_string();
    let progress = progress.clamp(0, 100);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE message_jobs SET progress = ?2, updated_at = ?3
                 WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
                params![job_id, progress, format_timestamp(Utc::now())],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn stalled_jobs(db: &Database, cutoff: DateTime<Utc>) -> Result<Vec<Job>, OutpostError> {
    let cutoff = format_timestamp(cutoff);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM message_jobs
                 WHERE status = 'active' AND processed_at < ?1
                 ORDER BY processed_at ASC"
            ))?;
            let jobs = stmt
                .query_map(params![cutoff], row_to_job)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(jobs)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_job(db: &Database, job_id: &str) -> Result<Option<Job>, OutpostError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| Ok(select_job(conn, &job_id)?))
        .await
        .map_err(map_tr_err)
}

/// Jobs in `status`, claim-ordered, over the half-open range `[start, end)`.
pub async fn get_jobs(
    db: &Database,
    status: JobStatus,
    start: usize,
    end: usize,
) -> Result<Vec<Job>, OutpostError> {
    let limit = end.saturating_sub(start) as i64;
    let offset = start as i64;
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM message_jobs
                 WHERE status = ?1
                 ORDER BY {CLAIM_ORDER}
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let jobs = stmt
                .query_map(params![status, limit, offset], row_to_job)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(jobs)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn stats(db: &Database) -> Result<QueueStats, OutpostError> {
    let counts: Vec<(String, i64)> = db
        .connection()
        .call(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM message_jobs GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)?;

    let mut stats = QueueStats::default();
    for (status, count) in counts {
        let status = JobStatus::from_str(&status)
            .map_err(|_| OutpostError::Internal(format!("unknown job status `{status}`")))?;
        stats.record(status, count.max(0) as u64);
    }
    Ok(stats)
}

async fn execute_count(db: &Database, sql: &'static str) -> Result<u64, OutpostError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(sql, params![format_timestamp(Utc::now())])?;
            Ok(changed as u64)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn pause_all(db: &Database) -> Result<u64, OutpostError> {
    execute_count(
        db,
        "UPDATE message_jobs SET status = 'paused', updated_at = ?1
         WHERE status IN ('waiting', 'delayed')",
    )
    .await
}

/// `next_retry` is kept, so resumed jobs that were delayed stay ineligible until due.
pub async fn resume_all(db: &Database) -> Result<u64, OutpostError> {
    execute_count(
        db,
        "UPDATE message_jobs SET status = 'waiting', updated_at = ?1
         WHERE status = 'paused'",
    )
    .await
}

pub async fn clear_all(db: &Database) -> Result<u64, OutpostError> {
    db.connection()
        .call(|conn| {
            let changed = conn.execute("DELETE FROM message_jobs WHERE status != 'active'", [])?;
            Ok(changed as u64)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn clean_old_jobs(db: &Database, retention_hours: u64) -> Result<u64, OutpostError> {
    let hours = i64::try_from(retention_hours).unwrap_or(i64::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(chrono::Duration::hours(hours.min(24 * 365 * 100)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let cutoff = format_timestamp(cutoff);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM message_jobs
                 WHERE (status = 'completed' AND completed_at < ?1)
                    OR (status = 'failed' AND failed_at < ?1)",
                params![cutoff],
            )?;
            Ok(changed as u64)
        })
        .await
        .map_err(map_tr_err)
}

/// `failed`/`paused` → `waiting`, eligible now, with a fresh attempt budget.
pub async fn retry_job(db: &Database, job_id: &str) -> Result<bool, OutpostError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            let now = format_timestamp(Utc::now());
            let changed = conn.execute(
                "UPDATE message_jobs
                 SET status = 'waiting', next_retry = ?2, updated_at = ?2, attempts = 0,
                     progress = 0, last_error = NULL, failed_reason = NULL, failed_at = NULL
                 WHERE id = ?1 AND status IN ('failed', 'paused')",
                params![job_id, now],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn remove_job(db: &Database, job_id: &str) -> Result<bool, OutpostError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM message_jobs WHERE id = ?1 AND status != 'active'",
                params![job_id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}
