//! Job rows and lifecycle persistence
//!
//! Jobs are keyed by time-ordered ids, so `ORDER BY id DESC` is reverse
//! chronological and cursor pagination is a plain `id < cursor` filter.

use crate::profile::parse_ts;
use crate::Store;
use chrono::{DateTime, Utc};
use objectdeck_common::{Error, ErrorCode, JobId, JobStatus, JobType, ProfileId, Progress, Result};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error message applied to jobs found `running` at startup.
pub const RESTART_FAILURE_MESSAGE: &str = "job interrupted by server restart";

/// A durable job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub profile_id: ProfileId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Input for a durable enqueue.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub profile_id: ProfileId,
    pub job_type: JobType,
    pub payload: Value,
}

/// List filters. All optional; combined with AND.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub error_code: Option<ErrorCode>,
    pub profile_id: Option<ProfileId>,
}

/// One page of jobs plus the cursor for the next.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPage {
    pub jobs: Vec<JobRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

const JOB_COLUMNS: &str = "id, profile_id, job_type, status, payload_json, progress_json, \
     error, error_code, created_at, started_at, finished_at";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Option<JobRecord>> {
    let id: String = row.get(0)?;
    let profile_id: String = row.get(1)?;
    let job_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let payload_raw: String = row.get(4)?;
    let progress_raw: Option<String> = row.get(5)?;
    let error_code: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    let started_at: Option<String> = row.get(9)?;
    let finished_at: Option<String> = row.get(10)?;

    let Ok(payload) = serde_json::from_str(&payload_raw) else {
        return Ok(None);
    };
    let (Ok(id), Ok(profile_id)) = (id.parse(), profile_id.parse()) else {
        return Ok(None);
    };
    let (Some(job_type), Some(status)) = (JobType::parse(&job_type), JobStatus::parse(&status))
    else {
        return Ok(None);
    };

    Ok(Some(JobRecord {
        id,
        profile_id,
        job_type,
        status,
        payload,
        progress: progress_raw.and_then(|p| serde_json::from_str(&p).ok()),
        error: row.get(6)?,
        error_code: error_code.map(|c| ErrorCode::parse(&c)),
        created_at: parse_ts(&created_at),
        started_at: started_at.map(|t| parse_ts(&t)),
        finished_at: finished_at.map(|t| parse_ts(&t)),
    }))
}

impl Store {
    /// Insert a job in `queued` status. The row is the durable queue entry;
    /// the in-memory scheduler queue is rebuilt from it after a crash.
    pub fn enqueue_job(&self, new: NewJob) -> Result<JobRecord> {
        let id = JobId::new();
        let now = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (id, profile_id, job_type, status, payload_json, created_at) \
                 VALUES (?1, ?2, ?3, 'queued', ?4, ?5)",
                params![
                    id.to_string(),
                    new.profile_id.to_string(),
                    new.job_type.as_str(),
                    new.payload.to_string(),
                    now.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        self.get_job(id)
    }

    pub fn get_job(&self, id: JobId) -> Result<JobRecord> {
        let found = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
                row_to_job,
            )
            .optional()
        })?;
        match found {
            Some(Some(job)) => Ok(job),
            Some(None) => Err(Error::internal(format!("job {id} row is corrupted"))),
            None => Err(Error::not_found(format!("job {id} not found"))),
        }
    }

    /// Reverse-chronological page of jobs. Corrupted rows are skipped.
    pub fn list_jobs(
        &self,
        filter: &JobFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<JobPage> {
        let limit = limit.clamp(1, 500);
        let mut sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1=1");
        let mut args: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(job_type) = filter.job_type {
            args.push(job_type.as_str().to_string());
            sql.push_str(&format!(" AND job_type = ?{}", args.len()));
        }
        if let Some(code) = filter.error_code {
            args.push(code.as_str().to_string());
            sql.push_str(&format!(" AND error_code = ?{}", args.len()));
        }
        if let Some(profile_id) = filter.profile_id {
            args.push(profile_id.to_string());
            sql.push_str(&format!(" AND profile_id = ?{}", args.len()));
        }
        if let Some(cursor) = cursor {
            args.push(cursor.to_string());
            sql.push_str(&format!(" AND id < ?{}", args.len()));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", limit + 1));

        let rows: Vec<Option<JobRecord>> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), row_to_job)?;
            rows.collect()
        })?;

        let mut jobs: Vec<JobRecord> = Vec::new();
        for row in rows {
            match row {
                Some(job) => jobs.push(job),
                None => tracing::warn!("skipping corrupted job row in list"),
            }
        }
        let next_cursor = if jobs.len() > limit {
            jobs.truncate(limit);
            jobs.last().map(|j| j.id.to_string())
        } else {
            None
        };
        Ok(JobPage { jobs, next_cursor })
    }

    /// Ids of queued jobs, oldest first. Used to rebuild the scheduler
    /// queue at startup.
    pub fn queued_job_ids(&self) -> Result<Vec<JobId>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM jobs WHERE status = 'queued' ORDER BY id ASC")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                if let Ok(id) = row?.parse() {
                    out.push(id);
                }
            }
            Ok(out)
        })
    }

    /// `queued → running`, recording `started_at`. Returns the updated row,
    /// or `Conflict` if the job is no longer queued (lost race with cancel).
    pub fn mark_job_running(&self, id: JobId) -> Result<JobRecord> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'running', started_at = ?2 \
                 WHERE id = ?1 AND status = 'queued'",
                params![id.to_string(), Utc::now().to_rfc3339()],
            )
        })?;
        if changed == 0 {
            return Err(Error::conflict(format!("job {id} is not queued")));
        }
        self.get_job(id)
    }

    /// Persist the latest progress snapshot for a running job.
    pub fn save_job_progress(&self, id: JobId, progress: &Progress) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET progress_json = ?2 WHERE id = ?1 AND status = 'running'",
                params![id.to_string(), serde_json::to_string(progress).unwrap_or_default()],
            )
            .map(|_| ())
        })
    }

    /// Transition to a terminal status. The guard on current status makes
    /// the terminal transition exactly-once: the first writer wins and a
    /// racing second transition returns `Conflict`.
    pub fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
        error_code: Option<ErrorCode>,
    ) -> Result<JobRecord> {
        debug_assert!(status.is_terminal());
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = ?2, error = ?3, error_code = ?4, finished_at = ?5 \
                 WHERE id = ?1 AND status IN ('queued', 'running')",
                params![
                    id.to_string(),
                    status.as_str(),
                    error,
                    error_code.map(ErrorCode::as_str),
                    Utc::now().to_rfc3339(),
                ],
            )
        })?;
        if changed == 0 {
            return Err(Error::conflict(format!("job {id} already finished")));
        }
        self.get_job(id)
    }

    /// Synchronous cancel of a job that has not been picked up yet. Returns
    /// `false` when the job already left `queued`.
    pub fn try_cancel_queued(&self, id: JobId) -> Result<bool> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'canceled', finished_at = ?2 \
                 WHERE id = ?1 AND status = 'queued'",
                params![id.to_string(), Utc::now().to_rfc3339()],
            )
        })?;
        Ok(changed > 0)
    }

    /// Startup crash recovery: every job still `running` becomes `failed`
    /// with a fixed message. The payload is preserved for retry.
    pub fn mark_running_jobs_failed(&self) -> Result<usize> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'failed', error = ?1, error_code = 'internal', \
                 finished_at = ?2 WHERE status = 'running'",
                params![RESTART_FAILURE_MESSAGE, Utc::now().to_rfc3339()],
            )
        })?;
        if changed > 0 {
            tracing::warn!(jobs = changed, "marked interrupted jobs as failed");
        }
        Ok(changed)
    }

    /// Delete one job row. Running jobs cannot be deleted.
    pub fn delete_job(&self, id: JobId) -> Result<()> {
        let job = self.get_job(id)?;
        if job.status == JobStatus::Running {
            return Err(Error::conflict("cannot delete a running job; cancel it first"));
        }
        self.with_conn(|conn| {
            conn.execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])
                .map(|_| ())
        })
    }

    /// Terminal jobs with `finished_at` older than `before`, oldest first,
    /// capped at `limit`. Feeds the retention sweep.
    pub fn jobs_finished_before(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<JobId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM jobs WHERE finished_at IS NOT NULL AND finished_at < ?1 \
                 ORDER BY finished_at ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![before.to_rfc3339(), limit as i64], |row| {
                row.get::<_, String>(0)
            })?;
            let mut out = Vec::new();
            for row in rows {
                if let Ok(id) = row?.parse() {
                    out.push(id);
                }
            }
            Ok(out)
        })
    }

    /// Delete a batch of jobs in one transaction.
    pub fn delete_jobs(&self, ids: &[JobId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.with_tx(|tx| {
            let mut stmt = tx.prepare("DELETE FROM jobs WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id.to_string()])?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewProfile;
    use objectdeck_common::ProviderKind;

    fn store_with_profile() -> (Store, ProfileId) {
        let store = Store::open_in_memory(None).unwrap();
        let profile = store
            .create_profile(NewProfile {
                name: "p".into(),
                provider: ProviderKind::S3Compatible,
                config: serde_json::json!({}),
                secrets: serde_json::json!({}),
                preserve_leading_slash: false,
                tls_insecure_skip_verify: false,
            })
            .unwrap();
        (store, profile.id)
    }

    fn enqueue(store: &Store, profile_id: ProfileId) -> JobRecord {
        store
            .enqueue_job(NewJob {
                profile_id,
                job_type: JobType::TransferCopyObject,
                payload: serde_json::json!({"bucket": "b", "key": "k"}),
            })
            .unwrap()
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let (store, pid) = store_with_profile();
        let job = enqueue(&store, pid);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.started_at.is_none() && job.finished_at.is_none());

        let running = store.mark_job_running(job.id).unwrap();
        assert!(running.started_at.is_some());
        assert!(running.finished_at.is_none());

        let done = store
            .finish_job(job.id, JobStatus::Succeeded, None, None)
            .unwrap();
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn test_terminal_transition_is_exactly_once() {
        let (store, pid) = store_with_profile();
        let job = enqueue(&store, pid);
        store.mark_job_running(job.id).unwrap();
        store
            .finish_job(job.id, JobStatus::Succeeded, None, None)
            .unwrap();
        // The racing cancel loses.
        let err = store
            .finish_job(job.id, JobStatus::Canceled, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.get_job(job.id).unwrap().status, JobStatus::Succeeded);
    }

    #[test]
    fn test_mark_running_jobs_failed() {
        let (store, pid) = store_with_profile();
        let a = enqueue(&store, pid);
        let b = enqueue(&store, pid);
        store.mark_job_running(a.id).unwrap();
        store.mark_job_running(b.id).unwrap();

        assert_eq!(store.mark_running_jobs_failed().unwrap(), 2);
        let page = store
            .list_jobs(&JobFilter { status: Some(JobStatus::Running), ..Default::default() }, None, 10)
            .unwrap();
        assert!(page.jobs.is_empty());
        let recovered = store.get_job(a.id).unwrap();
        assert_eq!(recovered.status, JobStatus::Failed);
        assert_eq!(recovered.error.as_deref(), Some(RESTART_FAILURE_MESSAGE));
        assert_eq!(recovered.payload["bucket"], "b");
    }

    #[test]
    fn test_corrupted_payload_skipped_in_list() {
        let (store, pid) = store_with_profile();
        enqueue(&store, pid);
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO jobs (id, profile_id, job_type, status, payload_json, created_at) \
                     VALUES (?1, ?2, 'transfer_copy_object', 'queued', 'not-valid-json', ?3)",
                    params![JobId::new().to_string(), pid.to_string(), Utc::now().to_rfc3339()],
                )
            })
            .unwrap();
        let page = store.list_jobs(&JobFilter::default(), None, 10).unwrap();
        assert_eq!(page.jobs.len(), 1);
    }

    #[test]
    fn test_cursor_pagination_descending() {
        let (store, pid) = store_with_profile();
        let mut ids: Vec<JobId> = (0..5).map(|_| enqueue(&store, pid).id).collect();
        ids.reverse();

        let first = store.list_jobs(&JobFilter::default(), None, 2).unwrap();
        assert_eq!(first.jobs.len(), 2);
        assert_eq!(first.jobs[0].id, ids[0]);
        assert_eq!(first.jobs[1].id, ids[1]);
        let cursor = first.next_cursor.unwrap();

        let second = store
            .list_jobs(&JobFilter::default(), Some(&cursor), 2)
            .unwrap();
        assert_eq!(second.jobs[0].id, ids[2]);
        assert_eq!(second.jobs[1].id, ids[3]);

        let last = store
            .list_jobs(&JobFilter::default(), second.next_cursor.as_deref(), 2)
            .unwrap();
        assert_eq!(last.jobs.len(), 1);
        assert!(last.next_cursor.is_none());
    }

    #[test]
    fn test_retention_query_and_batch_delete() {
        let (store, pid) = store_with_profile();
        let old_a = enqueue(&store, pid);
        let old_b = enqueue(&store, pid);
        let fresh = enqueue(&store, pid);
        for id in [old_a.id, old_b.id, fresh.id] {
            store.mark_job_running(id).unwrap();
            store.finish_job(id, JobStatus::Succeeded, None, None).unwrap();
        }
        let past = (Utc::now() - chrono::Duration::hours(48)).to_rfc3339();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE jobs SET finished_at = ?1 WHERE id IN (?2, ?3)",
                    params![past, old_a.id.to_string(), old_b.id.to_string()],
                )
            })
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let stale = store.jobs_finished_before(cutoff, 100).unwrap();
        assert_eq!(stale.len(), 2);
        store.delete_jobs(&stale).unwrap();
        assert!(store.get_job(old_a.id).is_err());
        assert!(store.get_job(fresh.id).is_ok());
    }

    #[test]
    fn test_filter_by_error_code() {
        let (store, pid) = store_with_profile();
        let failed = enqueue(&store, pid);
        store.mark_job_running(failed.id).unwrap();
        store
            .finish_job(
                failed.id,
                JobStatus::Failed,
                Some("provider throttled"),
                Some(ErrorCode::RateLimited),
            )
            .unwrap();
        enqueue(&store, pid);

        let page = store
            .list_jobs(
                &JobFilter { error_code: Some(ErrorCode::RateLimited), ..Default::default() },
                None,
                10,
            )
            .unwrap();
        assert_eq!(page.jobs.len(), 1);
        assert_eq!(page.jobs[0].error_code, Some(ErrorCode::RateLimited));
    }
}
