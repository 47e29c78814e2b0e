//! Job scheduler and worker pool
//!
//! Jobs are durable rows first: enqueue inserts a `queued` row and feeds an
//! in-memory FIFO that a fixed pool of workers drains. At most one worker
//! owns a job id at any time; each running job carries its own cancellation
//! signal so cancelling one job never disturbs another. Every state change
//! publishes an event.

mod handlers;
pub mod payload;

pub use payload::validate_payload;

use dashmap::DashMap;
use objectdeck_common::{Error, JobId, JobStatus, JobType, Progress, Result};
use objectdeck_engine::EngineDriver;
use objectdeck_events::{event_type, job_payload, EventBus};
use objectdeck_providers::ObjectStore;
use objectdeck_store::{JobRecord, NewJob, Profile, ProfileTlsConfig, Store};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Builds a provider adapter for a profile. Swappable in tests.
pub type Connector = Arc<
    dyn Fn(&Profile, Option<&ProfileTlsConfig>) -> Result<Box<dyn ObjectStore>> + Send + Sync,
>;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub retention: Duration,
    pub retention_interval: Duration,
    pub retention_batch: usize,
    pub allow_local_dirs: Vec<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            retention: Duration::from_secs(7 * 24 * 3600),
            retention_interval: Duration::from_secs(600),
            retention_batch: 200,
            allow_local_dirs: Vec::new(),
        }
    }
}

/// Everything a handler needs for one run.
pub(crate) struct JobContext {
    pub store: Store,
    pub profile: Profile,
    pub tls: Option<ProfileTlsConfig>,
    pub cancel: CancellationToken,
    pub progress: mpsc::Sender<Progress>,
    pub connector: Connector,
}

impl JobContext {
    pub(crate) fn provider(&self) -> Result<Box<dyn ObjectStore>> {
        (self.connector)(&self.profile, self.tls.as_ref())
    }
}

pub struct Scheduler {
    store: Store,
    bus: Arc<EventBus>,
    engine: EngineDriver,
    config: SchedulerConfig,
    connector: Connector,
    queue_tx: mpsc::UnboundedSender<JobId>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<JobId>>,
    running: DashMap<JobId, CancellationToken>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create the scheduler and rebuild the queue from the store. Workers
    /// and the retention sweep start with [`Scheduler::start`].
    pub fn new(
        store: Store,
        bus: Arc<EventBus>,
        engine: EngineDriver,
        config: SchedulerConfig,
    ) -> Result<Arc<Self>> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            store,
            bus,
            engine,
            config,
            connector: Arc::new(|profile, tls| objectdeck_providers::connect(profile, tls)),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            running: DashMap::new(),
            shutdown: CancellationToken::new(),
        });
        scheduler.rebuild_queue()?;
        Ok(scheduler)
    }

    /// Replace the provider factory. Test seam.
    pub fn with_connector(self: Arc<Self>, connector: Connector) -> Arc<Self> {
        let mut inner = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("scheduler already shared"));
        inner.connector = connector;
        Arc::new(inner)
    }

    /// Spawn the worker pool and the retention sweep.
    pub fn start(self: Arc<Self>) {
        for worker in 0..self.config.concurrency.max(1) {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                scheduler.worker_loop(worker).await;
            });
        }
        tokio::spawn(async move {
            self.retention_loop().await;
        });
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn rebuild_queue(&self) -> Result<()> {
        let pending = self.store.queued_job_ids()?;
        if !pending.is_empty() {
            tracing::info!(jobs = pending.len(), "requeueing jobs from store");
        }
        for id in pending {
            let _ = self.queue_tx.send(id);
        }
        Ok(())
    }

    /// Durable enqueue: insert the row, publish `job.created`, and hand the
    /// id to the worker pool.
    pub fn enqueue(&self, new: NewJob) -> Result<JobRecord> {
        // The owning profile must exist at enqueue time.
        self.store.get_profile(new.profile_id)?;
        validate_payload(new.job_type, &new.payload, &self.config.allow_local_dirs)?;
        let job = self.store.enqueue_job(new)?;
        self.bus.publish(
            event_type::JOB_CREATED,
            Some(job.id),
            job_payload(&[
                ("type", Value::from(job.job_type.as_str())),
                ("status", Value::from(job.status.as_str())),
            ]),
        );
        let _ = self.queue_tx.send(job.id);
        Ok(job)
    }

    /// Cancel a job. Queued jobs flip synchronously; running jobs are
    /// signalled and transition when the worker exits. Idempotent.
    pub fn cancel(&self, id: JobId) -> Result<JobRecord> {
        // Two passes close the race between a queue pop and the first
        // status write.
        for _ in 0..2 {
            if let Some(token) = self.running.get(&id) {
                token.cancel();
                return self.store.get_job(id);
            }
            if self.store.try_cancel_queued(id)? {
                let job = self.store.get_job(id)?;
                self.publish_completed(&job);
                return Ok(job);
            }
            let job = self.store.get_job(id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
        }
        self.store.get_job(id)
    }

    /// Duplicate a failed or canceled job's payload into a fresh queued row.
    pub fn retry(&self, id: JobId) -> Result<JobRecord> {
        let original = self.store.get_job(id)?;
        if !matches!(original.status, JobStatus::Failed | JobStatus::Canceled) {
            return Err(Error::conflict(format!(
                "job {id} is {}; only failed or canceled jobs can be retried",
                original.status
            )));
        }
        self.enqueue(NewJob {
            profile_id: original.profile_id,
            job_type: original.job_type,
            payload: original.payload,
        })
    }

    /// Delete one job row (not running) and its log, announcing the removal.
    pub fn delete(&self, id: JobId) -> Result<()> {
        self.store.delete_job(id)?;
        self.engine.job_log(id).remove();
        self.bus.publish(
            event_type::JOBS_DELETED,
            None,
            job_payload(&[("jobIds", Value::from(vec![id.to_string()]))]),
        );
        Ok(())
    }

    /// Delete a profile and every job row it still owns. The store refuses
    /// while queued or running jobs reference the profile; the finished
    /// jobs removed here go out as one `jobs.deleted` event.
    pub fn delete_profile(&self, profile_id: objectdeck_common::ProfileId) -> Result<()> {
        self.store.delete_profile(profile_id)?;

        let filter = objectdeck_store::JobFilter {
            profile_id: Some(profile_id),
            ..Default::default()
        };
        let mut deleted: Vec<JobId> = Vec::new();
        loop {
            let page = self.store.list_jobs(&filter, None, 500)?;
            if page.jobs.is_empty() {
                break;
            }
            let ids: Vec<JobId> = page.jobs.iter().map(|j| j.id).collect();
            self.store.delete_jobs(&ids)?;
            for id in &ids {
                self.engine.job_log(*id).remove();
            }
            deleted.extend(ids);
        }
        if !deleted.is_empty() {
            let ids: Vec<String> = deleted.iter().map(JobId::to_string).collect();
            self.bus.publish(
                event_type::JOBS_DELETED,
                None,
                job_payload(&[("jobIds", Value::from(ids))]),
            );
        }
        Ok(())
    }

    /// Number of workers currently executing a job.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    async fn worker_loop(&self, worker: usize) {
        loop {
            let id = {
                let mut rx = self.queue_rx.lock().await;
                tokio::select! {
                    id = rx.recv() => id,
                    () = self.shutdown.cancelled() => return,
                }
            };
            let Some(id) = id else { return };
            tracing::debug!(worker, job = %id, "picked job");
            self.run_job(id).await;
        }
    }

    async fn run_job(&self, id: JobId) {
        let Ok(job) = self.store.get_job(id) else {
            return;
        };
        if job.status != JobStatus::Queued {
            return;
        }

        // Jobs whose profile vanished while queued fail immediately.
        let profile = match self.store.get_profile(job.profile_id) {
            Ok(profile) => profile,
            Err(e) => {
                self.finish(id, JobStatus::Failed, Some(&e));
                return;
            }
        };
        let tls = self.store.get_profile_tls(job.profile_id).ok().flatten();

        let cancel = CancellationToken::new();
        self.running.insert(id, cancel.clone());
        let job = match self.store.mark_job_running(id) {
            Ok(job) => job,
            Err(_) => {
                // Canceled between pop and lease.
                self.running.remove(&id);
                return;
            }
        };
        self.bus.publish(
            event_type::JOB_PROGRESS,
            Some(id),
            job_payload(&[
                ("status", Value::from(JobStatus::Running.as_str())),
                ("progress", serde_json::to_value(Progress::default()).unwrap_or(Value::Null)),
            ]),
        );

        let (progress_tx, mut progress_rx) = mpsc::channel::<Progress>(1);
        let ctx = JobContext {
            store: self.store.clone(),
            profile,
            tls,
            cancel: cancel.clone(),
            progress: progress_tx,
            connector: Arc::clone(&self.connector),
        };

        let execution = self.execute(&job, &ctx);
        tokio::pin!(execution);

        let result = loop {
            tokio::select! {
                result = &mut execution => break result,
                Some(progress) = progress_rx.recv() => {
                    // Latest-wins: drain anything that queued up behind.
                    let mut newest = progress;
                    while let Ok(later) = progress_rx.try_recv() {
                        newest = later;
                    }
                    let _ = self.store.save_job_progress(id, &newest);
                    self.bus.publish(
                        event_type::JOB_PROGRESS,
                        Some(id),
                        job_payload(&[
                            ("status", Value::from(JobStatus::Running.as_str())),
                            ("progress", serde_json::to_value(&newest).unwrap_or(Value::Null)),
                        ]),
                    );
                }
            }
        };

        match result {
            Ok(()) => self.finish(id, JobStatus::Succeeded, None),
            Err(e) if cancel.is_cancelled() => {
                tracing::info!(job = %id, "job canceled: {e}");
                self.finish(id, JobStatus::Canceled, None);
            }
            Err(e) => self.finish(id, JobStatus::Failed, Some(&e)),
        }
        self.running.remove(&id);
    }

    async fn execute(&self, job: &JobRecord, ctx: &JobContext) -> Result<()> {
        match job.job_type {
            JobType::TransferSyncLocalToS3 | JobType::TransferSyncS3ToLocal => {
                let args = engine_args(job.job_type, &job.payload);
                self.engine.run(job.id, &args, &ctx.cancel, &ctx.progress).await
            }
            JobType::TransferSyncStagingToS3 => {
                let parsed: payload::StagingSyncPayload = payload::parse(&job.payload)?;
                if self.engine.is_available() {
                    let args = engine_args(job.job_type, &job.payload);
                    self.engine.run(job.id, &args, &ctx.cancel, &ctx.progress).await?;
                } else {
                    handlers::staging_upload(ctx, &parsed).await?;
                }
                handlers::cleanup_staging(&self.store, &parsed).await
            }
            JobType::TransferDeletePrefix => handlers::delete_prefix(ctx, &job.payload).await,
            JobType::TransferCopyObject => {
                handlers::copy_or_move_object(ctx, &job.payload, false).await
            }
            JobType::TransferMoveObject => {
                handlers::copy_or_move_object(ctx, &job.payload, true).await
            }
            JobType::TransferCopyBatch => {
                handlers::copy_or_move_batch(ctx, &job.payload, false).await
            }
            JobType::TransferMoveBatch => {
                handlers::copy_or_move_batch(ctx, &job.payload, true).await
            }
            JobType::TransferCopyPrefix => {
                handlers::copy_or_move_prefix(ctx, &job.payload, false).await
            }
            JobType::TransferMovePrefix => {
                handlers::copy_or_move_prefix(ctx, &job.payload, true).await
            }
            JobType::S3ZipPrefix | JobType::S3ZipObjects => {
                handlers::zip_objects(ctx, &job.payload).await
            }
            JobType::S3IndexObjects => handlers::index_objects(ctx, &job.payload).await,
        }
    }

    fn finish(&self, id: JobId, status: JobStatus, error: Option<&Error>) {
        let (message, code) = match error {
            Some(e) => (Some(e.to_string()), Some(e.code())),
            None => (None, None),
        };
        match self
            .store
            .finish_job(id, status, message.as_deref(), code)
        {
            Ok(job) => self.publish_completed(&job),
            Err(e) => {
                // Lost the terminal race (e.g. cancel landed first); the
                // winner already published.
                tracing::debug!(job = %id, "terminal transition skipped: {e}");
            }
        }
    }

    fn publish_completed(&self, job: &JobRecord) {
        let mut pairs: Vec<(&str, Value)> = vec![("status", Value::from(job.status.as_str()))];
        if let Some(error) = &job.error {
            pairs.push(("error", Value::from(error.clone())));
        }
        if let Some(code) = job.error_code {
            pairs.push(("errorCode", Value::from(code.as_str())));
        }
        self.bus
            .publish(event_type::JOB_COMPLETED, Some(job.id), job_payload(&pairs));
    }

    async fn retention_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.retention_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.shutdown.cancelled() => return,
            }
            if let Err(e) = self.sweep_expired_jobs() {
                tracing::warn!("retention sweep failed: {e}");
            }
        }
    }

    /// One retention pass: delete terminal jobs older than the retention
    /// window in bounded batches, one `jobs.deleted` event per batch.
    pub fn sweep_expired_jobs(&self) -> Result<usize> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::days(7));
        let mut total = 0;
        loop {
            let stale = self
                .store
                .jobs_finished_before(cutoff, self.config.retention_batch)?;
            if stale.is_empty() {
                break;
            }
            let count = stale.len();
            self.store.delete_jobs(&stale)?;
            for id in &stale {
                self.engine.job_log(*id).remove();
            }
            let ids: Vec<String> = stale.iter().map(JobId::to_string).collect();
            self.bus.publish(
                event_type::JOBS_DELETED,
                None,
                job_payload(&[("jobIds", Value::from(ids))]),
            );
            total += count;
            if count < self.config.retention_batch {
                break;
            }
        }
        if total > 0 {
            tracing::info!(jobs = total, "retention removed expired jobs");
        }
        Ok(total)
    }
}

/// Flags for the external transfer binary, assembled from the job payload.
fn engine_args(job_type: JobType, payload: &Value) -> Vec<String> {
    let mut args = vec!["sync".to_string(), "--mode".to_string()];
    match job_type {
        JobType::TransferSyncLocalToS3 => args.push("local-to-s3".into()),
        JobType::TransferSyncS3ToLocal => args.push("s3-to-local".into()),
        _ => args.push("staging-to-s3".into()),
    }
    let mut push_arg = |flag: &str, field: &str| {
        if let Some(value) = payload.get(field).and_then(Value::as_str) {
            args.push(flag.to_string());
            args.push(value.to_string());
        }
    };
    push_arg("--bucket", "bucket");
    push_arg("--prefix", "prefix");
    push_arg("--local", "localPath");
    push_arg("--local", "stagingDir");
    args.push("--progress".to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use objectdeck_common::{DataLayout, ErrorCode, ProviderKind};
    use objectdeck_providers::memory::MemoryProvider;
    use objectdeck_store::NewProfile;

    struct Harness {
        scheduler: Arc<Scheduler>,
        store: Store,
        bus: Arc<EventBus>,
        provider: Arc<MemoryProvider>,
        _tmp: tempfile::TempDir,
    }

    fn harness(concurrency: usize) -> Harness {
        harness_with_provider(concurrency, MemoryProvider::new())
    }

    fn harness_with_provider(concurrency: usize, provider: Arc<MemoryProvider>) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(tmp.path());
        layout.ensure().unwrap();
        let store = Store::open_in_memory(None).unwrap();
        let bus = EventBus::new();
        let engine = EngineDriver::new(None, layout, 1024 * 1024);
        let provider_for_connector = Arc::clone(&provider);

        let scheduler = Scheduler::new(
            store.clone(),
            Arc::clone(&bus),
            engine,
            SchedulerConfig {
                concurrency,
                retention: Duration::from_secs(3600),
                retention_interval: Duration::from_secs(3600),
                retention_batch: 10,
                allow_local_dirs: vec![],
            },
        )
        .unwrap()
        .with_connector(Arc::new(move |_, _| {
            Ok(Box::new(Arc::clone(&provider_for_connector)) as Box<dyn ObjectStore>)
        }));
        Arc::clone(&scheduler).start();
        Harness {
            scheduler,
            store,
            bus,
            provider,
            _tmp: tmp,
        }
    }

    fn make_profile(store: &Store) -> objectdeck_common::ProfileId {
        store
            .create_profile(NewProfile {
                name: "mem".into(),
                provider: ProviderKind::S3Compatible,
                config: serde_json::json!({"endpoint": "http://mem"}),
                secrets: serde_json::json!({}),
                preserve_leading_slash: false,
                tls_insecure_skip_verify: false,
            })
            .unwrap()
            .id
    }

    async fn wait_terminal(store: &Store, id: JobId) -> JobRecord {
        for _ in 0..200 {
            let job = store.get_job(id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_delete_prefix_job_end_to_end() {
        let h = harness(1);
        let pid = make_profile(&h.store);
        h.provider
            .objects
            .lock()
            .extend([
                ("data/a.txt".to_string(), Bytes::from("a")),
                ("data/b.txt".to_string(), Bytes::from("b")),
                ("keep/c.txt".to_string(), Bytes::from("c")),
            ]);

        let mut sub = h.bus.subscribe();
        let job = h
            .scheduler
            .enqueue(NewJob {
                profile_id: pid,
                job_type: JobType::TransferDeletePrefix,
                payload: serde_json::json!({"bucket": "b", "prefix": "data/"}),
            })
            .unwrap();

        let done = wait_terminal(&h.store, job.id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(h.provider.objects.lock().len(), 1);

        // Event order: created, progress..., completed; nothing after.
        let mut seen = Vec::new();
        while let Ok(Some(e)) =
            tokio::time::timeout(Duration::from_millis(100), sub.recv()).await
        {
            if e.job_id == Some(job.id) {
                seen.push(e.event_type.clone());
            }
        }
        assert_eq!(seen.first().map(String::as_str), Some("job.created"));
        assert_eq!(seen.last().map(String::as_str), Some("job.completed"));
        assert_eq!(
            seen.iter().filter(|t| t.as_str() == "job.completed").count(),
            1
        );
        assert!(seen.iter().any(|t| t == "job.progress"));
    }

    #[tokio::test]
    async fn test_unsafe_prefix_rejected_at_enqueue() {
        let h = harness(1);
        let pid = make_profile(&h.store);
        let err = h
            .scheduler
            .enqueue(NewJob {
                profile_id: pid,
                job_type: JobType::TransferDeletePrefix,
                payload: serde_json::json!({"bucket": "b", "prefix": "data"}),
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_retry_duplicates_payload_into_new_job() {
        let h = harness(1);
        let pid = make_profile(&h.store);
        // head_object on a missing key fails the move.
        let job = h
            .scheduler
            .enqueue(NewJob {
                profile_id: pid,
                job_type: JobType::TransferMoveObject,
                payload: serde_json::json!({
                    "bucket": "b", "key": "missing",
                    "destBucket": "b", "destKey": "dst",
                }),
            })
            .unwrap();
        let failed = wait_terminal(&h.store, job.id).await;
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_code, Some(ErrorCode::NotFound));

        h.provider
            .objects
            .lock()
            .insert("missing".to_string(), Bytes::from("now here"));
        let retried = h.scheduler.retry(job.id).unwrap();
        assert_ne!(retried.id, job.id);
        assert_eq!(retried.payload, failed.payload);

        let done = wait_terminal(&h.store, retried.id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        // Original row is untouched.
        assert_eq!(h.store.get_job(job.id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_is_synchronous() {
        // Slow downloads stall the single worker on the first job.
        let h = harness_with_provider(
            1,
            MemoryProvider::with_delay("slow/", Duration::from_millis(500)),
        );
        let pid = make_profile(&h.store);
        for key in ["slow/1", "slow/2", "slow/3"] {
            h.provider.insert(key, Bytes::from("x"));
        }
        let _busy = h
            .scheduler
            .enqueue(NewJob {
                profile_id: pid,
                job_type: JobType::S3ZipPrefix,
                payload: serde_json::json!({"bucket": "b", "prefix": "slow/", "destKey": "out.zip"}),
            })
            .unwrap();
        let queued = h
            .scheduler
            .enqueue(NewJob {
                profile_id: pid,
                job_type: JobType::TransferDeletePrefix,
                payload: serde_json::json!({"bucket": "b", "prefix": "slow/"}),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let canceled = h.scheduler.cancel(queued.id).unwrap();
        assert_eq!(canceled.status, JobStatus::Canceled);
        // Cancel again: idempotent.
        let again = h.scheduler.cancel(queued.id).unwrap();
        assert_eq!(again.status, JobStatus::Canceled);
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let h = harness(2);
        let pid = make_profile(&h.store);
        for i in 0..20 {
            h.provider
                .objects
                .lock()
                .insert(format!("load/{i}"), Bytes::from(vec![0u8; 10]));
        }
        for _ in 0..6 {
            h.scheduler
                .enqueue(NewJob {
                    profile_id: pid,
                    job_type: JobType::S3IndexObjects,
                    payload: serde_json::json!({"bucket": "b", "prefix": "load/"}),
                })
                .unwrap();
        }
        for _ in 0..50 {
            assert!(h.scheduler.running_count() <= 2);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_retention_sweep_publishes_single_event() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(tmp.path());
        layout.ensure().unwrap();
        let store = Store::open_in_memory(None).unwrap();
        let bus = EventBus::new();
        let engine = EngineDriver::new(None, layout, 1024);
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::clone(&bus),
            engine,
            SchedulerConfig {
                concurrency: 1,
                // Short retention so aging is a short sleep.
                retention: Duration::from_millis(500),
                retention_interval: Duration::from_secs(3600),
                retention_batch: 10,
                allow_local_dirs: vec![],
            },
        )
        .unwrap();
        // Workers are intentionally not started; rows are driven by hand.

        let pid = make_profile(&store);
        let mut old_ids = Vec::new();
        for _ in 0..2 {
            let job = store
                .enqueue_job(NewJob {
                    profile_id: pid,
                    job_type: JobType::TransferDeletePrefix,
                    payload: serde_json::json!({"bucket": "b", "deleteAll": true}),
                })
                .unwrap();
            store.mark_job_running(job.id).unwrap();
            store
                .finish_job(job.id, JobStatus::Succeeded, None, None)
                .unwrap();
            old_ids.push(job.id);
        }
        tokio::time::sleep(Duration::from_millis(700)).await;
        let fresh = store
            .enqueue_job(NewJob {
                profile_id: pid,
                job_type: JobType::TransferDeletePrefix,
                payload: serde_json::json!({"bucket": "b", "deleteAll": true}),
            })
            .unwrap();
        store.mark_job_running(fresh.id).unwrap();
        store
            .finish_job(fresh.id, JobStatus::Succeeded, None, None)
            .unwrap();

        let mut sub = bus.subscribe();
        let removed = scheduler.sweep_expired_jobs().unwrap();
        assert_eq!(removed, 2);
        assert!(store.get_job(fresh.id).is_ok());
        for id in old_ids {
            assert!(store.get_job(id).is_err());
        }

        let event = tokio::time::timeout(Duration::from_millis(200), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, "jobs.deleted");
        let ids = event.payload["jobIds"].as_array().unwrap();
        assert_eq!(ids.len(), 2);
    }
}
