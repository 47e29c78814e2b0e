//! Upload session subsystem
//!
//! Three data paths into a bucket, selected at session creation:
//!
//! - **staging**: bytes accumulate under `<dataDir>/upload-sessions/<id>/`
//!   until commit enqueues a sync job;
//! - **presigned**: the server issues signed URLs and never touches payload
//!   bytes (S3-dialect providers only);
//! - **direct**: the request body streams straight into a provider PUT.
//!
//! A periodic reaper removes expired sessions: multipart records, the
//! session row, and the staging directory last, so a crash between steps
//! never leaves a session row pointing at bytes that are already gone.

use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use futures::StreamExt;
use objectdeck_common::{
    DataLayout, Error, JobType, ProfileId, Result, UploadMode, UploadSessionId,
};
use objectdeck_jobs::{Connector, Scheduler};
use objectdeck_providers::{Capabilities, CompletedPart, ObjectStore};
use objectdeck_store::{JobRecord, MultipartRecord, NewJob, Store, UploadSession};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Upload subsystem knobs.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Session lifetime from creation.
    pub ttl: Duration,
    /// Per-session byte ceiling across all staged files.
    pub max_bytes: u64,
    /// Whether direct-stream sessions are allowed.
    pub direct_stream: bool,
    /// Lifetime of issued presigned URLs.
    pub presign_ttl: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            max_bytes: 10 * 1024 * 1024 * 1024,
            direct_stream: true,
            presign_ttl: Duration::from_secs(3600),
        }
    }
}

/// Issued multipart upload description.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartIssue {
    pub upload_id: String,
    pub path: String,
    pub chunk_size: u64,
    pub total_size: u64,
}

pub struct UploadManager {
    store: Store,
    layout: DataLayout,
    scheduler: Arc<Scheduler>,
    connector: Connector,
    config: UploadConfig,
}

impl UploadManager {
    pub fn new(
        store: Store,
        layout: DataLayout,
        scheduler: Arc<Scheduler>,
        connector: Connector,
        config: UploadConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            layout,
            scheduler,
            connector,
            config,
        })
    }

    fn provider_for(&self, profile_id: ProfileId) -> Result<Box<dyn ObjectStore>> {
        let profile = self.store.get_profile(profile_id)?;
        let tls = self.store.get_profile_tls(profile_id).ok().flatten();
        (self.connector)(&profile, tls.as_ref())
    }

    /// Create a session. Mode support is checked here against the profile's
    /// capability record so unsupported modes fail the create call.
    pub fn create_session(
        &self,
        profile_id: ProfileId,
        bucket: &str,
        key_prefix: &str,
        mode: UploadMode,
    ) -> Result<UploadSession> {
        if bucket.is_empty() {
            return Err(Error::invalid_argument("bucket is required"));
        }
        let profile = self.store.get_profile(profile_id)?;
        let caps = Capabilities::for_kind(profile.provider);
        match mode {
            UploadMode::Presigned if !caps.presigned_upload => {
                return Err(Error::not_supported(format!(
                    "{} does not support presigned uploads; use staging",
                    profile.provider
                )));
            }
            UploadMode::Direct if !self.config.direct_stream => {
                return Err(Error::not_supported(
                    "direct-stream uploads are disabled on this server",
                ));
            }
            _ => {}
        }

        let id = UploadSessionId::new();
        let staging_dir = if mode == UploadMode::Staging {
            let dir = self.layout.session_dir(&id.to_string());
            create_private_dir(&dir)?;
            dir.to_string_lossy().into_owned()
        } else {
            String::new()
        };

        let session = UploadSession {
            id,
            profile_id,
            bucket: bucket.to_string(),
            key_prefix: key_prefix.to_string(),
            mode,
            staging_dir,
            bytes_total: 0,
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.config.ttl)
                    .unwrap_or_else(|_| chrono::Duration::hours(24)),
            created_at: Utc::now(),
        };
        self.store.insert_upload_session(&session)?;
        Ok(session)
    }

    pub fn get_session(&self, id: UploadSessionId) -> Result<UploadSession> {
        self.store.get_upload_session(id)
    }

    /// Append one file to a staging session, streaming to disk. The byte
    /// ceiling is enforced as chunks arrive; on any failure (including
    /// client disconnect) the partial file is removed and the session stays
    /// usable.
    pub async fn append_file<S, E>(
        &self,
        id: UploadSessionId,
        rel_path: &str,
        mut body: S,
    ) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let session = self.store.get_upload_session(id)?;
        if session.mode != UploadMode::Staging {
            return Err(Error::invalid_argument(
                "file append is only valid for staging sessions",
            ));
        }
        let rel_path = sanitize_rel_path(rel_path)?;
        let dir = PathBuf::from(&session.staging_dir);
        let target = dir.join(encode_rel_path(&rel_path));

        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(|e| Error::internal(format!("create staged file: {e}")))?;
        let mut written = 0u64;
        let result: Result<()> = async {
            while let Some(chunk) = body.next().await {
                let chunk =
                    chunk.map_err(|e| Error::invalid_argument(format!("upload body: {e}")))?;
                written += chunk.len() as u64;
                if session.bytes_total + written > self.config.max_bytes {
                    return Err(Error::invalid_argument(format!(
                        "session would exceed the {} byte upload limit",
                        self.config.max_bytes
                    )));
                }
                file.write_all(&chunk)
                    .await
                    .map_err(|e| Error::internal(format!("write staged file: {e}")))?;
            }
            file.flush()
                .await
                .map_err(|e| Error::internal(format!("flush staged file: {e}")))?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            drop(file);
            let _ = tokio::fs::remove_file(&target).await;
            return Err(e);
        }
        self.store.set_session_bytes(id, session.bytes_total + written)?;
        Ok(written)
    }

    /// Commit a staging session: enqueue the sync job that uploads the
    /// staged files and cleans the session up on success.
    pub fn commit(&self, id: UploadSessionId) -> Result<JobRecord> {
        let session = self.store.get_upload_session(id)?;
        if session.mode != UploadMode::Staging {
            return Err(Error::invalid_argument("only staging sessions can be committed"));
        }
        self.scheduler.enqueue(NewJob {
            profile_id: session.profile_id,
            job_type: JobType::TransferSyncStagingToS3,
            payload: serde_json::json!({
                "sessionId": session.id,
                "bucket": session.bucket,
                "prefix": session.key_prefix,
                "stagingDir": session.staging_dir,
            }),
        })
    }

    /// Issue a presigned single-part PUT URL for one path in the session.
    pub async fn presign_put(&self, id: UploadSessionId, rel_path: &str) -> Result<String> {
        let session = self.require_presigned(id)?;
        let rel_path = sanitize_rel_path(rel_path)?;
        let provider = self.provider_for(session.profile_id)?;
        provider
            .presign_put(
                &session.bucket,
                &format!("{}{rel_path}", session.key_prefix),
                self.config.presign_ttl,
            )
            .await
    }

    /// Start a presigned multipart upload and record it for resume.
    pub async fn create_multipart(
        &self,
        id: UploadSessionId,
        rel_path: &str,
        chunk_size: u64,
        total_size: u64,
    ) -> Result<MultipartIssue> {
        let session = self.require_presigned(id)?;
        let rel_path = sanitize_rel_path(rel_path)?;
        if chunk_size == 0 {
            return Err(Error::invalid_argument("chunkSize must be positive"));
        }
        let provider = self.provider_for(session.profile_id)?;
        let object_key = format!("{}{rel_path}", session.key_prefix);
        let provider_upload_id = provider.create_multipart(&session.bucket, &object_key).await?;

        let upload_id = uuid::Uuid::now_v7().to_string();
        let now = Utc::now();
        self.store.upsert_multipart_record(&MultipartRecord {
            upload_id: upload_id.clone(),
            path: rel_path.clone(),
            session_id: session.id,
            bucket: session.bucket.clone(),
            object_key,
            provider_upload_id,
            chunk_size,
            total_size,
            created_at: now,
            updated_at: now,
        })?;
        Ok(MultipartIssue {
            upload_id,
            path: rel_path,
            chunk_size,
            total_size,
        })
    }

    /// Presign one part URL of a recorded multipart upload.
    pub async fn presign_part(
        &self,
        id: UploadSessionId,
        upload_id: &str,
        rel_path: &str,
        part_number: u32,
    ) -> Result<String> {
        let session = self.require_presigned(id)?;
        let record = self.store.get_multipart_record(upload_id, rel_path)?;
        if record.session_id != session.id {
            return Err(Error::not_found("multipart upload does not belong to this session"));
        }
        if part_number == 0 {
            return Err(Error::invalid_argument("partNumber starts at 1"));
        }
        let provider = self.provider_for(session.profile_id)?;
        provider
            .presign_part(
                &record.bucket,
                &record.object_key,
                &record.provider_upload_id,
                part_number,
                self.config.presign_ttl,
            )
            .await
    }

    /// Complete a recorded multipart upload and drop its record.
    pub async fn complete_multipart(
        &self,
        id: UploadSessionId,
        upload_id: &str,
        rel_path: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let session = self.require_presigned(id)?;
        let record = self.store.get_multipart_record(upload_id, rel_path)?;
        if record.session_id != session.id {
            return Err(Error::not_found("multipart upload does not belong to this session"));
        }
        let provider = self.provider_for(session.profile_id)?;
        provider
            .complete_multipart(
                &record.bucket,
                &record.object_key,
                &record.provider_upload_id,
                parts,
            )
            .await?;
        self.store.delete_multipart_record(upload_id, rel_path)?;
        Ok(())
    }

    /// Direct mode: pipe a request body straight into a provider PUT.
    pub async fn direct_put(
        &self,
        id: UploadSessionId,
        rel_path: &str,
        body: reqwest::Body,
        len: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<()> {
        let session = self.store.get_upload_session(id)?;
        if session.mode != UploadMode::Direct {
            return Err(Error::invalid_argument("session is not in direct mode"));
        }
        if let Some(len) = len {
            if len > self.config.max_bytes {
                return Err(Error::invalid_argument(format!(
                    "upload exceeds the {} byte limit",
                    self.config.max_bytes
                )));
            }
        }
        let rel_path = sanitize_rel_path(rel_path)?;
        let provider = self.provider_for(session.profile_id)?;
        provider
            .put_object_stream(
                &session.bucket,
                &format!("{}{rel_path}", session.key_prefix),
                body,
                len,
                content_type,
            )
            .await?;
        if let Some(len) = len {
            self.store.set_session_bytes(id, session.bytes_total + len)?;
        }
        Ok(())
    }

    /// Explicit delete: multipart records, session row, staging dir last.
    pub async fn delete_session(&self, id: UploadSessionId) -> Result<()> {
        let session = self.store.get_upload_session(id)?;
        self.remove_session(&session).await
    }

    async fn remove_session(&self, session: &UploadSession) -> Result<()> {
        self.store.delete_multipart_records_for_session(session.id)?;
        self.store.delete_upload_session(session.id)?;
        if !session.staging_dir.is_empty() {
            match tokio::fs::remove_dir_all(&session.staging_dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::internal(format!("remove staging dir: {e}"))),
            }
        }
        Ok(())
    }

    /// One reaper pass over expired sessions. Returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let expired = self.store.expired_upload_sessions(Utc::now())?;
        let mut removed = 0;
        for session in expired {
            match self.remove_session(&session).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(session = %session.id, "reaper failed: {e}"),
            }
        }
        if removed > 0 {
            tracing::info!(sessions = removed, "reaped expired upload sessions");
        }
        Ok(removed)
    }

    fn require_presigned(&self, id: UploadSessionId) -> Result<UploadSession> {
        let session = self.store.get_upload_session(id)?;
        if session.mode != UploadMode::Presigned {
            return Err(Error::invalid_argument("session is not in presigned mode"));
        }
        Ok(session)
    }
}

/// Spawn the TTL reaper loop.
pub fn start_reaper(manager: Arc<UploadManager>, interval: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.cancelled() => return,
            }
            if let Err(e) = manager.sweep_expired().await {
                tracing::warn!("upload reaper sweep failed: {e}");
            }
        }
    });
}

fn create_private_dir(dir: &PathBuf) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Relative paths become flat filenames: `/` → `%2F`, `%` → `%25`.
fn encode_rel_path(rel: &str) -> String {
    rel.replace('%', "%25").replace('/', "%2F")
}

/// Reject traversal and absolute paths; normalize leading `./`.
fn sanitize_rel_path(rel: &str) -> Result<String> {
    let rel = rel.trim_start_matches("./");
    if rel.is_empty() {
        return Err(Error::invalid_argument("file path must not be empty"));
    }
    if rel.starts_with('/') || rel.split('/').any(|part| part == ".." || part.is_empty()) {
        return Err(Error::invalid_argument(format!("invalid file path {rel:?}")));
    }
    Ok(rel.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use objectdeck_common::ProviderKind;
    use objectdeck_events::EventBus;
    use objectdeck_jobs::SchedulerConfig;
    use objectdeck_providers::memory::MemoryProvider;
    use objectdeck_store::NewProfile;

    struct Harness {
        manager: Arc<UploadManager>,
        store: Store,
        provider: Arc<MemoryProvider>,
        profile_id: ProfileId,
        _tmp: tempfile::TempDir,
    }

    fn harness(provider_kind: ProviderKind, config: UploadConfig) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(tmp.path());
        layout.ensure().unwrap();
        let store = Store::open_in_memory(None).unwrap();
        let bus = EventBus::new();
        let engine = objectdeck_engine::EngineDriver::new(None, layout.clone(), 1024 * 1024);
        let provider = MemoryProvider::new();
        let provider_for_connector = Arc::clone(&provider);
        let connector: Connector = Arc::new(move |_, _| {
            Ok(Box::new(Arc::clone(&provider_for_connector)) as Box<dyn ObjectStore>)
        });

        let scheduler = Scheduler::new(store.clone(), bus, engine, SchedulerConfig::default())
            .unwrap()
            .with_connector(Arc::clone(&connector));
        Arc::clone(&scheduler).start();

        let profile_id = store
            .create_profile(NewProfile {
                name: "p".into(),
                provider: provider_kind,
                config: serde_json::json!({"endpoint": "http://mem"}),
                secrets: serde_json::json!({}),
                preserve_leading_slash: false,
                tls_insecure_skip_verify: false,
            })
            .unwrap()
            .id;

        let manager = UploadManager::new(store.clone(), layout, scheduler, connector, config);
        Harness {
            manager,
            store,
            provider,
            profile_id,
            _tmp: tmp,
        }
    }

    fn body_of(s: &'static [u8]) -> impl Stream<Item = std::result::Result<Bytes, String>> + Unpin {
        stream::iter(vec![Ok(Bytes::from_static(s))])
    }

    #[tokio::test]
    async fn test_staging_end_to_end() {
        let h = harness(ProviderKind::S3Compatible, UploadConfig::default());
        let session = h
            .manager
            .create_session(h.profile_id, "bucket", "incoming/", UploadMode::Staging)
            .unwrap();
        assert!(PathBuf::from(&session.staging_dir).is_dir());

        let written = h
            .manager
            .append_file(session.id, "hello.txt", body_of(b"hello"))
            .await
            .unwrap();
        assert_eq!(written, 5);
        assert_eq!(h.manager.get_session(session.id).unwrap().bytes_total, 5);

        let job = h.manager.commit(session.id).unwrap();
        for _ in 0..200 {
            if h.store.get_job(job.id).unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let done = h.store.get_job(job.id).unwrap();
        assert_eq!(done.status, objectdeck_common::JobStatus::Succeeded);

        // The object landed under the prefix, the session and dir are gone.
        let objects = h.provider.objects.lock();
        assert_eq!(objects.get("incoming/hello.txt").unwrap().len(), 5);
        drop(objects);
        assert!(h.store.get_upload_session(session.id).is_err());
        assert!(!PathBuf::from(&session.staging_dir).exists());
    }

    #[tokio::test]
    async fn test_presigned_on_non_s3_provider_is_typed() {
        let h = harness(ProviderKind::AzureBlob, UploadConfig::default());
        let err = h
            .manager
            .create_session(h.profile_id, "bucket", "", UploadMode::Presigned)
            .unwrap_err();
        assert_eq!(err.code(), objectdeck_common::ErrorCode::NotSupported);
        assert!(err.to_string().contains("presigned"));

        // Staging fallback succeeds on the same profile.
        assert!(h
            .manager
            .create_session(h.profile_id, "bucket", "", UploadMode::Staging)
            .is_ok());
    }

    #[tokio::test]
    async fn test_byte_ceiling_rejects_and_removes_partial() {
        let h = harness(
            ProviderKind::S3Compatible,
            UploadConfig {
                max_bytes: 4,
                ..UploadConfig::default()
            },
        );
        let session = h
            .manager
            .create_session(h.profile_id, "bucket", "", UploadMode::Staging)
            .unwrap();
        let err = h
            .manager
            .append_file(session.id, "big.bin", body_of(b"too large"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), objectdeck_common::ErrorCode::InvalidArgument);

        // Partial file is gone, session still usable.
        let dir = PathBuf::from(&h.manager.get_session(session.id).unwrap().staging_dir);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        assert!(h
            .manager
            .append_file(session.id, "ok.bin", body_of(b"ok"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_nested_path_is_encoded_flat() {
        let h = harness(ProviderKind::S3Compatible, UploadConfig::default());
        let session = h
            .manager
            .create_session(h.profile_id, "bucket", "", UploadMode::Staging)
            .unwrap();
        h.manager
            .append_file(session.id, "docs/guide/intro.md", body_of(b"x"))
            .await
            .unwrap();
        let dir = PathBuf::from(&h.manager.get_session(session.id).unwrap().staging_dir);
        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["docs%2Fguide%2Fintro.md"]);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let h = harness(ProviderKind::S3Compatible, UploadConfig::default());
        let session = h
            .manager
            .create_session(h.profile_id, "bucket", "", UploadMode::Staging)
            .unwrap();
        for bad in ["../etc/passwd", "/abs.txt", "a//b", ""] {
            assert!(
                h.manager
                    .append_file(session.id, bad, body_of(b"x"))
                    .await
                    .is_err(),
                "accepted {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_multipart_issue_and_complete() {
        let h = harness(ProviderKind::S3Compatible, UploadConfig::default());
        let session = h
            .manager
            .create_session(h.profile_id, "bucket", "up/", UploadMode::Presigned)
            .unwrap();

        let issue = h
            .manager
            .create_multipart(session.id, "video.mp4", 8 * 1024 * 1024, 20 * 1024 * 1024)
            .await
            .unwrap();
        let url = h
            .manager
            .presign_part(session.id, &issue.upload_id, "video.mp4", 1)
            .await
            .unwrap();
        assert!(url.contains("partNumber=1"));
        assert!(url.contains("up/video.mp4"));

        h.manager
            .complete_multipart(
                session.id,
                &issue.upload_id,
                "video.mp4",
                &[CompletedPart {
                    part_number: 1,
                    etag: "\"e\"".into(),
                }],
            )
            .await
            .unwrap();
        // Record is gone after completion.
        assert!(h
            .store
            .get_multipart_record(&issue.upload_id, "video.mp4")
            .is_err());
        assert!(h.provider.objects.lock().contains_key("up/video.mp4"));
    }

    #[tokio::test]
    async fn test_reaper_removes_expired_sessions_fully() {
        let h = harness(
            ProviderKind::S3Compatible,
            UploadConfig {
                ttl: Duration::from_millis(50),
                ..UploadConfig::default()
            },
        );
        let staging = h
            .manager
            .create_session(h.profile_id, "bucket", "", UploadMode::Staging)
            .unwrap();
        h.manager
            .append_file(staging.id, "f.txt", body_of(b"data"))
            .await
            .unwrap();
        let presigned = h
            .manager
            .create_session(h.profile_id, "bucket", "", UploadMode::Presigned)
            .unwrap();
        h.manager
            .create_multipart(presigned.id, "f.bin", 1024, 2048)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.manager.sweep_expired().await.unwrap(), 2);

        assert!(h.store.get_upload_session(staging.id).is_err());
        assert!(h.store.get_upload_session(presigned.id).is_err());
        assert!(!PathBuf::from(&staging.staging_dir).exists());
        // No multipart records keyed to the reaped session remain.
        assert!(h
            .store
            .expired_upload_sessions(Utc::now() + chrono::Duration::days(1))
            .unwrap()
            .is_empty());
    }
}
