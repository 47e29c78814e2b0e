//! Upload session and multipart upload rows

use crate::profile::parse_ts;
use crate::Store;
use chrono::{DateTime, Utc};
use objectdeck_common::{Error, ProfileId, Result, UploadMode, UploadSessionId};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// A durable upload session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: UploadSessionId,
    pub profile_id: ProfileId,
    pub bucket: String,
    pub key_prefix: String,
    pub mode: UploadMode,
    /// Empty for non-staging sessions.
    pub staging_dir: String,
    pub bytes_total: u64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Bookkeeping row for a resumable presigned multipart upload, keyed by
/// `(upload_id, path)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartRecord {
    pub upload_id: String,
    pub path: String,
    pub session_id: UploadSessionId,
    pub bucket: String,
    pub object_key: String,
    pub provider_upload_id: String,
    pub chunk_size: u64,
    pub total_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<UploadSession> {
    let id: String = row.get(0)?;
    let profile_id: String = row.get(1)?;
    let mode: String = row.get(4)?;
    let expires_at: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(UploadSession {
        id: id.parse().unwrap_or_default(),
        profile_id: profile_id.parse().unwrap_or_default(),
        bucket: row.get(2)?,
        key_prefix: row.get(3)?,
        mode: UploadMode::parse(&mode).unwrap_or(UploadMode::Staging),
        staging_dir: row.get(5)?,
        bytes_total: row.get::<_, i64>(6)? as u64,
        expires_at: parse_ts(&expires_at),
        created_at: parse_ts(&created_at),
    })
}

fn row_to_multipart(row: &Row<'_>) -> rusqlite::Result<MultipartRecord> {
    let session_id: String = row.get(2)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(MultipartRecord {
        upload_id: row.get(0)?,
        path: row.get(1)?,
        session_id: session_id.parse().unwrap_or_default(),
        bucket: row.get(3)?,
        object_key: row.get(4)?,
        provider_upload_id: row.get(5)?,
        chunk_size: row.get::<_, i64>(6)? as u64,
        total_size: row.get::<_, i64>(7)? as u64,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

const SESSION_COLUMNS: &str =
    "id, profile_id, bucket, key_prefix, mode, staging_dir, bytes_total, expires_at, created_at";
const MULTIPART_COLUMNS: &str = "upload_id, path, session_id, bucket, object_key, \
     provider_upload_id, chunk_size, total_size, created_at, updated_at";

impl Store {
    pub fn insert_upload_session(&self, session: &UploadSession) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO upload_sessions ({SESSION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    session.id.to_string(),
                    session.profile_id.to_string(),
                    session.bucket,
                    session.key_prefix,
                    session.mode.as_str(),
                    session.staging_dir,
                    session.bytes_total as i64,
                    session.expires_at.to_rfc3339(),
                    session.created_at.to_rfc3339(),
                ],
            )
            .map(|_| ())
        })
    }

    pub fn get_upload_session(&self, id: UploadSessionId) -> Result<UploadSession> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE id = ?1"),
                params![id.to_string()],
                row_to_session,
            )
            .optional()
        })?
        .ok_or_else(|| Error::not_found(format!("upload session {id} not found")))
    }

    /// Replace the tracked byte count.
    pub fn set_session_bytes(&self, id: UploadSessionId, bytes_total: u64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE upload_sessions SET bytes_total = ?2 WHERE id = ?1",
                params![id.to_string(), bytes_total as i64],
            )
            .map(|_| ())
        })
    }

    pub fn delete_upload_session(&self, id: UploadSessionId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM upload_sessions WHERE id = ?1",
                params![id.to_string()],
            )
            .map(|_| ())
        })
    }

    /// Sessions whose `expires_at` is in the past.
    pub fn expired_upload_sessions(&self, now: DateTime<Utc>) -> Result<Vec<UploadSession>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE expires_at < ?1"
            ))?;
            let rows = stmt.query_map(params![now.to_rfc3339()], row_to_session)?;
            rows.collect()
        })
    }

    // ---- Multipart records ----

    pub fn upsert_multipart_record(&self, record: &MultipartRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO multipart_uploads ({MULTIPART_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                     ON CONFLICT(upload_id, path) DO UPDATE SET \
                     provider_upload_id = ?6, chunk_size = ?7, total_size = ?8, updated_at = ?10"
                ),
                params![
                    record.upload_id,
                    record.path,
                    record.session_id.to_string(),
                    record.bucket,
                    record.object_key,
                    record.provider_upload_id,
                    record.chunk_size as i64,
                    record.total_size as i64,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .map(|_| ())
        })
    }

    pub fn get_multipart_record(&self, upload_id: &str, path: &str) -> Result<MultipartRecord> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {MULTIPART_COLUMNS} FROM multipart_uploads \
                     WHERE upload_id = ?1 AND path = ?2"
                ),
                params![upload_id, path],
                row_to_multipart,
            )
            .optional()
        })?
        .ok_or_else(|| Error::not_found(format!("multipart upload {upload_id}:{path} not found")))
    }

    pub fn delete_multipart_record(&self, upload_id: &str, path: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM multipart_uploads WHERE upload_id = ?1 AND path = ?2",
                params![upload_id, path],
            )
            .map(|_| ())
        })
    }

    /// Remove every multipart record owned by a session.
    pub fn delete_multipart_records_for_session(&self, id: UploadSessionId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM multipart_uploads WHERE session_id = ?1",
                params![id.to_string()],
            )
            .map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_in_secs: i64) -> UploadSession {
        UploadSession {
            id: UploadSessionId::new(),
            profile_id: ProfileId::new(),
            bucket: "bucket".into(),
            key_prefix: "incoming/".into(),
            mode: UploadMode::Staging,
            staging_dir: "/tmp/x".into(),
            bytes_total: 0,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_session_round_trip_and_bytes() {
        let store = Store::open_in_memory(None).unwrap();
        let s = session(3600);
        store.insert_upload_session(&s).unwrap();

        store.set_session_bytes(s.id, 4096).unwrap();
        let got = store.get_upload_session(s.id).unwrap();
        assert_eq!(got.bytes_total, 4096);
        assert_eq!(got.mode, UploadMode::Staging);
        assert_eq!(got.key_prefix, "incoming/");

        store.delete_upload_session(s.id).unwrap();
        assert!(store.get_upload_session(s.id).is_err());
    }

    #[test]
    fn test_expired_selection() {
        let store = Store::open_in_memory(None).unwrap();
        let stale = session(-60);
        let live = session(3600);
        store.insert_upload_session(&stale).unwrap();
        store.insert_upload_session(&live).unwrap();

        let expired = store.expired_upload_sessions(Utc::now()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
    }

    #[test]
    fn test_multipart_upsert_and_session_cleanup() {
        let store = Store::open_in_memory(None).unwrap();
        let s = session(3600);
        store.insert_upload_session(&s).unwrap();

        let mut record = MultipartRecord {
            upload_id: "u1".into(),
            path: "dir/file.bin".into(),
            session_id: s.id,
            bucket: "bucket".into(),
            object_key: "incoming/dir/file.bin".into(),
            provider_upload_id: "prov-1".into(),
            chunk_size: 8 * 1024 * 1024,
            total_size: 100,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.upsert_multipart_record(&record).unwrap();

        // Duplicate key updates in place.
        record.provider_upload_id = "prov-2".into();
        store.upsert_multipart_record(&record).unwrap();
        let got = store.get_multipart_record("u1", "dir/file.bin").unwrap();
        assert_eq!(got.provider_upload_id, "prov-2");

        store.delete_multipart_records_for_session(s.id).unwrap();
        assert!(store.get_multipart_record("u1", "dir/file.bin").is_err());
    }
}
