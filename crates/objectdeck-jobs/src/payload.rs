//! Typed job payloads and validation
//!
//! Payloads travel as JSON on the job row; handlers parse them back into
//! these shapes. Validation runs at enqueue time so a bad request fails the
//! API call, not the worker.

use objectdeck_common::{Error, JobType, Result, UploadSessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingSyncPayload {
    pub session_id: UploadSessionId,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    pub staging_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePrefixPayload {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub delete_all: bool,
    #[serde(default)]
    pub allow_unsafe_prefix: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyObjectPayload {
    pub bucket: String,
    pub key: String,
    pub dest_bucket: String,
    pub dest_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyBatchPayload {
    pub bucket: String,
    pub dest_bucket: String,
    pub items: Vec<CopyItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyItem {
    pub key: String,
    pub dest_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPrefixPayload {
    pub bucket: String,
    pub prefix: String,
    pub dest_bucket: String,
    #[serde(default)]
    pub dest_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipPayload {
    pub bucket: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub keys: Option<Vec<String>>,
    /// Object key the finished archive is written to.
    pub dest_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexPayload {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    /// Full rebuild clears existing rows first; otherwise incremental.
    #[serde(default = "default_true")]
    pub full: bool,
}

fn default_true() -> bool {
    true
}

/// Validate a payload against its job type at enqueue time.
pub fn validate_payload(job_type: JobType, payload: &Value, allow_local_dirs: &[PathBuf]) -> Result<()> {
    match job_type {
        JobType::TransferSyncLocalToS3 | JobType::TransferSyncS3ToLocal => {
            let parsed: SyncPayload = parse(payload)?;
            require_bucket(&parsed.bucket)?;
            check_local_path(&parsed.local_path, allow_local_dirs)
        }
        JobType::TransferSyncStagingToS3 => {
            let parsed: StagingSyncPayload = parse(payload)?;
            require_bucket(&parsed.bucket)
        }
        JobType::TransferDeletePrefix => {
            let parsed: DeletePrefixPayload = parse(payload)?;
            require_bucket(&parsed.bucket)?;
            if parsed.delete_all {
                return Ok(());
            }
            if parsed.prefix.is_empty() {
                return Err(Error::invalid_argument(
                    "deleting a whole bucket requires deleteAll=true",
                ));
            }
            if !parsed.prefix.ends_with('/') && !parsed.allow_unsafe_prefix {
                return Err(Error::invalid_argument(
                    "prefix does not end with '/'; set allowUnsafePrefix=true to delete it anyway",
                ));
            }
            Ok(())
        }
        JobType::TransferCopyObject | JobType::TransferMoveObject => {
            let parsed: CopyObjectPayload = parse(payload)?;
            require_bucket(&parsed.bucket)?;
            require_bucket(&parsed.dest_bucket)?;
            if parsed.key.is_empty() || parsed.dest_key.is_empty() {
                return Err(Error::invalid_argument("key and destKey are required"));
            }
            Ok(())
        }
        JobType::TransferCopyBatch | JobType::TransferMoveBatch => {
            let parsed: CopyBatchPayload = parse(payload)?;
            require_bucket(&parsed.bucket)?;
            require_bucket(&parsed.dest_bucket)?;
            if parsed.items.is_empty() {
                return Err(Error::invalid_argument("items must not be empty"));
            }
            Ok(())
        }
        JobType::TransferCopyPrefix | JobType::TransferMovePrefix => {
            let parsed: CopyPrefixPayload = parse(payload)?;
            require_bucket(&parsed.bucket)?;
            require_bucket(&parsed.dest_bucket)?;
            if parsed.prefix.is_empty() {
                return Err(Error::invalid_argument("prefix is required"));
            }
            Ok(())
        }
        JobType::S3ZipPrefix | JobType::S3ZipObjects => {
            let parsed: ZipPayload = parse(payload)?;
            require_bucket(&parsed.bucket)?;
            if parsed.dest_key.is_empty() {
                return Err(Error::invalid_argument("destKey is required"));
            }
            match job_type {
                JobType::S3ZipPrefix if parsed.prefix.is_none() => {
                    Err(Error::invalid_argument("prefix is required"))
                }
                JobType::S3ZipObjects
                    if parsed.keys.as_ref().map_or(true, |k| k.is_empty()) =>
                {
                    Err(Error::invalid_argument("keys must not be empty"))
                }
                _ => Ok(()),
            }
        }
        JobType::S3IndexObjects => {
            let parsed: IndexPayload = parse(payload)?;
            require_bucket(&parsed.bucket)
        }
    }
}

pub(crate) fn parse<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| Error::invalid_argument(format!("invalid job payload: {e}")))
}

fn require_bucket(bucket: &str) -> Result<()> {
    if bucket.is_empty() {
        return Err(Error::invalid_argument("bucket is required"));
    }
    Ok(())
}

/// Local-path jobs must stay inside one of the allowed directories.
fn check_local_path(path: &Path, allow_local_dirs: &[PathBuf]) -> Result<()> {
    if allow_local_dirs.is_empty() {
        return Err(Error::Forbidden(
            "local-path jobs are disabled; start with --allow-local-dir".into(),
        ));
    }
    if !path.is_absolute() {
        return Err(Error::invalid_argument("localPath must be absolute"));
    }
    if allow_local_dirs.iter().any(|dir| path.starts_with(dir)) {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "localPath {} is outside the allowed directories",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delete_prefix_guard() {
        let payload = json!({"bucket": "b", "prefix": "data"});
        assert!(validate_payload(JobType::TransferDeletePrefix, &payload, &[]).is_err());

        let payload = json!({"bucket": "b", "prefix": "data/"});
        assert!(validate_payload(JobType::TransferDeletePrefix, &payload, &[]).is_ok());

        let payload = json!({"bucket": "b", "prefix": "data", "allowUnsafePrefix": true});
        assert!(validate_payload(JobType::TransferDeletePrefix, &payload, &[]).is_ok());
    }

    #[test]
    fn test_delete_all_requires_explicit_flag() {
        let payload = json!({"bucket": "b", "prefix": ""});
        assert!(validate_payload(JobType::TransferDeletePrefix, &payload, &[]).is_err());

        let payload = json!({"bucket": "b", "deleteAll": true});
        assert!(validate_payload(JobType::TransferDeletePrefix, &payload, &[]).is_ok());
    }

    #[test]
    fn test_local_path_allow_list() {
        let allowed = vec![PathBuf::from("/srv/exports")];
        let payload = json!({"bucket": "b", "localPath": "/srv/exports/batch1"});
        assert!(validate_payload(JobType::TransferSyncLocalToS3, &payload, &allowed).is_ok());

        let payload = json!({"bucket": "b", "localPath": "/etc/passwd"});
        assert!(matches!(
            validate_payload(JobType::TransferSyncLocalToS3, &payload, &allowed),
            Err(Error::Forbidden(_))
        ));

        let payload = json!({"bucket": "b", "localPath": "/srv/exports/x"});
        assert!(validate_payload(JobType::TransferSyncLocalToS3, &payload, &[]).is_err());
    }

    #[test]
    fn test_zip_variants() {
        let payload = json!({"bucket": "b", "destKey": "out.zip", "prefix": "photos/"});
        assert!(validate_payload(JobType::S3ZipPrefix, &payload, &[]).is_ok());
        assert!(validate_payload(JobType::S3ZipObjects, &payload, &[]).is_err());

        let payload = json!({"bucket": "b", "destKey": "out.zip", "keys": ["a.txt"]});
        assert!(validate_payload(JobType::S3ZipObjects, &payload, &[]).is_ok());
    }

    #[test]
    fn test_batch_requires_items() {
        let payload = json!({"bucket": "b", "destBucket": "c", "items": []});
        assert!(validate_payload(JobType::TransferCopyBatch, &payload, &[]).is_err());
    }
}
