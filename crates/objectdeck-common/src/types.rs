//! Core type definitions for ObjectDeck
//!
//! Identifier newtypes, the provider tag, and the job model types shared by
//! the store, scheduler, and HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        ///
        /// Backed by a UUIDv7, so the string form sorts by creation time.
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new time-ordered identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Create from an existing UUID
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the underlying UUID
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

id_type!(ProfileId, "Unique identifier for a storage profile");
id_type!(JobId, "Unique identifier for a job");
id_type!(UploadSessionId, "Unique identifier for an upload session");

/// Storage provider dialect tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    AwsS3,
    S3Compatible,
    OciS3Compat,
    AzureBlob,
    GcpGcs,
    OciObjectStorage,
}

impl ProviderKind {
    /// Wire tag, identical to the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwsS3 => "aws_s3",
            Self::S3Compatible => "s3_compatible",
            Self::OciS3Compat => "oci_s3_compat",
            Self::AzureBlob => "azure_blob",
            Self::GcpGcs => "gcp_gcs",
            Self::OciObjectStorage => "oci_object_storage",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aws_s3" => Some(Self::AwsS3),
            "s3_compatible" => Some(Self::S3Compatible),
            "oci_s3_compat" => Some(Self::OciS3Compat),
            "azure_blob" => Some(Self::AzureBlob),
            "gcp_gcs" => Some(Self::GcpGcs),
            "oci_object_storage" => Some(Self::OciObjectStorage),
            _ => None,
        }
    }

    /// Whether this provider speaks the S3 wire protocol. S3-dialect
    /// providers support presigned uploads; the rest fall back to staging.
    #[must_use]
    pub fn is_s3_dialect(self) -> bool {
        matches!(self, Self::AwsS3 | Self::S3Compatible | Self::OciS3Compat)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    TransferSyncLocalToS3,
    TransferSyncS3ToLocal,
    TransferSyncStagingToS3,
    TransferDeletePrefix,
    TransferCopyObject,
    TransferMoveObject,
    TransferCopyBatch,
    TransferMoveBatch,
    TransferCopyPrefix,
    TransferMovePrefix,
    S3ZipPrefix,
    S3ZipObjects,
    S3IndexObjects,
}

impl JobType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransferSyncLocalToS3 => "transfer_sync_local_to_s3",
            Self::TransferSyncS3ToLocal => "transfer_sync_s3_to_local",
            Self::TransferSyncStagingToS3 => "transfer_sync_staging_to_s3",
            Self::TransferDeletePrefix => "transfer_delete_prefix",
            Self::TransferCopyObject => "transfer_copy_object",
            Self::TransferMoveObject => "transfer_move_object",
            Self::TransferCopyBatch => "transfer_copy_batch",
            Self::TransferMoveBatch => "transfer_move_batch",
            Self::TransferCopyPrefix => "transfer_copy_prefix",
            Self::TransferMovePrefix => "transfer_move_prefix",
            Self::S3ZipPrefix => "s3_zip_prefix",
            Self::S3ZipObjects => "s3_zip_objects",
            Self::S3IndexObjects => "s3_index_objects",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transfer_sync_local_to_s3" => Some(Self::TransferSyncLocalToS3),
            "transfer_sync_s3_to_local" => Some(Self::TransferSyncS3ToLocal),
            "transfer_sync_staging_to_s3" => Some(Self::TransferSyncStagingToS3),
            "transfer_delete_prefix" => Some(Self::TransferDeletePrefix),
            "transfer_copy_object" => Some(Self::TransferCopyObject),
            "transfer_move_object" => Some(Self::TransferMoveObject),
            "transfer_copy_batch" => Some(Self::TransferCopyBatch),
            "transfer_move_batch" => Some(Self::TransferMoveBatch),
            "transfer_copy_prefix" => Some(Self::TransferCopyPrefix),
            "transfer_move_prefix" => Some(Self::TransferMovePrefix),
            "s3_zip_prefix" => Some(Self::S3ZipPrefix),
            "s3_zip_objects" => Some(Self::S3ZipObjects),
            "s3_index_objects" => Some(Self::S3IndexObjects),
        _ => None,
        }
    }

    /// Sync jobs run through the external transfer engine; everything else
    /// is handled by an internal worker.
    #[must_use]
    pub fn uses_engine(self) -> bool {
        matches!(
            self,
            Self::TransferSyncLocalToS3 | Self::TransferSyncS3ToLocal | Self::TransferSyncStagingToS3
        )
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress snapshot reported by workers and the transfer engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub objects_done: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects_total: Option<u64>,
    pub bytes_done: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
    pub speed_bps: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

/// Upload session data path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    Staging,
    Presigned,
    Direct,
}

impl UploadMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Presigned => "presigned",
            Self::Direct => "direct",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "staging" => Some(Self::Staging),
            "presigned" => Some(Self::Presigned),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

/// A single object listing entry as returned by provider adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}
