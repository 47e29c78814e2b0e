//! Provider adapters
//!
//! One internal contract over five storage dialects. Callers check the
//! per-provider [`Capabilities`] record before dispatching; operations a
//! dialect does not implement return a typed `not_supported` error from the
//! default trait methods rather than failing deep inside a client.

mod azure;
mod capabilities;
mod client;
mod error;
mod gcs;
#[cfg(feature = "test-util")]
pub mod memory;
mod oci;
mod rsa;
mod s3;

pub use capabilities::Capabilities;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use objectdeck_common::{Error, ObjectEntry, ProviderKind, Result};
use objectdeck_store::{Profile, ProfileTlsConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Streaming object body plus response metadata.
pub struct ObjectBody {
    pub stream: BoxStream<'static, Result<Bytes>>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// A bucket or container as listed by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Request parameters for an object listing.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

/// One page of an object listing.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// A completed part of a multipart upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// The uniform operation set over all storage dialects.
///
/// The presign and policy families default to `not_supported`; dialects
/// override what they actually implement, mirroring their capability record.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> Capabilities {
        Capabilities::for_kind(self.kind())
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;
    async fn create_bucket(&self, bucket: &str) -> Result<()>;
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    async fn list_objects(&self, req: &ListObjectsRequest) -> Result<ListObjectsPage>;
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectEntry>;
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, Option<u64>)>,
    ) -> Result<ObjectBody>;
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<()>;
    /// Streaming PUT for the direct upload path. `len` is passed through as
    /// `Content-Length` when known.
    async fn put_object_stream(
        &self,
        bucket: &str,
        key: &str,
        body: reqwest::Body,
        len: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<()>;
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()>;

    async fn presign_get(&self, _bucket: &str, _key: &str, _ttl: Duration) -> Result<String> {
        Err(unsupported(self.kind(), "presigned download"))
    }
    async fn presign_put(&self, _bucket: &str, _key: &str, _ttl: Duration) -> Result<String> {
        Err(unsupported(self.kind(), "presigned upload"))
    }
    async fn create_multipart(&self, _bucket: &str, _key: &str) -> Result<String> {
        Err(unsupported(self.kind(), "presigned multipart upload"))
    }
    async fn presign_part(
        &self,
        _bucket: &str,
        _key: &str,
        _upload_id: &str,
        _part_number: u32,
        _ttl: Duration,
    ) -> Result<String> {
        Err(unsupported(self.kind(), "presigned multipart upload"))
    }
    async fn complete_multipart(
        &self,
        _bucket: &str,
        _key: &str,
        _upload_id: &str,
        _parts: &[CompletedPart],
    ) -> Result<()> {
        Err(unsupported(self.kind(), "presigned multipart upload"))
    }
    async fn abort_multipart(&self, _bucket: &str, _key: &str, _upload_id: &str) -> Result<()> {
        Err(unsupported(self.kind(), "presigned multipart upload"))
    }

    async fn get_bucket_policy(&self, _bucket: &str) -> Result<Value> {
        Err(unsupported(self.kind(), "bucket policy"))
    }
    async fn put_bucket_policy(&self, _bucket: &str, _policy: &Value) -> Result<()> {
        Err(unsupported(self.kind(), "bucket policy"))
    }
    async fn delete_bucket_policy(&self, _bucket: &str) -> Result<()> {
        Err(unsupported(self.kind(), "bucket policy"))
    }
    fn validate_policy(&self, _policy: &Value) -> Result<()> {
        Err(unsupported(self.kind(), "bucket policy"))
    }
}

pub(crate) fn unsupported(kind: ProviderKind, what: &str) -> Error {
    Error::not_supported(format!("{kind} does not support {what}"))
}

/// Build the adapter for a profile. TLS material and the insecure flag feed
/// the underlying HTTP client.
pub fn connect(profile: &Profile, tls: Option<&ProfileTlsConfig>) -> Result<Box<dyn ObjectStore>> {
    let http = client::build_http_client(profile.tls_insecure_skip_verify, tls)?;
    match profile.provider {
        ProviderKind::AwsS3 | ProviderKind::S3Compatible | ProviderKind::OciS3Compat => {
            Ok(Box::new(s3::S3Client::from_profile(profile, http)?))
        }
        ProviderKind::AzureBlob => Ok(Box::new(azure::AzureClient::from_profile(profile, http)?)),
        ProviderKind::GcpGcs => Ok(Box::new(gcs::GcsClient::from_profile(profile, http)?)),
        ProviderKind::OciObjectStorage => {
            Ok(Box::new(oci::OciClient::from_profile(profile, http)?))
        }
    }
}

/// Read a required string field from provider-shaped JSON.
pub(crate) fn json_str<'a>(value: &'a Value, field: &str) -> Result<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::invalid_argument(format!("profile is missing `{field}`")))
}

/// Optional string field, `None` when absent or empty.
pub(crate) fn json_str_opt<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}
