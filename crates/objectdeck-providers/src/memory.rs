//! In-memory provider for tests (feature `test-util`)
//!
//! Backs the `ObjectStore` contract with a plain map. Streamed PUT bodies
//! are not inspectable through `reqwest::Body`, so they are recorded as
//! zero-filled data of the declared length.

use crate::{
    BucketInfo, CompletedPart, ListObjectsPage, ListObjectsRequest, ObjectBody, ObjectStore,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use objectdeck_common::{Error, ObjectEntry, ProviderKind, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared in-memory bucket namespace.
#[derive(Default)]
pub struct MemoryProvider {
    pub objects: Mutex<BTreeMap<String, Bytes>>,
    pub multiparts: Mutex<Vec<String>>,
    /// Artificial delay for `get_object` on keys with this prefix.
    pub delay: Option<(String, Duration)>,
}

impl MemoryProvider {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn with_delay(prefix: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some((prefix.to_string(), delay)),
            ..Self::default()
        })
    }

    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.objects.lock().insert(key.to_string(), data.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for Arc<MemoryProvider> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::S3Compatible
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        Ok(vec![BucketInfo {
            name: "memory".into(),
            created_at: None,
        }])
    }

    async fn create_bucket(&self, _bucket: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_bucket(&self, _bucket: &str) -> Result<()> {
        Ok(())
    }

    async fn list_objects(&self, req: &ListObjectsRequest) -> Result<ListObjectsPage> {
        let objects = self.objects.lock();
        Ok(ListObjectsPage {
            objects: objects
                .iter()
                .filter(|(k, _)| k.starts_with(&req.prefix))
                .map(|(k, v)| ObjectEntry {
                    key: k.clone(),
                    size: v.len() as u64,
                    etag: None,
                    last_modified: None,
                })
                .collect(),
            common_prefixes: vec![],
            next_cursor: None,
        })
    }

    async fn head_object(&self, _bucket: &str, key: &str) -> Result<ObjectEntry> {
        let objects = self.objects.lock();
        let data = objects
            .get(key)
            .ok_or_else(|| Error::not_found(format!("{key} not found")))?;
        Ok(ObjectEntry {
            key: key.to_string(),
            size: data.len() as u64,
            etag: None,
            last_modified: None,
        })
    }

    async fn get_object(
        &self,
        _bucket: &str,
        key: &str,
        _range: Option<(u64, Option<u64>)>,
    ) -> Result<ObjectBody> {
        if let Some((prefix, delay)) = &self.delay {
            if key.starts_with(prefix.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        let data = self
            .objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{key} not found")))?;
        let len = data.len() as u64;
        Ok(ObjectBody {
            stream: futures::stream::once(async move { Ok(data) }).boxed(),
            content_length: Some(len),
            content_type: None,
            etag: None,
        })
    }

    async fn put_object(
        &self,
        _bucket: &str,
        key: &str,
        body: Bytes,
        _content_type: Option<&str>,
    ) -> Result<()> {
        self.objects.lock().insert(key.to_string(), body);
        Ok(())
    }

    async fn put_object_stream(
        &self,
        _bucket: &str,
        key: &str,
        body: reqwest::Body,
        len: Option<u64>,
        _content_type: Option<&str>,
    ) -> Result<()> {
        let data = body
            .as_bytes()
            .map(Bytes::copy_from_slice)
            .unwrap_or_else(|| Bytes::from(vec![0u8; len.unwrap_or(0) as usize]));
        self.objects.lock().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete_objects(&self, _bucket: &str, keys: &[String]) -> Result<()> {
        let mut objects = self.objects.lock();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn presign_put(&self, bucket: &str, key: &str, _ttl: Duration) -> Result<String> {
        Ok(format!("https://memory/{bucket}/{key}?signed"))
    }

    async fn presign_get(&self, bucket: &str, key: &str, _ttl: Duration) -> Result<String> {
        Ok(format!("https://memory/{bucket}/{key}?signed-get"))
    }

    async fn create_multipart(&self, _bucket: &str, key: &str) -> Result<String> {
        let id = format!("prov-{key}");
        self.multiparts.lock().push(id.clone());
        Ok(id)
    }

    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        _ttl: Duration,
    ) -> Result<String> {
        Ok(format!(
            "https://memory/{bucket}/{key}?uploadId={upload_id}&partNumber={part_number}"
        ))
    }

    async fn complete_multipart(
        &self,
        _bucket: &str,
        key: &str,
        _upload_id: &str,
        _parts: &[CompletedPart],
    ) -> Result<()> {
        self.objects.lock().insert(key.to_string(), Bytes::from("assembled"));
        Ok(())
    }
}
